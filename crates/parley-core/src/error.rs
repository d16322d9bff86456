//! Error types for `Parley` core library.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A config layer could not be read, parsed or validated.
    #[error("Configuration error: {0}")]
    Config(String),
}
