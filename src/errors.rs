use thiserror::Error;

/// All the possible errors surfaced by the provider.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("file `{0}` has no content to upload")]
    NoContent(String),

    #[error(transparent)]
    Storage(#[from] azure_core::error::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

/// A result type that can be used to indicate errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;
