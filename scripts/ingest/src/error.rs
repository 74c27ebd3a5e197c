use thiserror::Error;

/// Everything that can go wrong during a run.
///
/// `Config`, `Credentials`, `AuthFailure` and `Sheet` are fatal to the run.
/// The remaining variants are raised per row and end up in the row's
/// `error_message` column.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not read credentials: {0}")]
    Credentials(String),

    #[error("Login failed: {0}")]
    AuthFailure(String),

    #[error("Artist or album not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("File upload failed: {0}")]
    Upload(String),

    #[error("Could not read audio duration: {0}")]
    Probe(String),

    #[error("Could not create song record: {0}")]
    Registration(String),

    #[error("Spreadsheet error: {0}")]
    Sheet(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
