use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can abort a signing operation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Unknown documentId: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Source document unavailable at {}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported image format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("Failed to load document: {reason}")]
    DocumentLoad { reason: String },

    #[error("Page {page} not found, document has {page_count} page(s)")]
    PageNotFound { page: u32, page_count: usize },

    #[error("Failed to embed image: {reason}")]
    ImageEmbed { reason: String },

    #[error("Failed to serialize document: {reason}")]
    DocumentWrite { reason: String },

    #[error("Failed to write output file {}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read signed file {}", path.display())]
    SignedFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit trail write failed")]
    Persistence(#[from] PersistenceError),
}

/// Audit store errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Audit store connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Audit store query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Audit store unavailable: {message}")]
    Unavailable { message: String },
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// HTTP status the caller sees for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } => 400,
            Error::DocumentNotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Message safe to hand back to the caller. Processing and persistence
    /// faults stay opaque; operators get the full chain from the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation { message } => message.clone(),
            Error::DocumentNotFound { .. } => "Unknown documentId".to_owned(),
            _ => "Internal server error".to_owned(),
        }
    }

    /// The display chain of this error and all of its sources.
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            detail.push_str(": ");
            detail.push_str(&err.to_string());
            source = err.source();
        }
        detail
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::DocumentLoad {
            reason: err.to_string(),
        }
    }
}
