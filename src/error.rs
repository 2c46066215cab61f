//! Error kinds reported by slot negotiation and transfers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no upload service specified and none discovered")]
    NoServiceAvailable,

    #[error("file is larger than the maximum of {max_file_size} bytes accepted by the upload service")]
    FileTooLarge { max_file_size: u64 },

    #[error("slot negotiation failed: {0:#}")]
    NegotiationFailed(#[source] anyhow::Error),

    #[error("malformed slot response: {0}")]
    MalformedResponse(String),

    #[error("upload rejected with HTTP {status}: {message}")]
    UploadRejected { status: u16, message: String },

    #[error("transfer I/O failure: {0:#}")]
    TransferIo(#[source] anyhow::Error),

    #[error("transfer canceled")]
    Canceled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl UploadError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        UploadError::MalformedResponse(msg.into())
    }

    pub(crate) fn io(err: impl Into<anyhow::Error>) -> Self {
        UploadError::TransferIo(err.into())
    }

    /// HTTP status carried by an `UploadRejected` error.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            UploadError::UploadRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for UploadError {
    fn from(err: quick_xml::Error) -> Self {
        UploadError::MalformedResponse(err.to_string())
    }
}
