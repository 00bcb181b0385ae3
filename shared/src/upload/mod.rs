//! Upload pipeline: loading the picked image, sending it to the host, and
//! feeding the outcome into the history.

mod loader;
mod pipeline;
mod uploader;

use thiserror::Error;

use crate::history::HistoryError;
use crate::links::LinkError;
use crate::{AppError, ErrorKind};

pub use self::loader::{FsImageLoader, ImageData, ImageLoader};
pub use self::pipeline::UploadPipeline;
#[cfg(feature = "http")]
pub use self::uploader::HttpUploader;
pub use self::uploader::Uploader;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("an upload is already running")]
    AlreadyRunning,

    #[error("image is {size} bytes, the limit is {max}")]
    ImageTooLarge { size: u64, max: usize },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("network error: {0}")]
    Network(String),

    #[error("upload timed out")]
    Timeout,

    #[error("server answered HTTP {status}")]
    Server { status: u16, body: Option<String> },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload task failed: {0}")]
    Task(String),
}

impl UploadError {
    /// Short text stored on the failed history row and in the ERROR status.
    #[must_use]
    pub fn status_message(&self) -> String {
        AppError::from(self).user_facing_message()
    }
}

impl From<&UploadError> for AppError {
    fn from(e: &UploadError) -> Self {
        match e {
            UploadError::InvalidFile(reason) => {
                AppError::new(ErrorKind::InvalidFile, "Invalid image file").with_internal(reason.clone())
            }
            UploadError::AlreadyRunning => AppError::new(ErrorKind::UploadAlreadyRunning, e.to_string()),
            UploadError::ImageTooLarge { size, max } => AppError::new(ErrorKind::ImageTooLarge, e.to_string())
                .with_context("size", size.to_string())
                .with_context("max_bytes", max.to_string()),
            UploadError::UnsupportedFormat => {
                AppError::new(ErrorKind::ImageFormatUnsupported, e.to_string())
            }
            UploadError::Network(reason) => {
                AppError::new(ErrorKind::Network, "Network error").with_internal(reason.clone())
            }
            UploadError::Timeout => AppError::new(ErrorKind::Timeout, e.to_string()),
            UploadError::Server { status, body } => AppError::from_http_status(*status, body.as_deref()),
            UploadError::Link(link) => link.clone().into(),
            UploadError::History(HistoryError::Storage(storage)) => {
                AppError::new(ErrorKind::Storage, "History storage failed").with_internal(storage.to_string())
            }
            UploadError::History(other) => AppError::new(ErrorKind::InvalidState, other.to_string()),
            UploadError::Io(io) => {
                AppError::new(ErrorKind::InvalidFile, "Unable to read the image").with_internal(io.to_string())
            }
            UploadError::Task(reason) => {
                AppError::new(ErrorKind::Internal, "Upload task failed").with_internal(reason.clone())
            }
        }
    }
}

impl From<UploadError> for AppError {
    fn from(e: UploadError) -> Self {
        Self::from(&e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let cases = [
            (UploadError::InvalidFile("empty".into()), ErrorKind::InvalidFile),
            (UploadError::AlreadyRunning, ErrorKind::UploadAlreadyRunning),
            (UploadError::ImageTooLarge { size: 11, max: 10 }, ErrorKind::ImageTooLarge),
            (UploadError::UnsupportedFormat, ErrorKind::ImageFormatUnsupported),
            (UploadError::Network("reset".into()), ErrorKind::Network),
            (UploadError::Timeout, ErrorKind::Timeout),
            (UploadError::Server { status: 503, body: None }, ErrorKind::Server),
            (UploadError::Link(LinkError::Rejected("nope".into())), ErrorKind::Server),
        ];
        for (error, kind) in cases {
            assert_eq!(AppError::from(&error).kind, kind, "{error}");
        }
    }

    #[test]
    fn test_status_message_is_user_facing() {
        let message = UploadError::Link(LinkError::Rejected("Fichier trop volumineux".into())).status_message();
        assert!(message.contains("Fichier trop volumineux"));

        let message = UploadError::Network("connection reset by peer".into()).status_message();
        assert!(!message.contains("peer"));
    }

    #[test]
    fn test_too_large_message_uses_enforced_limit() {
        let message = UploadError::ImageTooLarge {
            size: 3 * 1024 * 1024,
            max: 2 * 1024 * 1024,
        }
        .status_message();
        assert!(message.contains("smaller than 2 MB"), "{message}");

        let message = UploadError::ImageTooLarge { size: 900, max: 512 }.status_message();
        assert!(message.contains("smaller than 512 bytes"), "{message}");
    }
}
