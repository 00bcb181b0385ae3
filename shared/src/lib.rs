// lib.rs - NoelUpload shared core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod config;
pub mod history;
pub mod links;
pub mod model;
pub mod storage;
pub mod upload;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use app::{App, Effect, Event, HistoryEntryView, Intent, MessageKind, UserMessage, ViewModel};
pub use config::{AppConfig, ConfigError};
pub use history::{
    ChangeSubscription, EntryKey, HistoryEntryChange, HistoryEntryChangeType,
    HistoryEntryRepository, HistoryError, HistoryViewModel, ListUpdate,
};
pub use links::LinkError;
pub use model::{HistoryEntryInfos, ImageRef, UnixTimeMs, UploadInfos, UploadStatus, UploadStatusInfos};
pub use storage::{HistoryStorage, StorageError};
#[cfg(not(target_arch = "wasm32"))]
pub use storage::SqliteStorage;
pub use upload::{FsImageLoader, ImageData, ImageLoader, UploadError, UploadPipeline, Uploader};

#[cfg(feature = "http")]
pub use upload::HttpUploader;

pub const DEFAULT_UPLOAD_URL: &str = "https://www.noelshack.com/webservice/envoi.json";
pub const UPLOAD_FORM_FIELD: &str = "fichier[]";
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_LINK_LENGTH: usize = 2048;
pub const MAX_STATUS_MESSAGE_LENGTH: usize = 256;
pub const USER_AGENT: &str = concat!("noelupload/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidLink,
    UploadAlreadyRunning,
    Network,
    Timeout,
    Server,
    InvalidFile,
    ImageTooLarge,
    ImageFormatUnsupported,
    Storage,
    Serialization,
    Configuration,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidLink => "INVALID_LINK",
            Self::UploadAlreadyRunning => "UPLOAD_ALREADY_RUNNING",
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Server => "SERVER_ERROR",
            Self::InvalidFile => "INVALID_FILE",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::ImageFormatUnsupported => "IMAGE_FORMAT_UNSUPPORTED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Server | Self::Storage | Self::UploadAlreadyRunning => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Configuration | Self::InvalidState | Self::Internal => {
                ErrorSeverity::Fatal
            }

            Self::InvalidLink
            | Self::InvalidFile
            | Self::ImageTooLarge
            | Self::ImageFormatUnsupported
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    /// Whether trying the same action again by hand can succeed. Nothing in
    /// the core retries automatically.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Server | Self::Storage | Self::UploadAlreadyRunning
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::InvalidLink => "This link is not a valid image link.".into(),
            ErrorKind::UploadAlreadyRunning => {
                "An upload is already running, wait for it to finish.".into()
            }
            ErrorKind::Network => {
                "Unable to reach the image host. Please check your internet connection.".into()
            }
            ErrorKind::Timeout => "The upload timed out. Please try again.".into(),
            ErrorKind::Server => {
                if self.message.is_empty() {
                    "The image host refused the upload.".into()
                } else {
                    format!("The image host refused the upload: {}", self.message)
                }
            }
            ErrorKind::InvalidFile => "The selected file is invalid.".into(),
            ErrorKind::ImageTooLarge => {
                let max = self
                    .context
                    .get("max_bytes")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(MAX_IMAGE_BYTES);
                format!(
                    "The image is too large. Please use an image smaller than {}.",
                    format_byte_limit(max)
                )
            }
            ErrorKind::ImageFormatUnsupported => {
                "This file format is not supported. Please use JPEG, PNG, GIF, WebP or BMP.".into()
            }
            ErrorKind::Storage => "Unable to save the upload history on this device.".into(),
            ErrorKind::Serialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::Configuration => self.message.clone(),
            ErrorKind::InvalidState => {
                "The app is in an invalid state. Please restart the app.".into()
            }
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&str>) -> Self {
        let kind = match status {
            408 | 504 => ErrorKind::Timeout,
            400..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map_or_else(|| format!("HTTP error: {status}"), |b| truncate_message(b, MAX_STATUS_MESSAGE_LENGTH));

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

/// Whole megabytes or kilobytes when exact, bytes otherwise.
fn format_byte_limit(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * 1024;
    if bytes >= MB && bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{} KB", bytes / KB)
    } else {
        format!("{bytes} bytes")
    }
}

/// Cuts `s` to at most `max_bytes` without splitting a UTF-8 sequence.
#[must_use]
pub fn truncate_message(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    mod error_tests {
        use super::*;

        #[test]
        fn test_app_error_new() {
            let error = AppError::new(ErrorKind::Network, "Connection failed");
            assert_eq!(error.kind, ErrorKind::Network);
            assert_eq!(error.severity, ErrorSeverity::Transient);
            assert_eq!(error.message, "Connection failed");
            assert!(error.internal_message.is_none());
            assert!(error.context.is_empty());
        }

        #[test]
        fn test_app_error_with_internal() {
            let error = AppError::new(ErrorKind::Storage, "Write failed")
                .with_internal("disk I/O error");
            assert_eq!(error.internal_message.as_deref(), Some("disk I/O error"));
            assert_eq!(error.to_string(), "[STORAGE_ERROR] Write failed (internal: disk I/O error)");
        }

        #[test]
        fn test_app_error_with_context() {
            let error = AppError::new(ErrorKind::InvalidLink, "bad link")
                .with_context("link", "ftp://nope");
            assert_eq!(error.context.get("link").map(String::as_str), Some("ftp://nope"));
        }

        #[test]
        fn test_app_error_from_http_status() {
            let error = AppError::from_http_status(500, None);
            assert_eq!(error.kind, ErrorKind::Server);
            assert_eq!(error.message, "HTTP error: 500");
            assert_eq!(error.context.get("http_status").map(String::as_str), Some("500"));

            let error = AppError::from_http_status(413, Some("  Fichier trop gros  "));
            assert_eq!(error.kind, ErrorKind::Server);
            assert_eq!(error.message, "Fichier trop gros");

            assert_eq!(AppError::from_http_status(408, None).kind, ErrorKind::Timeout);
            assert_eq!(AppError::from_http_status(302, None).kind, ErrorKind::Unknown);
        }

        #[test]
        fn test_error_kind_retryable() {
            assert!(ErrorKind::Network.is_retryable());
            assert!(ErrorKind::Timeout.is_retryable());
            assert!(ErrorKind::UploadAlreadyRunning.is_retryable());
            assert!(!ErrorKind::InvalidFile.is_retryable());
            assert!(!ErrorKind::InvalidLink.is_retryable());
        }

        #[test]
        fn test_fatal_severity_is_never_retryable() {
            let error = AppError::new(ErrorKind::Network, "x").with_severity(ErrorSeverity::Fatal);
            assert!(!error.is_retryable());
        }

        #[test]
        fn test_user_facing_message() {
            let error = AppError::new(ErrorKind::UploadAlreadyRunning, "busy");
            assert!(error.user_facing_message().contains("already running"));

            let error = AppError::new(ErrorKind::Server, "quota");
            assert!(error.user_facing_message().ends_with("quota"));

            let error = AppError::new(ErrorKind::ImageTooLarge, "too big");
            assert!(error.user_facing_message().contains("10 MB"));
        }
    }

    mod truncate_tests {
        use super::*;

        #[test]
        fn test_short_message_untouched() {
            assert_eq!(truncate_message("hello", 10), "hello");
        }

        #[test]
        fn test_truncation_respects_char_boundaries() {
            let truncated = truncate_message("ééééé", 3);
            assert_eq!(truncated, "é...");
        }
    }
}
