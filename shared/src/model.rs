use serde::{Deserialize, Serialize};
use std::fmt;

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploading,
    Finished,
    Error,
}

impl UploadStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// FINISHED and ERROR end an upload; the pipeline is idle again afterwards.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadStatusInfos {
    pub status: UploadStatus,
    pub message: String,
}

impl UploadStatusInfos {
    #[must_use]
    pub fn new(status: UploadStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// One completed upload as it is persisted.
///
/// `image_base_link` is the link to the hosting page of the image (the one
/// with the site overlay), and is the natural key of the record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadInfos {
    pub image_base_link: String,
    pub image_name: String,
    pub upload_time_ms: UnixTimeMs,
    /// Generated by the storage on insert.
    pub id: Option<i64>,
}

impl UploadInfos {
    #[must_use]
    pub fn new(
        image_base_link: impl Into<String>,
        image_name: impl Into<String>,
        upload_time_ms: UnixTimeMs,
    ) -> Self {
        Self {
            image_base_link: image_base_link.into(),
            image_name: image_name.into(),
            upload_time_ms,
            id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Row of the history list as the presentation layer sees it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntryInfos {
    /// Empty while the upload is still running.
    pub image_base_link: String,
    pub image_name: String,
    pub upload_time_ms: UnixTimeMs,
    pub upload_status: UploadStatus,
    pub upload_status_message: String,
}

impl HistoryEntryInfos {
    #[must_use]
    pub fn uploading(image_name: impl Into<String>, upload_time_ms: UnixTimeMs) -> Self {
        Self {
            image_base_link: String::new(),
            image_name: image_name.into(),
            upload_time_ms,
            upload_status: UploadStatus::Uploading,
            upload_status_message: String::new(),
        }
    }

    #[must_use]
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.upload_status = UploadStatus::Error;
        self.upload_status_message = message.into();
        self
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.upload_status == UploadStatus::Finished && !self.image_base_link.is_empty()
    }

    #[must_use]
    pub fn direct_link(&self) -> String {
        crate::links::noelshack_to_direct_link(&self.image_base_link)
    }
}

impl From<&UploadInfos> for HistoryEntryInfos {
    fn from(infos: &UploadInfos) -> Self {
        Self {
            image_base_link: infos.image_base_link.clone(),
            image_name: infos.image_name.clone(),
            upload_time_ms: infos.upload_time_ms,
            upload_status: UploadStatus::Finished,
            upload_status_message: String::new(),
        }
    }
}

/// Reference to an image picked or shared by the user: a filesystem path or
/// a `file://` URI. Don't store image bytes here.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub uri: String,
}

impl ImageRef {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Last path segment of the reference, used as the image name.
    #[must_use]
    pub fn display_name(&self) -> String {
        let trimmed = self.uri.trim_end_matches(['/', '\\']);
        let name = trimmed
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        if name.is_empty() {
            "image".to_string()
        } else {
            name.to_string()
        }
    }
}

// Paths can leak user names, keep them out of logs.
impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("name", &self.display_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod image_ref_tests {
        use super::*;

        #[test]
        fn test_display_name_from_path() {
            assert_eq!(ImageRef::new("/tmp/pics/cat.png").display_name(), "cat.png");
            assert_eq!(ImageRef::new("file:///sdcard/DCIM/dog.jpg").display_name(), "dog.jpg");
            assert_eq!(ImageRef::new(r"C:\Users\me\bird.gif").display_name(), "bird.gif");
        }

        #[test]
        fn test_display_name_fallback() {
            assert_eq!(ImageRef::new("").display_name(), "image");
            assert_eq!(ImageRef::new("/").display_name(), "image");
        }

        #[test]
        fn test_debug_hides_full_path() {
            let debug = format!("{:?}", ImageRef::new("/home/alice/secret/cat.png"));
            assert!(debug.contains("cat.png"));
            assert!(!debug.contains("alice"));
        }
    }

    mod history_entry_tests {
        use super::*;

        #[test]
        fn test_entry_from_upload_infos() {
            let infos = UploadInfos::new("https://www.noelshack.com/2019-14-1-1554135563-a.png", "a.png", UnixTimeMs(42))
                .with_id(7);
            let entry = HistoryEntryInfos::from(&infos);
            assert_eq!(entry.upload_status, UploadStatus::Finished);
            assert_eq!(entry.image_name, "a.png");
            assert!(entry.is_persisted());
        }

        #[test]
        fn test_uploading_then_failed() {
            let entry = HistoryEntryInfos::uploading("a.png", UnixTimeMs(1));
            assert_eq!(entry.upload_status, UploadStatus::Uploading);
            assert!(!entry.is_persisted());

            let failed = entry.failed("boom");
            assert_eq!(failed.upload_status, UploadStatus::Error);
            assert_eq!(failed.upload_status_message, "boom");
            assert!(!failed.is_persisted());
        }

        #[test]
        fn test_status_terminal() {
            assert!(!UploadStatus::Uploading.is_terminal());
            assert!(UploadStatus::Finished.is_terminal());
            assert!(UploadStatus::Error.is_terminal());
        }
    }

    #[test]
    fn test_unix_time_now_is_recent() {
        // 2020-01-01 in ms
        assert!(UnixTimeMs::now().as_millis() > 1_577_836_800_000);
    }
}
