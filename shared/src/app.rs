//! Presentation contract: the shell feeds [`Event`]s to [`App::update`] and
//! carries out the returned [`Effect`]s; [`App::view`] gives what to draw.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::history::{HistoryEntryRepository, HistoryError, HistoryViewModel, ListUpdate};
use crate::links::{is_noelshack_image_link, noelshack_to_direct_link};
use crate::model::{HistoryEntryInfos, ImageRef, UploadStatus, UploadStatusInfos};
use crate::storage::HistoryStorage;
use crate::upload::{ImageLoader, UploadPipeline, Uploader};
use crate::{AppError, ErrorKind, ErrorSeverity};

/// What the platform hands over when the app is opened from outside.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Intent {
    /// An image shared from another app.
    Send { stream: Option<ImageRef> },
    /// Shortcut asking to pick an image.
    PickImage,
}

impl From<Intent> for Event {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Send { stream } => Self::ShareImage { image: stream },
            Intent::PickImage => Self::PickImageRequested,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Started,

    ShareImage { image: Option<ImageRef> },
    PickImageRequested,
    ImagePicked { image: Option<ImageRef> },
    PickerUnavailable,

    HistoryEntryTapped { index: usize },
    DeleteHistoryEntry { index: usize },
    ClearHistory,

    /// The history repository queued changes.
    HistoryChanged,
    UploadStatusChanged(UploadStatusInfos),

    DismissMessage,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::ShareImage { .. } => "share_image",
            Self::PickImageRequested => "pick_image_requested",
            Self::ImagePicked { .. } => "image_picked",
            Self::PickerUnavailable => "picker_unavailable",
            Self::HistoryEntryTapped { .. } => "history_entry_tapped",
            Self::DeleteHistoryEntry { .. } => "delete_history_entry",
            Self::ClearHistory => "clear_history",
            Self::HistoryChanged => "history_changed",
            Self::UploadStatusChanged(_) => "upload_status_changed",
            Self::DismissMessage => "dismiss_message",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ShareImage { .. }
                | Self::PickImageRequested
                | Self::ImagePicked { .. }
                | Self::HistoryEntryTapped { .. }
                | Self::DeleteHistoryEntry { .. }
                | Self::ClearHistory
                | Self::DismissMessage
        )
    }
}

/// Work the shell performs on behalf of the core.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Render,
    /// Open the platform image picker, answer with [`Event::ImagePicked`] or
    /// [`Event::PickerUnavailable`].
    PickImage,
    CopyToClipboard { text: String },
    ShowMessage(UserMessage),
    ScrollTo { index: usize },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Error,
}

/// Short message for a toast or a status line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMessage {
    pub text: String,
    pub kind: MessageKind,
    pub error_code: Option<String>,
    pub is_transient: bool,
    pub is_retryable: bool,
}

impl UserMessage {
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Info,
            error_code: None,
            is_transient: true,
            is_retryable: false,
        }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            is_transient: false,
            ..Self::info(text)
        }
    }
}

impl From<&AppError> for UserMessage {
    fn from(e: &AppError) -> Self {
        Self {
            text: e.user_facing_message(),
            kind: MessageKind::Error,
            error_code: Some(e.code().to_string()),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
        }
    }
}

pub const LINK_COPIED_MESSAGE: &str = "Link copied to the clipboard.";
pub const NO_PICKER_MESSAGE: &str = "No application available to pick an image.";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntryView {
    pub image_name: String,
    pub image_base_link: String,
    pub direct_link: String,
    pub upload_time_ms: u64,
    pub status: UploadStatus,
    pub status_message: String,
}

impl From<&HistoryEntryInfos> for HistoryEntryView {
    fn from(entry: &HistoryEntryInfos) -> Self {
        Self {
            image_name: entry.image_name.clone(),
            image_base_link: entry.image_base_link.clone(),
            direct_link: entry.direct_link(),
            upload_time_ms: entry.upload_time_ms.as_millis(),
            status: entry.upload_status,
            status_message: entry.upload_status_message.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewModel {
    pub entries: Vec<HistoryEntryView>,
    pub upload_status: Option<UploadStatusInfos>,
    pub is_uploading: bool,
    pub message: Option<UserMessage>,
}

pub struct App<S: HistoryStorage> {
    pipeline: UploadPipeline<S>,
    history: HistoryViewModel<S>,
    upload_status: Option<UploadStatusInfos>,
    message: Option<UserMessage>,
}

impl<S: HistoryStorage + 'static> App<S> {
    /// Fails when something else already consumes the history changes of
    /// `repository`.
    pub async fn new(
        repository: Arc<HistoryEntryRepository<S>>,
        uploader: Arc<dyn Uploader>,
        loader: Arc<dyn ImageLoader>,
    ) -> Result<Self, HistoryError> {
        let history = HistoryViewModel::new(Arc::clone(&repository)).await?;
        let pipeline = UploadPipeline::new(repository, uploader, loader);
        Ok(Self {
            pipeline,
            history,
            upload_status: None,
            message: None,
        })
    }

    /// Resolves when the history has changes the view has not seen; the
    /// shell answers with [`Event::HistoryChanged`]. Returns `false` once
    /// the history is gone.
    pub async fn history_changed(&mut self) -> bool {
        self.history.changed().await
    }

    #[must_use]
    pub fn pipeline(&self) -> &UploadPipeline<S> {
        &self.pipeline
    }

    #[must_use]
    pub fn history(&self) -> &HistoryViewModel<S> {
        &self.history
    }

    /// Handles the intent the app was opened with.
    pub async fn consume_intent(&mut self, intent: Intent) -> Vec<Effect> {
        self.update(Event::from(intent)).await
    }

    pub async fn update(&mut self, event: Event) -> Vec<Effect> {
        debug!(event = event.name(), user = event.is_user_initiated(), "update");

        match event {
            Event::Started => {
                self.history.apply_pending_changes().await;
                let mut effects = Vec::new();
                if let Some(last) = self.history.len().checked_sub(1) {
                    effects.push(Effect::ScrollTo { index: last });
                }
                effects.push(Effect::Render);
                effects
            }

            Event::ShareImage { image } | Event::ImagePicked { image } => self.start_upload(image),

            Event::PickImageRequested => vec![Effect::PickImage],

            Event::PickerUnavailable => {
                warn!("no image picker available");
                self.show(UserMessage::error(NO_PICKER_MESSAGE))
            }

            Event::HistoryEntryTapped { index } => self.copy_link(index),

            Event::DeleteHistoryEntry { index } => {
                // The row shown at `index` may have moved in the repository
                // since the last sync, so it is removed by key.
                let removed = match self.history.key(index) {
                    Some(key) => self.history.repository().remove_by_key(key).await,
                    None => Err(HistoryError::IndexOutOfRange {
                        index,
                        len: self.history.len(),
                    }),
                };
                match removed {
                    Ok(_) => self.sync_history_and_render().await,
                    Err(e) => self.show_error(&AppError::from(e)),
                }
            }

            Event::ClearHistory => {
                let cleared = self.history.repository().clear().await;
                match cleared {
                    Ok(_) => self.sync_history_and_render().await,
                    Err(e) => self.show_error(&AppError::from(e)),
                }
            }

            Event::HistoryChanged => self.sync_history_and_render().await,

            Event::UploadStatusChanged(status) => {
                self.upload_status = Some(status);
                let mut effects = self.sync_history().await;
                effects.push(Effect::Render);
                effects
            }

            Event::DismissMessage => {
                self.message = None;
                vec![Effect::Render]
            }
        }
    }

    #[must_use]
    pub fn view(&self) -> ViewModel {
        ViewModel {
            entries: self.history.entries().iter().map(HistoryEntryView::from).collect(),
            upload_status: self.upload_status.clone(),
            is_uploading: self.pipeline.is_uploading(),
            message: self.message.clone(),
        }
    }

    fn start_upload(&mut self, image: Option<ImageRef>) -> Vec<Effect> {
        match self.pipeline.start_upload(image) {
            Ok(_task) => {
                info!("upload started");
                self.upload_status = self.pipeline.status();
                vec![Effect::Render]
            }
            Err(e) => self.show_error(&AppError::from(e)),
        }
    }

    fn copy_link(&mut self, index: usize) -> Vec<Effect> {
        let direct_link = self
            .history
            .entry(index)
            .map(|entry| noelshack_to_direct_link(&entry.image_base_link));

        match direct_link {
            Some(link) if is_noelshack_image_link(&link) => {
                let mut effects = vec![Effect::CopyToClipboard { text: link }];
                effects.extend(self.show(UserMessage::info(LINK_COPIED_MESSAGE)));
                effects
            }
            _ => {
                let error = AppError::new(ErrorKind::InvalidLink, "entry has no image link")
                    .with_context("index", index.to_string());
                self.show_error(&error)
            }
        }
    }

    /// Drains the history queue into the mirror. A new row scrolls the list
    /// to the end.
    async fn sync_history(&mut self) -> Vec<Effect> {
        let updates = self.history.apply_pending_changes().await;
        let inserted = updates.iter().any(|u| matches!(u, ListUpdate::Inserted(_)));

        match self.history.len().checked_sub(1) {
            Some(last) if inserted => vec![Effect::ScrollTo { index: last }],
            _ => Vec::new(),
        }
    }

    async fn sync_history_and_render(&mut self) -> Vec<Effect> {
        let mut effects = self.sync_history().await;
        effects.push(Effect::Render);
        effects
    }

    fn show_error(&mut self, error: &AppError) -> Vec<Effect> {
        warn!(code = error.code(), error = %error, "showing error");
        self.show(UserMessage::from(error))
    }

    fn show(&mut self, message: UserMessage) -> Vec<Effect> {
        self.message = Some(message.clone());
        vec![Effect::ShowMessage(message), Effect::Render]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_to_event() {
        let image = ImageRef::new("/tmp/cat.png");
        assert_eq!(
            Event::from(Intent::Send {
                stream: Some(image.clone())
            }),
            Event::ShareImage { image: Some(image) }
        );
        assert_eq!(Event::from(Intent::PickImage), Event::PickImageRequested);
    }

    #[test]
    fn test_user_message_from_error() {
        let error = AppError::new(ErrorKind::UploadAlreadyRunning, "busy");
        let message = UserMessage::from(&error);
        assert_eq!(message.kind, MessageKind::Error);
        assert_eq!(message.error_code.as_deref(), Some("UPLOAD_ALREADY_RUNNING"));
        assert!(message.is_retryable);
    }

    #[test]
    fn test_entry_view_has_direct_link() {
        let infos = crate::model::UploadInfos::new(
            "https://www.noelshack.com/2019-14-1-1554135563-cat.png",
            "cat.png",
            crate::model::UnixTimeMs(3),
        );
        let view = HistoryEntryView::from(&HistoryEntryInfos::from(&infos));
        assert_eq!(
            view.direct_link,
            "https://image.noelshack.com/fichiers/2019/14/1/1554135563-cat.png"
        );
        assert_eq!(view.status, UploadStatus::Finished);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(Event::HistoryEntryTapped { index: 2 }).unwrap();
        assert_eq!(json["type"], "history_entry_tapped");
        assert_eq!(json["index"], 2);
    }
}
