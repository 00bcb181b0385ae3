use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::{ImageLoader, UploadError, Uploader};
use crate::history::HistoryEntryRepository;
use crate::model::{ImageRef, UnixTimeMs, UploadInfos, UploadStatus, UploadStatusInfos};
use crate::storage::HistoryStorage;

struct Inner<S: HistoryStorage> {
    repository: Arc<HistoryEntryRepository<S>>,
    uploader: Arc<dyn Uploader>,
    loader: Arc<dyn ImageLoader>,
    uploading: AtomicBool,
    status: watch::Sender<Option<UploadStatusInfos>>,
}

/// Holds the in-flight slot for one upload. Releasing it frees the slot
/// before the final status goes out, so a status observer can start the next
/// upload right away. If the task dies first, dropping it frees the slot and
/// reports an error.
struct InFlight<S: HistoryStorage> {
    inner: Arc<Inner<S>>,
    armed: bool,
}

impl<S: HistoryStorage> InFlight<S> {
    fn release(mut self, status: UploadStatusInfos) {
        self.armed = false;
        self.inner.uploading.store(false, Ordering::Release);
        self.inner.status.send_replace(Some(status));
    }
}

impl<S: HistoryStorage> Drop for InFlight<S> {
    fn drop(&mut self) {
        if self.armed {
            error!("upload task ended without reporting a result");
            self.inner.uploading.store(false, Ordering::Release);
            self.inner.status.send_replace(Some(UploadStatusInfos::new(
                UploadStatus::Error,
                UploadError::Task("aborted".to_string()).status_message(),
            )));
        }
    }
}

/// Runs one upload at a time: load the image, send it, record the result in
/// the history. Cheap to clone; clones share the same state.
pub struct UploadPipeline<S: HistoryStorage> {
    inner: Arc<Inner<S>>,
}

impl<S: HistoryStorage> Clone for UploadPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: HistoryStorage + 'static> UploadPipeline<S> {
    pub fn new(
        repository: Arc<HistoryEntryRepository<S>>,
        uploader: Arc<dyn Uploader>,
        loader: Arc<dyn ImageLoader>,
    ) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                repository,
                uploader,
                loader,
                uploading: AtomicBool::new(false),
                status,
            }),
        }
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<HistoryEntryRepository<S>> {
        &self.inner.repository
    }

    #[must_use]
    pub fn is_uploading(&self) -> bool {
        self.inner.uploading.load(Ordering::Acquire)
    }

    /// Status of the current or last upload, `None` before the first one.
    #[must_use]
    pub fn status(&self) -> Option<UploadStatusInfos> {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Option<UploadStatusInfos>> {
        self.inner.status.subscribe()
    }

    /// Starts uploading `image` on a background task.
    ///
    /// Without an image, or while another upload runs, this fails right away
    /// and nothing changes. Otherwise the UPLOADING status is already
    /// published when this returns. Must be called inside a tokio runtime.
    pub fn start_upload(
        &self,
        image: Option<ImageRef>,
    ) -> Result<JoinHandle<Result<UploadInfos, UploadError>>, UploadError> {
        let image = image.ok_or_else(|| UploadError::InvalidFile("no image selected".to_string()))?;

        if self
            .inner
            .uploading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("upload refused, another one is running");
            return Err(UploadError::AlreadyRunning);
        }

        let slot = InFlight {
            inner: Arc::clone(&self.inner),
            armed: true,
        };
        self.inner
            .status
            .send_replace(Some(UploadStatusInfos::new(UploadStatus::Uploading, "")));

        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move {
            let result = inner.run(image).await;
            let status = match &result {
                Ok(infos) => UploadStatusInfos::new(UploadStatus::Finished, infos.image_base_link.clone()),
                Err(e) => UploadStatusInfos::new(UploadStatus::Error, e.status_message()),
            };
            slot.release(status);
            result
        }))
    }
}

impl<S: HistoryStorage> Inner<S> {
    #[instrument(skip(self, image), fields(name = %image.display_name()))]
    async fn run(&self, image: ImageRef) -> Result<UploadInfos, UploadError> {
        let name = image.display_name();
        let key = self.repository.begin_upload(&name).await;

        let outcome = match self.transfer(&image).await {
            Ok(link) => self
                .repository
                .finish_upload(key, UploadInfos::new(link, name, UnixTimeMs::now()))
                .await
                .map_err(UploadError::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(stored) => {
                info!(link = %stored.image_base_link, "upload finished");
                Ok(stored)
            }
            Err(e) => {
                warn!(error = %e, "upload failed");
                self.repository.fail_upload(key, &e.status_message()).await;
                Err(e)
            }
        }
    }

    async fn transfer(&self, image: &ImageRef) -> Result<String, UploadError> {
        let data = self.loader.load(image).await?;
        self.uploader.upload(&data).await
    }
}
