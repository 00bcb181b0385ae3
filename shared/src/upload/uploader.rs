use super::{ImageData, UploadError};

/// Sends one image to the host and returns its base link.
#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, image: &ImageData) -> Result<String, UploadError>;
}

#[cfg(feature = "http")]
pub use self::http::HttpUploader;

#[cfg(feature = "http")]
mod http {
    use reqwest::multipart::{Form, Part};
    use reqwest::Client;
    use tracing::{info, instrument, warn};

    use super::Uploader;
    use crate::config::AppConfig;
    use crate::links::parse_upload_response;
    use crate::upload::{ImageData, UploadError};
    use crate::{truncate_message, MAX_STATUS_MESSAGE_LENGTH, UPLOAD_FORM_FIELD};

    /// Multipart uploader for the NoelShack webservice.
    #[derive(Debug, Clone)]
    pub struct HttpUploader {
        client: Client,
        endpoint: String,
    }

    impl HttpUploader {
        pub fn new(config: &AppConfig) -> Result<Self, UploadError> {
            let client = Client::builder()
                .timeout(config.upload_timeout())
                .user_agent(config.user_agent.clone())
                .build()
                .map_err(|e| UploadError::Network(e.to_string()))?;

            Ok(Self {
                client,
                endpoint: config.upload_url.clone(),
            })
        }

        #[must_use]
        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }

    fn transport_error(e: &reqwest::Error) -> UploadError {
        if e.is_timeout() {
            UploadError::Timeout
        } else {
            UploadError::Network(e.to_string())
        }
    }

    #[async_trait::async_trait]
    impl Uploader for HttpUploader {
        #[instrument(skip(self, image), fields(name = %image.name, len = image.bytes.len()))]
        async fn upload(&self, image: &ImageData) -> Result<String, UploadError> {
            let part = Part::bytes(image.bytes.to_vec())
                .file_name(image.name.clone())
                .mime_str(image.mime_type)
                .map_err(|e| UploadError::InvalidFile(e.to_string()))?;
            let form = Form::new().part(UPLOAD_FORM_FIELD, part);

            let response = self
                .client
                .post(&self.endpoint)
                .multipart(form)
                .send()
                .await
                .map_err(|e| transport_error(&e))?;

            let status = response.status();
            let body = response.text().await.map_err(|e| transport_error(&e))?;

            if !status.is_success() {
                warn!(status = status.as_u16(), "upload refused");
                return Err(UploadError::Server {
                    status: status.as_u16(),
                    body: Some(truncate_message(&body, MAX_STATUS_MESSAGE_LENGTH)),
                });
            }

            let link = parse_upload_response(&body)?;
            info!(link = %link, "image uploaded");
            Ok(link)
        }
    }

}
