use bytes::Bytes;
use image::ImageFormat;
use std::path::PathBuf;
use tracing::debug;

use super::UploadError;
use crate::model::ImageRef;
use crate::MAX_IMAGE_BYTES;

/// Image content ready to be sent.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub name: String,
    pub mime_type: &'static str,
    pub bytes: Bytes,
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageData {
    /// Checks size and sniffs the format from the magic bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: Bytes, max_bytes: usize) -> Result<Self, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::InvalidFile("file is empty".to_string()));
        }
        if bytes.len() > max_bytes {
            return Err(UploadError::ImageTooLarge {
                size: bytes.len() as u64,
                max: max_bytes,
            });
        }

        let format = image::guess_format(&bytes).map_err(|_| UploadError::UnsupportedFormat)?;
        let mime_type = supported_mime_type(format).ok_or(UploadError::UnsupportedFormat)?;

        Ok(Self {
            name: name.into(),
            mime_type,
            bytes,
        })
    }
}

fn supported_mime_type(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP | ImageFormat::Bmp => {
            Some(format.to_mime_type())
        }
        _ => None,
    }
}

/// Turns an [`ImageRef`] into bytes. Shells with content providers (Android
/// `content://` URIs, iOS photo assets) plug in their own loader.
#[async_trait::async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, image: &ImageRef) -> Result<ImageData, UploadError>;
}

/// Reads plain paths and `file://` URIs from the local filesystem.
#[derive(Debug, Clone)]
pub struct FsImageLoader {
    max_bytes: usize,
}

impl Default for FsImageLoader {
    fn default() -> Self {
        Self::new(MAX_IMAGE_BYTES)
    }
}

impl FsImageLoader {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    fn path_of(image: &ImageRef) -> Result<PathBuf, UploadError> {
        let uri = image.uri.trim();
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        if path.is_empty() {
            return Err(UploadError::InvalidFile("empty image reference".to_string()));
        }
        if path.contains("://") {
            return Err(UploadError::InvalidFile("only local files can be read".to_string()));
        }
        Ok(PathBuf::from(path))
    }
}

#[async_trait::async_trait]
impl ImageLoader for FsImageLoader {
    async fn load(&self, image: &ImageRef) -> Result<ImageData, UploadError> {
        let path = Self::path_of(image)?;

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(UploadError::InvalidFile("not a regular file".to_string()));
        }
        if metadata.len() > self.max_bytes as u64 {
            return Err(UploadError::ImageTooLarge {
                size: metadata.len(),
                max: self.max_bytes,
            });
        }

        let bytes = tokio::fs::read(&path).await?;
        let data = ImageData::from_bytes(image.display_name(), Bytes::from(bytes), self.max_bytes)?;
        debug!(name = %data.name, mime = data.mime_type, len = data.bytes.len(), "image loaded");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_sniffs_png() {
        let data = ImageData::from_bytes("a.png", Bytes::from_static(PNG_MAGIC), 1024).unwrap();
        assert_eq!(data.mime_type, "image/png");
    }

    #[test]
    fn test_rejects_unknown_bytes() {
        let err = ImageData::from_bytes("a.txt", Bytes::from_static(b"hello world"), 1024).unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedFormat));
    }

    #[test]
    fn test_rejects_empty_and_large() {
        assert!(matches!(
            ImageData::from_bytes("a.png", Bytes::new(), 1024),
            Err(UploadError::InvalidFile(_))
        ));
        assert!(matches!(
            ImageData::from_bytes("a.png", Bytes::from_static(PNG_MAGIC), 4),
            Err(UploadError::ImageTooLarge { max: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_fs_loader_reads_path_and_file_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "cat.png", PNG_MAGIC);
        let loader = FsImageLoader::default();

        let data = loader.load(&ImageRef::new(path.clone())).await.unwrap();
        assert_eq!(data.name, "cat.png");
        assert_eq!(data.bytes.as_ref(), PNG_MAGIC);

        let data = loader.load(&ImageRef::new(format!("file://{path}"))).await.unwrap();
        assert_eq!(data.name, "cat.png");
    }

    #[tokio::test]
    async fn test_fs_loader_errors() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsImageLoader::new(8);

        let missing = dir.path().join("missing.png").to_string_lossy().into_owned();
        assert!(matches!(loader.load(&ImageRef::new(missing)).await, Err(UploadError::Io(_))));

        let big = write_file(&dir, "big.png", PNG_MAGIC);
        assert!(matches!(
            loader.load(&ImageRef::new(big)).await,
            Err(UploadError::ImageTooLarge { .. })
        ));

        assert!(matches!(
            loader.load(&ImageRef::new("https://example.com/a.png")).await,
            Err(UploadError::InvalidFile(_))
        ));

        let folder = dir.path().to_string_lossy().into_owned();
        assert!(matches!(
            FsImageLoader::default().load(&ImageRef::new(folder)).await,
            Err(UploadError::InvalidFile(_))
        ));
    }
}
