//! Object storage for uploaded files
//!
//! Event posters live in an S3-compatible bucket (MinIO in development) and
//! are handed out to clients as presigned GET URLs.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use s3::creds::Credentials;
use s3::{Bucket, BucketConfiguration, Region};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{AppError, StorageError};

pub const ALLOWED_POSTER_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Creates the bucket when it does not exist yet.
    async fn ensure_bucket(&self) -> Result<(), AppError>;

    /// Stores `bytes` under a fresh name and returns that name.
    async fn upload(
        &self,
        folder: &str,
        original_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError>;

    async fn delete(&self, folder: &str, filename: &str) -> Result<(), AppError>;

    fn presigned_url(&self, folder: &str, filename: &str, expiry_seconds: u32) -> Result<String, AppError>;
}

/// Lowercased extension including the dot, e.g. `.png`.
pub fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_lowercase()))
}

pub fn is_allowed_poster(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| ALLOWED_POSTER_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// `{uuid}{ext}` so uploads never collide or leak client file names.
pub fn stored_filename(original_name: &str) -> String {
    let ext = file_extension(original_name).unwrap_or_default();
    format!("{}{}", Uuid::new_v4(), ext)
}

pub fn object_path(folder: &str, filename: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", folder, filename)
    }
}

/// [`ObjectStorage`] over MinIO/S3 using path-style addressing.
pub struct MinioStorage {
    bucket: Bucket,
    bucket_name: String,
    region: Region,
    credentials: Credentials,
}

impl MinioStorage {
    pub fn new(config: &StorageConfig) -> Result<Self, AppError> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Bucket(e.to_string()))?;

        let bucket = Bucket::new(&config.bucket, region.clone(), credentials.clone())
            .map_err(|e| StorageError::Bucket(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            bucket_name: config.bucket.clone(),
            region,
            credentials,
        })
    }
}

#[async_trait]
impl ObjectStorage for MinioStorage {
    async fn ensure_bucket(&self) -> Result<(), AppError> {
        let exists = self
            .bucket
            .exists()
            .await
            .map_err(|e| StorageError::Bucket(e.to_string()))?;
        if exists {
            return Ok(());
        }

        Bucket::create_with_path_style(
            &self.bucket_name,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await
        .map_err(|e| StorageError::Bucket(e.to_string()))?;

        info!("Created storage bucket {}", self.bucket_name);
        Ok(())
    }

    async fn upload(
        &self,
        folder: &str,
        original_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError> {
        let filename = stored_filename(original_name);
        let path = object_path(folder, &filename);

        self.bucket
            .put_object_with_content_type(&path, &bytes, content_type)
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        info!("Uploaded {} ({} bytes) as {}", original_name, bytes.len(), path);
        Ok(filename)
    }

    async fn delete(&self, folder: &str, filename: &str) -> Result<(), AppError> {
        let path = object_path(folder, filename);
        self.bucket
            .delete_object(&path)
            .await
            .map_err(|e| StorageError::Delete(e.to_string()))?;

        info!("Deleted object {}", path);
        Ok(())
    }

    fn presigned_url(&self, folder: &str, filename: &str, expiry_seconds: u32) -> Result<String, AppError> {
        let path = object_path(folder, filename);
        self.bucket
            .presign_get(&path, expiry_seconds, None)
            .map_err(|e| {
                warn!("Failed to presign {}: {}", path, e);
                StorageError::Presign(e.to_string()).into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StorageConfig {
        StorageConfig {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            bucket: "dicoevent".to_string(),
            poster_folder: "event-posters".to_string(),
            presign_expiry_seconds: 3600,
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("poster.PNG").as_deref(), Some(".png"));
        assert_eq!(file_extension("my.event.poster.jpeg").as_deref(), Some(".jpeg"));
        assert_eq!(file_extension("poster"), None);
        assert_eq!(file_extension(".bashrc"), None);
        assert_eq!(file_extension("poster."), None);
    }

    #[test]
    fn test_allowed_posters() {
        for name in ["a.jpg", "a.JPEG", "a.png", "a.gif", "a.webp"] {
            assert!(is_allowed_poster(name), "{} should be accepted", name);
        }
        for name in ["a.pdf", "a.svg", "a", "a.png.exe"] {
            assert!(!is_allowed_poster(name), "{} should be rejected", name);
        }
    }

    #[test]
    fn test_stored_filename_keeps_extension_only() {
        let name = stored_filename("Summer Fest.PNG");
        assert!(name.ends_with(".png"));
        let stem = name.trim_end_matches(".png");
        assert!(Uuid::parse_str(stem).is_ok());
    }

    #[test]
    fn test_object_path() {
        assert_eq!(object_path("event-posters", "a.png"), "event-posters/a.png");
        assert_eq!(object_path("/event-posters/", "a.png"), "event-posters/a.png");
        assert_eq!(object_path("", "a.png"), "a.png");
    }

    #[test]
    fn test_presigned_url_is_path_style() {
        let storage = MinioStorage::new(&config()).unwrap();
        let url = storage.presigned_url("event-posters", "a.png", 600).unwrap();
        assert!(url.starts_with("http://localhost:9000/dicoevent/event-posters/a.png?"));
        assert!(url.contains("X-Amz-Expires=600"));
    }
}
