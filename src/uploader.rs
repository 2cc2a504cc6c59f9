//! Upload sequencing with per-session memoization.
//!
//! Each local file is signed and PUT at most once per session; repeated
//! operations against the same file (auto-detect followed by submission,
//! or a resubmission after a failure) reuse the cached storage reference.

use crate::transport::{ControlPlane, TransportError, UploadTarget};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A local video selected by the user, held in memory for upload
#[derive(Debug, Clone)]
pub struct VideoFile {
    /// Stable identity of the file within the session; the upload cache key
    source: String,
    /// Name sent to the signing endpoint
    filename: String,
    content_type: String,
    data: Bytes,
}

impl VideoFile {
    /// Read a video from disk. The content type is guessed from the
    /// extension, defaulting to `video/mp4`.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        Ok(Self {
            source: path.to_string_lossy().into_owned(),
            filename,
            content_type: content_type_for(path),
            data: Bytes::from(data),
        })
    }

    /// Build a video from in-memory bytes, keyed by its name
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            filename: name,
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Content type for a video file extension
fn content_type_for(path: &Path) -> String {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "video/mp4",
    }
    .to_string()
}

/// Uploads local files to remote storage, one sign + one PUT per distinct
/// file per session
pub struct UploadSequencer {
    client: Arc<dyn ControlPlane>,
    cache: RwLock<HashMap<String, UploadTarget>>,
}

impl UploadSequencer {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Return the storage reference for a file, uploading it first if this
    /// session has not done so yet. Sign and PUT are strictly sequential:
    /// the PUT cannot start before the signed URL is known.
    #[instrument(skip(self, file), fields(source = %file.source()))]
    pub async fn ensure_uploaded(&self, file: &VideoFile) -> Result<UploadTarget, TransportError> {
        if let Some(target) = self.cache.read().get(file.source()).cloned() {
            debug!(bucket = %target.bucket, key = %target.key, "Reusing uploaded file");
            metrics::counter!("lapcompare.uploads.cache_hits").increment(1);
            return Ok(target);
        }

        let signed = self
            .client
            .sign_upload(file.filename(), file.content_type())
            .await?;

        self.client
            .put_to_storage(&signed.put_url, file.data.clone(), file.content_type())
            .await?;

        let target = signed.target();
        self.cache
            .write()
            .insert(file.source().to_string(), target.clone());

        metrics::counter!("lapcompare.uploads.completed").increment(1);
        metrics::counter!("lapcompare.uploads.bytes").increment(file.len() as u64);
        info!(
            bucket = %target.bucket,
            key = %target.key,
            size_bytes = file.len(),
            "File uploaded"
        );

        Ok(target)
    }

    /// Drop all cached references, e.g. when the form session ends
    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockControlPlane, SignedUpload};
    use mockall::predicate::eq;

    fn signed(key: &str) -> SignedUpload {
        SignedUpload {
            bucket: "b".to_string(),
            key: key.to_string(),
            put_url: format!("https://storage.example.com/put/{key}"),
            get_url: format!("https://storage.example.com/get/{key}"),
        }
    }

    #[test]
    fn test_content_type_for_extensions() {
        assert_eq!(content_type_for(Path::new("lap.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("lap.MOV")), "video/quicktime");
        assert_eq!(content_type_for(Path::new("lap.mkv")), "video/x-matroska");
        assert_eq!(content_type_for(Path::new("lap.webm")), "video/webm");
        assert_eq!(content_type_for(Path::new("lap")), "video/mp4");
        assert_eq!(content_type_for(Path::new("lap.bin")), "video/mp4");
    }

    #[tokio::test]
    async fn test_second_call_reuses_cached_target() {
        let mut client = MockControlPlane::new();
        client
            .expect_sign_upload()
            .with(eq("lap.mp4"), eq("video/mp4"))
            .times(1)
            .returning(|_, _| Ok(signed("uploads/1_lap.mp4")));
        client
            .expect_put_to_storage()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let uploads = UploadSequencer::new(Arc::new(client));
        let file = VideoFile::from_bytes("lap.mp4", "video/mp4", vec![1u8, 2, 3]);

        let first = uploads.ensure_uploaded(&file).await.unwrap();
        let second = uploads.ensure_uploaded(&file).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.key, "uploads/1_lap.mp4");
    }

    #[tokio::test]
    async fn test_put_failure_is_not_cached() {
        let mut client = MockControlPlane::new();
        client
            .expect_sign_upload()
            .times(2)
            .returning(|_, _| Ok(signed("uploads/2_lap.mp4")));

        let mut put_calls = 0;
        client
            .expect_put_to_storage()
            .times(2)
            .returning(move |_, _, _| {
                put_calls += 1;
                if put_calls == 1 {
                    Err(TransportError::Upload { status: 503 })
                } else {
                    Ok(())
                }
            });

        let uploads = UploadSequencer::new(Arc::new(client));
        let file = VideoFile::from_bytes("lap.mp4", "video/mp4", vec![0u8; 16]);

        let error = uploads.ensure_uploaded(&file).await.unwrap_err();
        assert!(matches!(error, TransportError::Upload { status: 503 }));

        // Failed upload left no cache entry, so the retry goes to the network
        let target = uploads.ensure_uploaded(&file).await.unwrap();
        assert_eq!(target.key, "uploads/2_lap.mp4");
    }

    #[tokio::test]
    async fn test_distinct_files_upload_independently() {
        let mut client = MockControlPlane::new();
        client
            .expect_sign_upload()
            .with(eq("a.mp4"), eq("video/mp4"))
            .times(1)
            .returning(|_, _| Ok(signed("uploads/a.mp4")));
        client
            .expect_sign_upload()
            .with(eq("b.mp4"), eq("video/mp4"))
            .times(1)
            .returning(|_, _| Ok(signed("uploads/b.mp4")));
        client
            .expect_put_to_storage()
            .times(2)
            .returning(|_, _, _| Ok(()));

        let uploads = UploadSequencer::new(Arc::new(client));
        let file_a = VideoFile::from_bytes("a.mp4", "video/mp4", vec![1u8]);
        let file_b = VideoFile::from_bytes("b.mp4", "video/mp4", vec![2u8]);

        let (target_a, target_b) = tokio::try_join!(
            uploads.ensure_uploaded(&file_a),
            uploads.ensure_uploaded(&file_b)
        )
        .unwrap();

        assert_eq!(target_a.key, "uploads/a.mp4");
        assert_eq!(target_b.key, "uploads/b.mp4");
    }

    #[tokio::test]
    async fn test_clear_forgets_uploads() {
        let mut client = MockControlPlane::new();
        client
            .expect_sign_upload()
            .times(2)
            .returning(|_, _| Ok(signed("uploads/3_lap.mp4")));
        client
            .expect_put_to_storage()
            .times(2)
            .returning(|_, _, _| Ok(()));

        let uploads = UploadSequencer::new(Arc::new(client));
        let file = VideoFile::from_bytes("lap.mp4", "video/mp4", vec![9u8]);

        uploads.ensure_uploaded(&file).await.unwrap();
        uploads.clear();
        uploads.ensure_uploaded(&file).await.unwrap();
    }
}
