use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::classifier::extension_of;

const UPLOAD_PREFIX: &str = "upload";
const DERIVED_PREFIX: &str = "derived";

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upload exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// A file in the upload directory that is removed when the guard is dropped.
#[derive(Debug)]
pub struct StoredFile {
    path: PathBuf,
}

impl StoredFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoredFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed transient file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// An upload owned by exactly one request. Dropping it deletes the stored copy.
#[derive(Debug)]
pub struct UploadedAsset {
    file: StoredFile,
    bytes: Arc<Vec<u8>>,
    filename: String,
    content_type: Option<String>,
    extension: String,
    digest: String,
}

impl UploadedAsset {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A cheap handle on the upload's bytes for work moved off the request task.
    pub fn shared_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.bytes)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
    max_bytes: usize,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Result<Self, AssetError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, max_bytes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn calculate_digest(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    pub fn validate_size(&self, len: usize) -> Result<(), AssetError> {
        if len > self.max_bytes {
            return Err(AssetError::TooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    pub async fn persist(
        &self,
        request_id: Uuid,
        filename: &str,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<UploadedAsset, AssetError> {
        self.validate_size(bytes.len())?;

        let safe_name = sanitize_filename(filename);
        let file = self.staged(request_id, UPLOAD_PREFIX, &safe_name);
        tokio::fs::write(file.path(), &bytes).await?;

        Ok(UploadedAsset {
            file,
            digest: Self::calculate_digest(&bytes),
            extension: extension_of(&safe_name),
            filename: safe_name,
            content_type,
            bytes: Arc::new(bytes),
        })
    }

    /// Path for a file derived from a request's upload, such as extracted audio.
    /// Nothing is written; the guard removes whatever ends up at the path.
    /// Derived names live under their own prefix so they never alias the upload.
    pub fn reserve(&self, request_id: Uuid, name: &str) -> StoredFile {
        self.staged(request_id, DERIVED_PREFIX, &sanitize_filename(name))
    }

    fn staged(&self, request_id: Uuid, prefix: &str, name: &str) -> StoredFile {
        StoredFile {
            path: self.root.join(format!("{}-{}-{}", request_id, prefix, name)),
        }
    }
}

/// Reduces a client-supplied filename to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(r"C:\clips\my clip.mp4"), "my_clip.mp4");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".env"), "env");
        assert_eq!(sanitize_filename("face-01_final.PNG"), "face-01_final.PNG");
    }

    #[test]
    fn digest_is_stable_sha256() {
        assert_eq!(
            AssetStore::calculate_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[actix_web::test]
    async fn persisted_asset_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path().join("uploads"), 1024).unwrap();
        let id = Uuid::new_v4();

        let asset = store
            .persist(id, "../Clip.MP4", Some("video/mp4".into()), vec![1, 2, 3])
            .await
            .unwrap();
        let path = asset.path().to_path_buf();

        assert!(path.starts_with(store.root()));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}-upload-Clip.MP4", id)
        );
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        assert_eq!(asset.extension(), ".mp4");
        assert_eq!(asset.content_type(), Some("video/mp4"));

        drop(asset);
        assert!(!path.exists());
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path(), 2).unwrap();

        let err = store
            .persist(Uuid::new_v4(), "a.wav", None, vec![0; 3])
            .await
            .unwrap_err();

        assert!(matches!(err, AssetError::TooLarge { limit: 2 }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn reserved_path_is_cleaned_up_if_populated() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path(), 16).unwrap();

        let reserved = store.reserve(Uuid::new_v4(), "audio.wav");
        let path = reserved.path().to_path_buf();
        std::fs::write(&path, b"pcm").unwrap();

        drop(reserved);
        assert!(!path.exists());

        // Dropping a guard whose file was never written is silent.
        drop(store.reserve(Uuid::new_v4(), "never.wav"));
    }

    #[actix_web::test]
    async fn derived_file_never_aliases_same_named_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path(), 16).unwrap();
        let id = Uuid::new_v4();

        let upload = store
            .persist(id, "audio.wav", Some("video/mp4".into()), vec![7; 4])
            .await
            .unwrap();
        let derived = store.reserve(id, "audio.wav");

        assert_ne!(upload.path(), derived.path());
        std::fs::write(derived.path(), b"pcm").unwrap();
        assert_eq!(std::fs::read(upload.path()).unwrap(), vec![7; 4]);
    }
}
