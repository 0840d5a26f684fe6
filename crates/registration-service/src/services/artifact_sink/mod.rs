//! Artifact sinks: where relocated files and spreadsheet rows are stored.
//!
//! The relocator and the sheet-sync job only talk to the `ArtifactSink`
//! trait. Which implementation backs it is chosen by configuration:
//!
//! - `google` - Google Drive folders and Google Sheets rows
//! - `local` - a directory tree and CSV files, for development

pub mod google;
pub mod local;

pub use google::GoogleWorkspaceSink;
pub use local::LocalArtifactSink;

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Storage / spreadsheet error.
#[derive(Debug, Error, Clone)]
pub enum SinkError {
    /// Network failure or 5xx from the hosting service.
    #[error("Storage service unavailable: {0}")]
    Unavailable(String),

    /// The hosting service rejected the request (4xx).
    #[error("Storage request rejected: {0}")]
    Rejected(String),

    /// The target (usually a cached folder) no longer exists upstream.
    #[error("Storage resource not found: {0}")]
    NotFound(String),

    #[error("Invalid storage response: {0}")]
    InvalidResponse(String),

    #[error("Storage I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SinkError::NotFound(err.to_string()),
            _ => SinkError::Io(err.to_string()),
        }
    }
}

/// A stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_id: String,
    /// Link anyone can open.
    pub link: String,
}

/// Permanent storage for artifacts and the registration spreadsheet.
#[async_trait::async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Folder that holds one subfolder per event.
    fn root_folder(&self) -> &str;

    /// Find a folder by `(parent, name)`, creating it when absent.
    ///
    /// Concurrent calls for the same pair return the same folder.
    async fn find_or_create_folder(&self, parent_id: &str, name: &str)
        -> Result<String, SinkError>;

    /// Drop the cached id of `(parent, name)` so the next lookup asks upstream.
    async fn forget_folder(&self, parent_id: &str, name: &str);

    /// Store a file and make it readable through a shareable link.
    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<StoredFile, SinkError>;

    async fn delete_file(&self, file_id: &str) -> Result<(), SinkError>;

    /// Append one row to `sheet`, creating the sheet with `header` first if needed.
    async fn append_row(
        &self,
        sheet: &str,
        header: &[&str],
        row: &[String],
    ) -> Result<(), SinkError>;
}

/// In-process lookup-or-create cache keyed by `(parent, name)`.
///
/// The first caller for a key runs the lookup-or-create; callers arriving
/// while it runs wait on the per-key lock and then read its result. Used
/// for folders and for sheets (with the spreadsheet id as parent).
#[derive(Default)]
pub struct FolderRegistry {
    resolved: RwLock<HashMap<(String, String), String>>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached id for `(parent_id, name)` or run `create` once to obtain it.
    pub async fn resolve<F, Fut>(
        &self,
        parent_id: &str,
        name: &str,
        create: F,
    ) -> Result<String, SinkError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, SinkError>>,
    {
        let key = (parent_id.to_string(), name.to_string());

        if let Some(id) = self.resolved.read().await.get(&key) {
            return Ok(id.clone());
        }

        let key_lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _guard = key_lock.lock().await;

        // Another caller may have finished while we waited
        if let Some(id) = self.resolved.read().await.get(&key) {
            return Ok(id.clone());
        }

        let id = create().await?;
        self.resolved.write().await.insert(key, id.clone());
        Ok(id)
    }

    /// Drop a cached entry, e.g. after the folder was found missing upstream.
    pub async fn forget(&self, parent_id: &str, name: &str) {
        self.resolved
            .write()
            .await
            .remove(&(parent_id.to_string(), name.to_string()));
    }
}

/// Mock sink for testing.
///
/// This module provides a mock implementation of the artifact sink for use in tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// File recorded by the mock.
    #[derive(Debug, Clone)]
    pub struct MockUpload {
        pub folder_id: String,
        pub name: String,
        pub content_type: String,
        pub size: usize,
        pub file_id: String,
    }

    /// Folder recorded by the mock.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockFolder {
        pub id: String,
        pub parent_id: String,
        pub name: String,
    }

    /// Mock artifact sink for unit testing.
    pub struct MockArtifactSink {
        root: String,
        registry: FolderRegistry,
        /// Simulated latency of folder creation, widens race windows.
        create_delay: Duration,
        /// Uploads whose name contains this fragment fail.
        fail_upload_matching: Option<String>,
        failing_appends: AtomicUsize,
        folders: std::sync::Mutex<Vec<MockFolder>>,
        uploads: std::sync::Mutex<Vec<MockUpload>>,
        deleted: std::sync::Mutex<Vec<String>>,
        rows: std::sync::Mutex<Vec<(String, Vec<String>)>>,
        next_id: AtomicUsize,
        append_calls: AtomicUsize,
    }

    impl MockArtifactSink {
        /// Create a mock where every operation succeeds.
        pub fn accepting() -> Self {
            Self {
                root: "root".to_string(),
                registry: FolderRegistry::new(),
                create_delay: Duration::ZERO,
                fail_upload_matching: None,
                failing_appends: AtomicUsize::new(0),
                folders: std::sync::Mutex::new(Vec::new()),
                uploads: std::sync::Mutex::new(Vec::new()),
                deleted: std::sync::Mutex::new(Vec::new()),
                rows: std::sync::Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(1),
                append_calls: AtomicUsize::new(0),
            }
        }

        /// Create a mock whose uploads fail when the file name contains `fragment`.
        pub fn failing_uploads(fragment: &str) -> Self {
            Self {
                fail_upload_matching: Some(fragment.to_string()),
                ..Self::accepting()
            }
        }

        pub fn with_create_delay(mut self, delay: Duration) -> Self {
            self.create_delay = delay;
            self
        }

        /// Fail the next `count` row appends.
        pub fn fail_next_appends(&self, count: usize) {
            self.failing_appends.store(count, Ordering::SeqCst);
        }

        pub fn folders(&self) -> Vec<MockFolder> {
            self.folders.lock().map(|f| f.clone()).unwrap_or_default()
        }

        pub fn uploads(&self) -> Vec<MockUpload> {
            self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
        }

        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
        }

        pub fn rows(&self) -> Vec<(String, Vec<String>)> {
            self.rows.lock().map(|r| r.clone()).unwrap_or_default()
        }

        /// Number of append attempts, failed ones included.
        pub fn append_calls(&self) -> usize {
            self.append_calls.load(Ordering::SeqCst)
        }

        /// Delete a folder and everything below it, bypassing the registry.
        pub fn remove_folder(&self, folder_id: &str) {
            if let Ok(mut folders) = self.folders.lock() {
                let mut doomed = vec![folder_id.to_string()];
                while let Some(id) = doomed.pop() {
                    doomed.extend(
                        folders
                            .iter()
                            .filter(|f| f.parent_id == id)
                            .map(|f| f.id.clone()),
                    );
                    folders.retain(|f| f.id != id);
                }
            }
        }

        fn has_folder(&self, folder_id: &str) -> bool {
            folder_id == self.root
                || self
                    .folders
                    .lock()
                    .map(|folders| folders.iter().any(|f| f.id == folder_id))
                    .unwrap_or(false)
        }

        /// Id of the folder `name` below `parent_id`, if created.
        pub fn folder_id(&self, parent_id: &str, name: &str) -> Option<String> {
            self.folders()
                .into_iter()
                .find(|f| f.parent_id == parent_id && f.name == name)
                .map(|f| f.id)
        }

        fn next_id(&self, prefix: &str) -> String {
            format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[async_trait::async_trait]
    impl ArtifactSink for MockArtifactSink {
        fn root_folder(&self) -> &str {
            &self.root
        }

        async fn find_or_create_folder(
            &self,
            parent_id: &str,
            name: &str,
        ) -> Result<String, SinkError> {
            self.registry
                .resolve(parent_id, name, || async {
                    if !self.create_delay.is_zero() {
                        tokio::time::sleep(self.create_delay).await;
                    }
                    if let Some(id) = self.folder_id(parent_id, name) {
                        return Ok(id);
                    }
                    let id = self.next_id("folder");
                    if let Ok(mut folders) = self.folders.lock() {
                        folders.push(MockFolder {
                            id: id.clone(),
                            parent_id: parent_id.to_string(),
                            name: name.to_string(),
                        });
                    }
                    Ok(id)
                })
                .await
        }

        async fn forget_folder(&self, parent_id: &str, name: &str) {
            self.registry.forget(parent_id, name).await;
        }

        async fn upload_file(
            &self,
            folder_id: &str,
            name: &str,
            content_type: &str,
            bytes: Bytes,
        ) -> Result<StoredFile, SinkError> {
            if let Some(fragment) = &self.fail_upload_matching {
                if name.contains(fragment.as_str()) {
                    return Err(SinkError::Unavailable(format!("upload of {name} failed")));
                }
            }

            if !self.has_folder(folder_id) {
                return Err(SinkError::NotFound(format!("folder {folder_id}")));
            }

            let file_id = self.next_id("file");
            if let Ok(mut uploads) = self.uploads.lock() {
                uploads.push(MockUpload {
                    folder_id: folder_id.to_string(),
                    name: name.to_string(),
                    content_type: content_type.to_string(),
                    size: bytes.len(),
                    file_id: file_id.clone(),
                });
            }
            Ok(StoredFile {
                link: format!("https://files.example/{file_id}"),
                file_id,
            })
        }

        async fn delete_file(&self, file_id: &str) -> Result<(), SinkError> {
            if let Ok(mut deleted) = self.deleted.lock() {
                deleted.push(file_id.to_string());
            }
            Ok(())
        }

        async fn append_row(
            &self,
            sheet: &str,
            _header: &[&str],
            row: &[String],
        ) -> Result<(), SinkError> {
            self.append_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failing_appends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(SinkError::Unavailable("sheets unavailable".to_string()));
            }

            if let Ok(mut rows) = self.rows.lock() {
                rows.push((sheet.to_string(), row.to_vec()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockArtifactSink;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_registry_runs_create_once_per_key() {
        let registry = Arc::new(FolderRegistry::new());
        let creates = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            let creates = Arc::clone(&creates);
            handles.push(tokio::spawn(async move {
                registry
                    .resolve("root", "Event", || async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        creates.fetch_add(1, Ordering::SeqCst);
                        Ok("folder-1".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "folder-1");
        }
        assert_eq!(creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_does_not_cache_failures() {
        let registry = FolderRegistry::new();

        let first = registry
            .resolve("root", "Event", || async {
                Err(SinkError::Unavailable("drive down".to_string()))
            })
            .await;
        assert!(first.is_err());

        let second = registry
            .resolve("root", "Event", || async { Ok("folder-2".to_string()) })
            .await
            .unwrap();
        assert_eq!(second, "folder-2");
    }

    #[tokio::test]
    async fn test_registry_keys_include_parent() {
        let registry = FolderRegistry::new();

        let a = registry
            .resolve("event-a", "Bukti Pembayaran", || async { Ok("a".to_string()) })
            .await
            .unwrap();
        let b = registry
            .resolve("event-b", "Bukti Pembayaran", || async { Ok("b".to_string()) })
            .await
            .unwrap();
        assert_ne!(a, b);

        registry.forget("event-a", "Bukti Pembayaran").await;
        let again = registry
            .resolve("event-a", "Bukti Pembayaran", || async { Ok("a2".to_string()) })
            .await
            .unwrap();
        assert_eq!(again, "a2");
    }

    #[tokio::test]
    async fn test_mock_sink_removed_folder() {
        let sink = MockArtifactSink::accepting();
        let event = sink.find_or_create_folder("root", "Event").await.unwrap();
        let payment = sink
            .find_or_create_folder(&event, "Bukti Pembayaran")
            .await
            .unwrap();

        sink.remove_folder(&event);

        assert!(sink.folders().is_empty());
        assert!(matches!(
            sink.upload_file(&payment, "a.png", "image/png", Bytes::from_static(b"x"))
                .await,
            Err(SinkError::NotFound(_))
        ));

        // The registry still answers with the stale id until told to forget
        assert_eq!(sink.find_or_create_folder("root", "Event").await.unwrap(), event);
        sink.forget_folder("root", "Event").await;
        assert_ne!(sink.find_or_create_folder("root", "Event").await.unwrap(), event);
    }

    #[test]
    fn test_missing_path_maps_to_not_found() {
        let err = SinkError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(err, SinkError::NotFound(_)));

        let err = SinkError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(matches!(err, SinkError::Io(_)));
    }

    #[tokio::test]
    async fn test_mock_sink_failing_uploads() {
        let sink = MockArtifactSink::failing_uploads("tiktok_");

        assert!(sink
            .upload_file("root", "payment_Budi_1.png", "image/png", Bytes::from_static(b"x"))
            .await
            .is_ok());
        assert!(sink
            .upload_file("root", "tiktok_Budi_1.png", "image/png", Bytes::from_static(b"x"))
            .await
            .is_err());
        assert_eq!(sink.uploads().len(), 1);
    }
}
