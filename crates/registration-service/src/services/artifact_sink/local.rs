//! Local file-system sink.
//!
//! Folders are directories under `LOCAL_ARTIFACT_DIR`; folder and file ids
//! are their paths. Sheets are CSV files named `<sheet>.csv` in the root.

use super::{ArtifactSink, FolderRegistry, SinkError, StoredFile};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Directory-tree artifact sink for development setups.
pub struct LocalArtifactSink {
    root: PathBuf,
    root_id: String,
    registry: FolderRegistry,
    /// Serializes sheet appends so rows from concurrent jobs never interleave.
    sheet_lock: Mutex<()>,
}

impl LocalArtifactSink {
    /// Create the sink, creating the root directory if needed.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self, SinkError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;

        Ok(Self {
            root_id: root.display().to_string(),
            root,
            registry: FolderRegistry::new(),
            sheet_lock: Mutex::new(()),
        })
    }

    fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.root.join(format!("{}.csv", path_component(sheet)))
    }
}

/// Single path component with separators neutralized.
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line<S: AsRef<str>>(values: &[S]) -> String {
    let mut line = values
        .iter()
        .map(|v| csv_field(v.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[async_trait::async_trait]
impl ArtifactSink for LocalArtifactSink {
    fn root_folder(&self) -> &str {
        &self.root_id
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn find_or_create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<String, SinkError> {
        self.registry
            .resolve(parent_id, name, || async {
                let path = Path::new(parent_id).join(path_component(name));
                fs::create_dir_all(&path).await?;
                debug!(target: "reg.sink.local", path = %path.display(), "Folder ready");
                Ok(path.display().to_string())
            })
            .await
    }

    async fn forget_folder(&self, parent_id: &str, name: &str) {
        self.registry.forget(parent_id, name).await;
    }

    #[instrument(skip_all, fields(name = %name, size = bytes.len()))]
    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        _content_type: &str,
        bytes: Bytes,
    ) -> Result<StoredFile, SinkError> {
        let path = Path::new(folder_id).join(path_component(name));
        fs::write(&path, &bytes).await?;

        Ok(StoredFile {
            file_id: path.display().to_string(),
            link: format!("file://{}", path.display()),
        })
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), SinkError> {
        fs::remove_file(file_id).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(sheet = %sheet))]
    async fn append_row(
        &self,
        sheet: &str,
        header: &[&str],
        row: &[String],
    ) -> Result<(), SinkError> {
        let _guard = self.sheet_lock.lock().await;
        let path = self.sheet_path(sheet);

        let mut contents = String::new();
        if !fs::try_exists(&path).await? {
            contents.push_str(&csv_line(header));
        }
        contents.push_str(&csv_line(row));

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
