use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{latest_active, EntryStore};
use crate::time_entry::{EntryPatch, NewTimeEntry, TimeEntry};

/// JSONファイルに保存されるドキュメント。
#[derive(Debug, Default, Deserialize, Serialize)]
struct Document {
    entries: Vec<TimeEntry>,
}

/// time entryをローカルのJSONファイルに保存するストア。
///
/// # Examples
///
/// ```
/// let store = JsonFileStore::new(data_dir.join("entries.json"));
/// let id = store.create_entry(entry).await.unwrap();
/// ```
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// 新しい`JsonFileStore`を返す。ファイルは最初の書き込み時に作成する。
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<Document> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Document::default()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        }
    }

    /// 一時ファイルに書き込んでからrenameする。
    async fn write(&self, document: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(document).context("Failed to serialize entries")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl EntryStore for JsonFileStore {
    async fn create_entry(&self, entry: NewTimeEntry) -> Result<String> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        let id = Uuid::new_v4().to_string();
        document.entries.push(entry.into_entry(id.clone()));
        self.write(&document).await?;
        debug!("Created time entry {} in {}", id, self.path.display());

        Ok(id)
    }

    async fn update_entry(&self, id: &str, patch: EntryPatch) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        let entry = document
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .with_context(|| format!("Time entry not found: {}", id))?;
        entry.apply(&patch);
        self.write(&document).await?;
        debug!("Updated time entry {} in {}", id, self.path.display());

        Ok(())
    }

    async fn find_active_entry(&self, owner_id: &str) -> Result<Option<TimeEntry>> {
        let _guard = self.lock.lock().await;
        let document = self.read().await?;

        Ok(latest_active(document.entries, owner_id))
    }
}
