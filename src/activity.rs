use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::clock::Clock;
use crate::duration_fmt::format_duration;

/// セッションの確定をアクティビティとして記録するためのtrait。
///
/// タイマーエンジンは結果を待たず、失敗してもログに残すだけにする。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    /// 確定したセッションを記録する。
    ///
    /// # Arguments
    ///
    /// * `owner_id` - セッションのユーザー
    /// * `project_id` - セッションのプロジェクト
    /// * `duration_seconds` - 確定した経過秒数
    /// * `label` - 説明またはタスク
    async fn record_session_finalized(
        &self,
        owner_id: &str,
        project_id: &str,
        duration_seconds: i64,
        label: Option<String>,
    ) -> Result<()>;
}

/// アクティビティをファイルに追記する。
pub struct FileActivityLog {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileActivityLog {
    /// 新しい`FileActivityLog`を返す。
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }
}

/// アクティビティの1行を作成する。
fn activity_line(
    at: &str,
    owner_id: &str,
    project_id: &str,
    duration_seconds: i64,
    label: Option<&str>,
) -> String {
    let mut line = format!(
        "{}\t{}\tTracked {} on project {}",
        at,
        owner_id,
        format_duration(duration_seconds),
        project_id
    );
    if let Some(label) = label {
        line.push_str(": ");
        line.push_str(label);
    }
    line.push('\n');
    line
}

#[async_trait]
impl ActivityRecorder for FileActivityLog {
    async fn record_session_finalized(
        &self,
        owner_id: &str,
        project_id: &str,
        duration_seconds: i64,
        label: Option<String>,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let line = activity_line(
            &self.clock.now().to_rfc3339(),
            owner_id,
            project_id,
            duration_seconds,
            label.as_deref(),
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append activity: {}", line.trim_end()))?;

        Ok(())
    }
}
