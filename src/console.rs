use std::io::Write;

use anyhow::{Context, Result};
use chrono::Local;

use crate::duration_fmt::{format_clock, format_duration};
use crate::engine::Snapshot;
use crate::time_entry::TimeEntry;

/// Consoleにタイマーの状態を表示するためのtrait。
pub trait ConsolePresenter {
    /// タイマーの状態を表示する。
    ///
    /// # Arguments
    ///
    /// * `snapshot` - 表示するタイマーの状態
    fn show_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// 確定したtime entryを表示する。
    ///
    /// # Arguments
    ///
    /// * `entry` - 確定したtime entry。計測していなかった場合は`None`
    fn show_finalized(&mut self, entry: Option<&TimeEntry>) -> Result<()>;
}

/// タイマーの状態を1行のテキストで表示する。
pub struct ConsoleText<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> ConsoleText<'a, W> {
    /// 新しい`ConsoleText`を返す。
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleText<'a, W> {
    // 状態・経過時間・プロジェクトを1行で表示する。
    fn show_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let Some(session_id) = &snapshot.session_id else {
            writeln!(self.writer, "idle").context("Failed to write timer status")?;
            return Ok(());
        };
        let state = if snapshot.is_paused { "paused" } else { "running" };
        let project = snapshot.project_id.clone().unwrap_or_default();
        let task = snapshot
            .task_id
            .as_ref()
            .map(|task_id| format!(" / {}", task_id))
            .unwrap_or_default();
        let started = snapshot
            .started_at
            .map(|start| start.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        writeln!(
            self.writer,
            "{} {} {}{} (since {}, entry {})",
            state,
            format_clock(snapshot.elapsed_seconds),
            project,
            task,
            started,
            session_id
        )
        .with_context(|| format!("Failed to write timer status: {:?}", snapshot))?;

        Ok(())
    }

    fn show_finalized(&mut self, entry: Option<&TimeEntry>) -> Result<()> {
        let written = match entry {
            Some(entry) => writeln!(
                self.writer,
                "stopped {} after {}",
                entry.project_id,
                format_duration(entry.duration)
            ),
            None => writeln!(self.writer, "no timer is running"),
        };
        written.context("Failed to write stopped time entry")?;

        Ok(())
    }
}
