//! 計測中のセッションを管理するタイマーエンジン。
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//!   ^                |                  |
//!   +------stop------+-------stop-------+
//! ```
//!
//! 経過時間は保存された時刻だけから毎回計算し直すため、tickの取りこぼしや
//! プロセスの再起動で値がずれることはない。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::activity::ActivityRecorder;
use crate::clock::Clock;
use crate::error::TimerError;
use crate::scheduler::{Scheduler, TickHandle};
use crate::store::EntryStore;
use crate::time_entry::{EntryPatch, EntryType, NewTimeEntry, TimeEntry};

/// エンジンの状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
}

/// `start`の入力。
#[derive(Clone, Debug, Default)]
pub struct StartInput {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub description: Option<String>,
    pub entry_type: Option<EntryType>,
    pub tags: BTreeSet<String>,
}

/// UIに表示するためのエンジンの状態。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub is_running: bool,
    pub is_paused: bool,
    pub elapsed_seconds: i64,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// `at`時点での経過秒数を返す。
fn elapsed_at(start_time: DateTime<Utc>, paused_seconds: i64, at: DateTime<Utc>) -> i64 {
    ((at - start_time).num_seconds() - paused_seconds).max(0)
}

/// セッションの経過秒数を返す。一時停止中は停止した時点で止まる。
pub fn elapsed_seconds(entry: &TimeEntry, now: DateTime<Utc>) -> i64 {
    let at = match (entry.is_paused, entry.pause_started_at) {
        (true, Some(pause_started_at)) => pause_started_at,
        _ => now,
    };
    elapsed_at(entry.start_time, entry.paused_seconds, at)
}

/// 進行中の一時停止を`paused_seconds`に加算する。
fn fold_pause(entry: &mut TimeEntry, now: DateTime<Utc>) {
    if let Some(pause_started_at) = entry.pause_started_at.take() {
        entry.paused_seconds += (now - pause_started_at).num_seconds().max(0);
    }
    entry.is_paused = false;
}

/// アクティビティに記録するラベル。
fn activity_label(entry: &TimeEntry) -> Option<String> {
    if !entry.description.trim().is_empty() {
        Some(entry.description.clone())
    } else {
        entry.task_id.as_ref().map(|task_id| format!("task:{}", task_id))
    }
}

/// 計測中のセッションを1つだけ保持するタイマーエンジン。
///
/// 依存するストア・時計・スケジューラは全てコンストラクタで受け取る。
///
/// # Examples
///
/// ```
/// let mut engine = TimerEngine::new(store, recorder, clock, scheduler, Duration::from_secs(1));
/// engine.load("user-1").await?;
/// engine.start("user-1", StartInput { project_id: Some("P1".into()), ..Default::default() }).await?;
/// engine.stop().await?;
/// ```
pub struct TimerEngine {
    store: Arc<dyn EntryStore>,
    recorder: Arc<dyn ActivityRecorder>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    tick_interval: Duration,
    session: Option<TimeEntry>,
    ticker: Option<TickHandle>,
    snapshot_tx: Arc<watch::Sender<Snapshot>>,
    /// 待たずに行う書き込みの末尾。書き込みは発行した順に1件ずつ行う。
    pending_writes: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl TimerEngine {
    /// 新しい`TimerEngine`を返す。状態は`Idle`から始まる。
    pub fn new(
        store: Arc<dyn EntryStore>,
        recorder: Arc<dyn ActivityRecorder>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        tick_interval: Duration,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        Self {
            store,
            recorder,
            clock,
            scheduler,
            tick_interval,
            session: None,
            ticker: None,
            snapshot_tx: Arc::new(snapshot_tx),
            pending_writes: None,
            background: Vec::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        match &self.session {
            None => TimerState::Idle,
            Some(entry) if entry.is_paused => TimerState::Paused,
            Some(_) => TimerState::Running,
        }
    }

    /// 最後に公開された状態を返す。実行中はtickごとに更新される。
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// 状態の変化を受け取るためのreceiverを返す。
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    /// 保持しているセッションを返す。
    pub fn active_entry(&self) -> Result<&TimeEntry, TimerError> {
        self.session.as_ref().ok_or(TimerError::NoActiveSession)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// 新しいセッションを開始し、作成したtime entryのidを返す。
    ///
    /// 計測中のセッションがある場合は、先にそれを確定させてから作成する。
    pub async fn start(&mut self, owner_id: &str, input: StartInput) -> Result<String, TimerError> {
        let project_id = input
            .project_id
            .filter(|project_id| !project_id.trim().is_empty())
            .ok_or_else(|| TimerError::Validation {
                field: "project_id",
                message: "a project is required to start a timer".to_string(),
            })?;

        if self.session.is_some() {
            self.stop().await?;
        }

        let new_entry = NewTimeEntry {
            owner_id: owner_id.to_string(),
            project_id,
            task_id: input.task_id,
            description: input.description.unwrap_or_default(),
            entry_type: input.entry_type.unwrap_or_default(),
            tags: input.tags,
            start_time: self.clock.now(),
            duration: 0,
            is_paused: false,
            paused_seconds: 0,
            is_manual: false,
        };
        let id = self
            .store
            .create_entry(new_entry.clone())
            .await
            .map_err(|source| TimerError::Persistence {
                operation: "create",
                source,
            })?;
        info!(
            "Started time entry {} on project {}",
            id, new_entry.project_id
        );

        self.session = Some(new_entry.into_entry(id.clone()));
        self.start_ticking();
        self.publish();

        Ok(id)
    }

    /// 実行中のセッションを一時停止する。状態が変わった場合に`true`を返す。
    pub async fn pause(&mut self) -> bool {
        if self.state() != TimerState::Running {
            return false;
        }
        self.stop_ticking();

        let now = self.clock.now();
        let Some(entry) = self.session.as_mut() else {
            return false;
        };
        entry.is_paused = true;
        entry.pause_started_at = Some(now);
        let id = entry.id.clone();
        let patch = EntryPatch::paused(now, elapsed_seconds(entry, now));
        info!("Paused time entry {}", id);

        self.publish();
        // 失敗しても状態は戻さない
        self.persist_in_background("pause", &id, patch);

        true
    }

    /// 一時停止中のセッションを再開する。状態が変わった場合に`true`を返す。
    pub async fn resume(&mut self) -> bool {
        if self.state() != TimerState::Paused {
            return false;
        }

        let now = self.clock.now();
        let Some(entry) = self.session.as_mut() else {
            return false;
        };
        fold_pause(entry, now);
        let id = entry.id.clone();
        let patch = EntryPatch::resumed(entry.paused_seconds);
        info!(
            "Resumed time entry {} ({}s paused in total)",
            id, entry.paused_seconds
        );

        self.persist_in_background("resume", &id, patch);
        self.start_ticking();
        self.publish();

        true
    }

    /// セッションを確定し、確定したtime entryを返す。
    ///
    /// 計測していない場合は何もせず`None`を返す。確定の書き込みに失敗した場合は
    /// セッションを保持したままエラーを返すので、呼び出し元は再試行できる。
    pub async fn stop(&mut self) -> Result<Option<TimeEntry>, TimerError> {
        let Some(held) = self.session.as_ref() else {
            debug!("stop called without a running timer");
            return Ok(None);
        };
        let was_running = !held.is_paused;
        let now = self.clock.now();
        let mut finalized = held.clone();
        fold_pause(&mut finalized, now);
        let duration = elapsed_at(finalized.start_time, finalized.paused_seconds, now);

        self.stop_ticking();
        // 一時停止・再開の書き込みが確定の後に届かないようにする
        self.flush_writes().await;
        let patch = EntryPatch::finalized(now, duration, finalized.paused_seconds);
        if let Err(err) = self.persist("finalize", &finalized.id, patch).await {
            if was_running {
                self.start_ticking();
            }
            return Err(err);
        }

        finalized.end_time = Some(now);
        finalized.duration = duration;
        info!(
            "Stopped time entry {} after {}s",
            finalized.id, finalized.duration
        );
        self.record_finalized(&finalized);
        self.session = None;
        self.publish();

        Ok(Some(finalized))
    }

    /// ストアに残っている終了していないtime entryからセッションを復元する。
    ///
    /// `Idle`の時だけ呼び出せる。見つからない場合は`Idle`のまま。
    pub async fn load(&mut self, owner_id: &str) -> Result<Snapshot, TimerError> {
        if self.session.is_some() {
            return Err(TimerError::SessionAlreadyHeld);
        }
        let found = self
            .store
            .find_active_entry(owner_id)
            .await
            .map_err(|source| TimerError::Persistence {
                operation: "find the active",
                source,
            })?;
        let Some(mut entry) = found else {
            debug!("No active time entry for {}", owner_id);
            return Ok(self.snapshot());
        };

        if entry.is_paused && entry.pause_started_at.is_none() {
            warn!(
                "Time entry {} is paused without a pause start, treating the pause as starting now",
                entry.id
            );
            let now = self.clock.now();
            entry.pause_started_at = Some(now);
            let patch = EntryPatch::paused(now, elapsed_seconds(&entry, now));
            self.persist_in_background("repair pause", &entry.id, patch);
        }
        let paused = entry.is_paused;
        info!(
            "Recovered {} time entry {}",
            if paused { "paused" } else { "running" },
            entry.id
        );
        self.session = Some(entry);
        if !paused {
            self.start_ticking();
        }
        self.publish();

        Ok(self.snapshot())
    }

    /// 保持しているセッションの説明とタグを変更する。
    pub async fn update_details(
        &mut self,
        description: Option<String>,
        tags: Option<BTreeSet<String>>,
    ) -> Result<(), TimerError> {
        let id = self.active_entry()?.id.clone();
        let patch = EntryPatch::details(description, tags);
        self.flush_writes().await;
        self.persist("update", &id, patch.clone()).await?;
        if let Some(entry) = self.session.as_mut() {
            entry.apply(&patch);
        }
        self.publish();

        Ok(())
    }

    /// バックグラウンドで実行中の書き込みと記録が終わるのを待つ。
    pub async fn settle(&mut self) {
        self.flush_writes().await;
        for task in std::mem::take(&mut self.background) {
            if let Err(err) = task.await {
                warn!("Background write task failed: {}", err);
            }
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// 書き込みを待ち、失敗を呼び出し元に返す。
    async fn persist(
        &self,
        operation: &'static str,
        id: &str,
        patch: EntryPatch,
    ) -> Result<(), TimerError> {
        self.store
            .update_entry(id, patch)
            .await
            .map_err(|source| TimerError::Persistence { operation, source })
    }

    /// 書き込みを待たずに行う。失敗はログに残すだけにする。
    ///
    /// 前に発行した書き込みが終わってから書き込むので、ストアに届く順番は発行した順になる。
    fn persist_in_background(&mut self, operation: &'static str, id: &str, patch: EntryPatch) {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        let previous = self.pending_writes.take();
        self.pending_writes = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(err) = previous.await {
                    warn!("Previous best-effort write task failed: {}", err);
                }
            }
            if let Err(err) = store.update_entry(&id, patch).await {
                warn!(
                    "Best-effort {} write for time entry {} failed: {:#}",
                    operation, id, err
                );
            }
        }));
    }

    /// 待たずに発行した書き込みが全て終わるのを待つ。
    async fn flush_writes(&mut self) {
        if let Some(pending) = self.pending_writes.take() {
            if let Err(err) = pending.await {
                warn!("Best-effort write task failed: {}", err);
            }
        }
    }

    fn record_finalized(&mut self, entry: &TimeEntry) {
        let recorder = Arc::clone(&self.recorder);
        let owner_id = entry.owner_id.clone();
        let project_id = entry.project_id.clone();
        let duration = entry.duration;
        let label = activity_label(entry);
        self.spawn_background(async move {
            if let Err(err) = recorder
                .record_session_finalized(&owner_id, &project_id, duration, label)
                .await
            {
                warn!("Failed to record activity for {}: {:#}", owner_id, err);
            }
        });
    }

    fn spawn_background<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.background.retain(|task| !task.is_finished());
        self.background.push(tokio::spawn(task));
    }

    fn start_ticking(&mut self) {
        self.stop_ticking();
        let Some(entry) = self.session.as_ref() else {
            return;
        };
        let session_id = entry.id.clone();
        let start_time = entry.start_time;
        let paused_seconds = entry.paused_seconds;
        let clock = Arc::clone(&self.clock);
        let snapshot_tx = Arc::clone(&self.snapshot_tx);

        let handle = self.scheduler.schedule(
            Box::new(move || {
                let elapsed = elapsed_at(start_time, paused_seconds, clock.now());
                snapshot_tx.send_if_modified(|snapshot| {
                    if !snapshot.is_running || snapshot.session_id.as_ref() != Some(&session_id) {
                        return false;
                    }
                    snapshot.elapsed_seconds = elapsed;
                    true
                });
            }),
            self.tick_interval,
        );
        self.ticker = Some(handle);
    }

    fn stop_ticking(&mut self) {
        if let Some(handle) = self.ticker.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn publish(&self) {
        let snapshot = match &self.session {
            None => Snapshot::default(),
            Some(entry) => Snapshot {
                is_running: !entry.is_paused,
                is_paused: entry.is_paused,
                elapsed_seconds: elapsed_seconds(entry, self.clock.now()),
                session_id: Some(entry.id.clone()),
                project_id: Some(entry.project_id.clone()),
                task_id: entry.task_id.clone(),
                started_at: Some(entry.start_time),
            },
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.stop_ticking();
    }
}

/// 複数の呼び出し元からコマンドを1つずつ実行させるためのラッパー。
///
/// 前のコマンドの書き込みを待っている間は次のコマンドを処理しない。
#[derive(Clone)]
pub struct SharedTimer {
    engine: Arc<Mutex<TimerEngine>>,
    snapshots: watch::Receiver<Snapshot>,
}

impl SharedTimer {
    /// 新しい`SharedTimer`を返す。
    pub fn new(engine: TimerEngine) -> Self {
        let snapshots = engine.subscribe();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            snapshots,
        }
    }

    pub async fn start(&self, owner_id: &str, input: StartInput) -> Result<String, TimerError> {
        self.engine.lock().await.start(owner_id, input).await
    }

    pub async fn pause(&self) -> bool {
        self.engine.lock().await.pause().await
    }

    pub async fn resume(&self) -> bool {
        self.engine.lock().await.resume().await
    }

    pub async fn stop(&self) -> Result<Option<TimeEntry>, TimerError> {
        self.engine.lock().await.stop().await
    }

    pub async fn load(&self, owner_id: &str) -> Result<Snapshot, TimerError> {
        self.engine.lock().await.load(owner_id).await
    }

    pub async fn update_details(
        &self,
        description: Option<String>,
        tags: Option<BTreeSet<String>>,
    ) -> Result<(), TimerError> {
        self.engine
            .lock()
            .await
            .update_details(description, tags)
            .await
    }

    pub async fn settle(&self) {
        self.engine.lock().await.settle().await
    }

    /// ロックを取らずに最新の状態を返す。
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }
}
