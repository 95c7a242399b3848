use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// 定期的に呼び出されるコールバック。
pub type TickCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// 登録したコールバックを取り消すためのハンドル。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

/// 一定間隔でコールバックを呼び出すためのtrait。
pub trait Scheduler: Send + Sync {
    /// `interval`ごとに`callback`を呼び出す。最初の呼び出しは`interval`経過後に行う。
    fn schedule(&self, callback: TickCallback, interval: Duration) -> TickHandle;

    /// 登録したコールバックを取り消す。取り消し済みのハンドルは無視する。
    fn cancel(&self, handle: TickHandle);
}

/// tokioのタスクでコールバックを呼び出すスケジューラ。
///
/// tokioのランタイム上で利用すること。
#[derive(Debug, Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// 新しい`TokioScheduler`を返す。
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, callback: TickCallback, interval: Duration) -> TickHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            // 停止中に溜まったtickはまとめずに捨てる
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                callback();
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        debug!("Scheduled tick {} every {:?}", id, interval);

        TickHandle(id)
    }

    fn cancel(&self, handle: TickHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        if let Some(task) = task {
            task.abort();
            debug!("Cancelled tick {}", handle.0);
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}
