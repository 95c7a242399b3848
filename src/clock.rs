use chrono::{DateTime, Utc};

/// 現在時刻を取得するためのtrait。
///
/// テストで時間を制御できるように、タイマーエンジンにはこのtraitを注入する。
pub trait Clock: Send + Sync {
    /// 現在のUTC時間を取得する。
    fn now(&self) -> DateTime<Utc>;
}

/// システム時計から現在時刻を取得する。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
