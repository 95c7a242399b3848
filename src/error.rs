use thiserror::Error;

/// タイマーエンジンのエラー。
///
/// 計測していない時の`stop`・`pause`・`resume`はエラーにせず何もしない。
#[derive(Debug, Error)]
pub enum TimerError {
    /// 入力値が不正
    #[error("Invalid value for '{field}': {message}")]
    Validation { field: &'static str, message: String },

    /// 待ち合わせる必要のある永続化に失敗した
    #[error("Failed to {operation} time entry")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// 計測中のセッションが無い
    #[error("No timer is running")]
    NoActiveSession,

    /// 計測中のセッションがあるため復元できない
    #[error("A timer session is already held; stop it before loading another")]
    SessionAlreadyHeld,
}
