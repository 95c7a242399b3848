use anyhow::Result;
use async_trait::async_trait;

use crate::time_entry::{EntryPatch, NewTimeEntry, TimeEntry};

/// time entryを永続化するストアのtrait。
///
/// 各呼び出しは単体でアトミックであればよく、呼び出し間の順序はタイマーエンジンが保証する。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// time entryを作成し、採番されたidを返す。
    async fn create_entry(&self, entry: NewTimeEntry) -> Result<String>;

    /// time entryを部分更新する。
    ///
    /// # Arguments
    ///
    /// * `id` - 更新するtime entryのid
    /// * `patch` - 更新するフィールド
    async fn update_entry(&self, id: &str, patch: EntryPatch) -> Result<()>;

    /// 指定したユーザーの終了していないtime entryを返す。
    async fn find_active_entry(&self, owner_id: &str) -> Result<Option<TimeEntry>>;
}

/// 終了していないtime entryのうち、開始が最も新しいものを選ぶ。
///
/// 1ユーザーにつき1件のはずだが、古いデータで複数残っている場合に備える。
pub fn latest_active<I>(entries: I, owner_id: &str) -> Option<TimeEntry>
where
    I: IntoIterator<Item = TimeEntry>,
{
    entries
        .into_iter()
        .filter(|entry| entry.owner_id == owner_id && entry.is_active())
        .max_by_key(|entry| entry.start_time)
}
