use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// time entryの種類。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    #[default]
    Normal,
    Manual,
    Pomodoro,
    NonBillable,
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "manual" => Ok(Self::Manual),
            "pomodoro" => Ok(Self::Pomodoro),
            "non-billable" => Ok(Self::NonBillable),
            _ => bail!(
                "Unknown entry type: {} (expected normal, manual, pomodoro or non-billable)",
                s
            ),
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Manual => "manual",
            Self::Pomodoro => "pomodoro",
            Self::NonBillable => "non-billable",
        };
        f.write_str(name)
    }
}

/// ストアに保存されるtime entry。
///
/// `end_time`が無いものが計測中のセッションを表す。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub owner_id: String,
    pub project_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entry_type: EntryType,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// 確定した経過秒数。計測中は参照しない。
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub pause_started_at: Option<DateTime<Utc>>,
    /// 完了した一時停止の合計秒数。進行中の一時停止は含まない。
    #[serde(default)]
    pub paused_seconds: i64,
    #[serde(default)]
    pub is_manual: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub original_data: Option<serde_json::Value>,
}

impl TimeEntry {
    /// 終了していないtime entryかどうかを返す。
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// 部分更新を適用する。
    pub fn apply(&mut self, patch: &EntryPatch) {
        if let Some(end_time) = patch.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
        }
        if let Some(is_paused) = patch.is_paused {
            self.is_paused = is_paused;
        }
        if let Some(pause_started_at) = patch.pause_started_at {
            self.pause_started_at = pause_started_at;
        }
        if let Some(paused_seconds) = patch.paused_seconds {
            self.paused_seconds = paused_seconds;
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
    }
}

/// 新規作成するtime entry。idはストアが採番する。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimeEntry {
    pub owner_id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub description: String,
    pub entry_type: EntryType,
    pub tags: BTreeSet<String>,
    pub start_time: DateTime<Utc>,
    pub duration: i64,
    pub is_paused: bool,
    pub paused_seconds: i64,
    pub is_manual: bool,
}

impl NewTimeEntry {
    /// 採番されたidを付与して`TimeEntry`にする。
    pub fn into_entry(self, id: String) -> TimeEntry {
        TimeEntry {
            id,
            owner_id: self.owner_id,
            project_id: self.project_id,
            task_id: self.task_id,
            description: self.description,
            entry_type: self.entry_type,
            tags: self.tags,
            start_time: self.start_time,
            end_time: None,
            duration: self.duration,
            is_paused: self.is_paused,
            pause_started_at: None,
            paused_seconds: self.paused_seconds,
            is_manual: self.is_manual,
            is_edited: false,
            original_data: None,
        }
    }
}

/// time entryの部分更新。
///
/// `None`のフィールドは更新しない。`pause_started_at`は`Some(None)`でnullに戻す。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_started_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

impl EntryPatch {
    /// 一時停止を開始した時の更新。`duration`には一時停止した時点の経過秒数を入れる。
    pub fn paused(at: DateTime<Utc>, duration: i64) -> Self {
        Self {
            duration: Some(duration),
            is_paused: Some(true),
            pause_started_at: Some(Some(at)),
            ..Self::default()
        }
    }

    /// 一時停止から再開した時の更新。
    pub fn resumed(paused_seconds: i64) -> Self {
        Self {
            is_paused: Some(false),
            pause_started_at: Some(None),
            paused_seconds: Some(paused_seconds),
            ..Self::default()
        }
    }

    /// セッションを確定する時の更新。
    pub fn finalized(end_time: DateTime<Utc>, duration: i64, paused_seconds: i64) -> Self {
        Self {
            end_time: Some(end_time),
            duration: Some(duration),
            is_paused: Some(false),
            pause_started_at: Some(None),
            paused_seconds: Some(paused_seconds),
            ..Self::default()
        }
    }

    /// 説明とタグを変更する時の更新。
    pub fn details(description: Option<String>, tags: Option<BTreeSet<String>>) -> Self {
        Self {
            description,
            tags,
            ..Self::default()
        }
    }
}
