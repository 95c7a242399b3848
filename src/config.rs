use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::activity::{ActivityRecorder, FileActivityLog};
use crate::clock::Clock;
use crate::file_store::JsonFileStore;
use crate::rest_store::RestEntryStore;
use crate::store::EntryStore;

const DEFAULT_TICK_MS: u64 = 1000;

/// time entryの保存先。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// ローカルのJSONファイル
    File { path: PathBuf },
    /// ホストされたドキュメントストアのREST API
    Rest { api_url: String, api_token: String },
}

/// 環境変数から読み込む設定。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub owner_id: Option<String>,
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
}

impl Config {
    /// 環境変数から設定を読み込む。
    ///
    /// `TRACKTIMER_STORE_URL`が設定されている場合はREST APIを利用し、
    /// その場合は`TRACKTIMER_STORE_TOKEN`も必要になる。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 指定した関数で値を引いて設定を読み込む。
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let data_dir = match value("TRACKTIMER_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .context("Failed to find the data directory; set TRACKTIMER_DATA_DIR")?
                .join("tracktimer"),
        };

        let backend = match value("TRACKTIMER_STORE_URL") {
            Some(api_url) => StoreBackend::Rest {
                api_url,
                api_token: value("TRACKTIMER_STORE_TOKEN")
                    .context("TRACKTIMER_STORE_TOKEN must be set when TRACKTIMER_STORE_URL is set")?,
            },
            None => StoreBackend::File {
                path: data_dir.join("entries.json"),
            },
        };

        let tick_ms = match value("TRACKTIMER_TICK_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Failed to parse TRACKTIMER_TICK_MS: {}", raw))?,
            None => DEFAULT_TICK_MS,
        };
        if tick_ms == 0 {
            bail!("TRACKTIMER_TICK_MS must be greater than 0");
        }

        Ok(Self {
            owner_id: value("TRACKTIMER_OWNER_ID"),
            backend,
            data_dir,
            tick_interval: Duration::from_millis(tick_ms),
        })
    }

    /// 設定に合わせたストアを返す。
    pub fn build_store(&self) -> Arc<dyn EntryStore> {
        match &self.backend {
            StoreBackend::File { path } => Arc::new(JsonFileStore::new(path)),
            StoreBackend::Rest {
                api_url,
                api_token,
            } => Arc::new(RestEntryStore::new(api_url.as_str(), api_token.as_str())),
        }
    }

    /// アクティビティを追記するファイルのレコーダーを返す。
    pub fn build_recorder(&self, clock: Arc<dyn Clock>) -> Arc<dyn ActivityRecorder> {
        Arc::new(FileActivityLog::new(self.data_dir.join("activity.log"), clock))
    }
}
