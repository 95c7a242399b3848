use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Deserialize;

use crate::store::{latest_active, EntryStore};
use crate::time_entry::{EntryPatch, NewTimeEntry, TimeEntry};

/// 作成APIのレスポンスをデシリアライズするための構造体。
#[derive(Debug, Deserialize)]
struct CreatedEntry {
    id: String,
}

/// ホストされたドキュメントストアのREST APIと通信するクライアント。
///
/// # Examples
///
/// ```
/// let store = RestEntryStore::new("https://store.example.com/v1", "token");
/// let entry = store.find_active_entry("user-1").await.unwrap();
/// ```
pub struct RestEntryStore {
    client: Client,
    api_url: String,
    api_token: String,
}

impl RestEntryStore {
    /// 新しい`RestEntryStore`を返す。
    ///
    /// # Arguments
    ///
    /// * `api_url` - APIのベースURL
    /// * `api_token` - basic認証に利用するAPIトークン
    pub fn new(api_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }

    fn entries_url(&self) -> String {
        format!("{}/time_entries", self.api_url)
    }
}

#[async_trait]
impl EntryStore for RestEntryStore {
    async fn create_entry(&self, entry: NewTimeEntry) -> Result<String> {
        let created = self
            .client
            .post(self.entries_url())
            .basic_auth(&self.api_token, Some("api_token"))
            .header(CONTENT_TYPE, "application/json")
            .json(&entry)
            .send()
            .await
            .with_context(|| format!("Failed to send request to store API at {}", self.api_url))?
            .error_for_status()
            .context("Request returned an error status")?
            .json::<CreatedEntry>()
            .await
            .context("Failed to deserialize response")?;
        info!("Created time entry: {}", created.id);

        Ok(created.id)
    }

    async fn update_entry(&self, id: &str, patch: EntryPatch) -> Result<()> {
        self.client
            .patch(format!("{}/{}", self.entries_url(), id))
            .basic_auth(&self.api_token, Some("api_token"))
            .header(CONTENT_TYPE, "application/json")
            .json(&patch)
            .send()
            .await
            .with_context(|| format!("Failed to send request to store API at {}", self.api_url))?
            .error_for_status()
            .with_context(|| format!("Failed to update time entry {}", id))?;

        Ok(())
    }

    async fn find_active_entry(&self, owner_id: &str) -> Result<Option<TimeEntry>> {
        let entries = self
            .client
            .get(self.entries_url())
            .basic_auth(&self.api_token, Some("api_token"))
            .header(CONTENT_TYPE, "application/json")
            .query(&[("ownerId", owner_id), ("active", "true")])
            .send()
            .await
            .with_context(|| format!("Failed to send request to store API at {}", self.api_url))?
            .error_for_status()
            .context("Request returned an error status")?
            .json::<Vec<TimeEntry>>()
            .await
            .context("Failed to deserialize response")?;
        info!("length of active time entries: {}", entries.len());

        Ok(latest_active(entries, owner_id))
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;
    use serde_json::json;

    use super::RestEntryStore;
    use crate::store::EntryStore;
    use crate::time_entry::{EntryPatch, EntryType, NewTimeEntry};

    fn auth_header() -> String {
        format!("Basic {}", STANDARD.encode("secret:api_token"))
    }

    #[tokio::test]
    async fn test_create_entry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/time_entries")
            .match_header("authorization", auth_header().as_str())
            .match_body(Matcher::PartialJson(json!({
                "ownerId": "u1",
                "projectId": "P1",
                "entryType": "non-billable",
                "startTime": "2024-01-01T09:00:00Z",
                "isPaused": false,
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "e42"}"#)
            .create_async()
            .await;
        let store = RestEntryStore::new(format!("{}/", server.url()), "secret");

        let id = store.create_entry(new_entry()).await.unwrap();

        assert_eq!(id, "e42");
        mock.assert_async().await;
    }

    /// 再開時の更新では`pauseStartedAt`がnullとして送られることを確認する。
    #[tokio::test]
    async fn test_update_entry_sends_partial_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/time_entries/e42")
            .match_header("authorization", auth_header().as_str())
            .match_body(Matcher::Json(json!({
                "isPaused": false,
                "pauseStartedAt": null,
                "pausedSeconds": 15,
            })))
            .with_status(200)
            .create_async()
            .await;
        let store = RestEntryStore::new(server.url(), "secret");

        store
            .update_entry("e42", EntryPatch::resumed(15))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_entry_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/time_entries/e42")
            .with_status(503)
            .create_async()
            .await;
        let store = RestEntryStore::new(server.url(), "secret");

        let result = store.update_entry("e42", EntryPatch::resumed(0)).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_find_active_entry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/time_entries")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ownerId".into(), "u1".into()),
                Matcher::UrlEncoded("active".into(), "true".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {
                        "id": "e1",
                        "ownerId": "u1",
                        "projectId": "P1",
                        "startTime": "2024-01-01T08:00:00Z",
                    },
                    {
                        "id": "e2",
                        "ownerId": "u1",
                        "projectId": "P1",
                        "startTime": "2024-01-01T09:00:00Z",
                        "isPaused": true,
                        "pauseStartedAt": "2024-01-01T09:00:05Z",
                        "pausedSeconds": 2,
                    },
                ])
                .to_string(),
            )
            .create_async()
            .await;
        let store = RestEntryStore::new(server.url(), "secret");

        let found = store.find_active_entry("u1").await.unwrap().unwrap();

        assert_eq!(found.id, "e2");
        assert!(found.is_paused);
        assert_eq!(found.paused_seconds, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_find_active_entry_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/time_entries")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let store = RestEntryStore::new(server.url(), "secret");

        assert!(store.find_active_entry("u1").await.unwrap().is_none());
    }

    fn new_entry() -> NewTimeEntry {
        NewTimeEntry {
            owner_id: "u1".to_string(),
            project_id: "P1".to_string(),
            task_id: None,
            description: String::new(),
            entry_type: EntryType::NonBillable,
            tags: Default::default(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            duration: 0,
            is_paused: false,
            paused_seconds: 0,
            is_manual: false,
        }
    }
}
