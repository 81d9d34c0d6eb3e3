//! HTTP client for the backing store's PostgREST interface.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

use civicsync_core::{Pipeline, RawCompleteness, RawSyncRow, SyncRecord};
use civicsync_store::{CompletenessStore, StatusUpsert, StatusWriter, StoreError, SyncRecordStore};

const SYNC_STATUS_TABLE: &str = "sync_status";
const COMPLETENESS_TABLE: &str = "data_completeness";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid API key header: {0}")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),
}

impl From<SyncError> for StoreError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Json(e) => StoreError::Json(e),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// REST client for the `sync_status` and `data_completeness` tables.
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for the given project URL.
    ///
    /// `base_url` should be like `https://project.example.co` (no trailing
    /// slash, no `/rest/v1`). When `api_key` is set it is sent both as the
    /// `apikey` header and as a bearer token.
    pub fn new(base_url: String, api_key: Option<&str>) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert("apikey", HeaderValue::from_str(key)?);
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn sync_status_request(&self, pipeline: Pipeline) -> reqwest::RequestBuilder {
        self.client
            .get(self.table_url(SYNC_STATUS_TABLE))
            .query(&[("id", format!("eq.{pipeline}").as_str()), ("select", "*")])
    }

    fn completeness_request(&self, entity_id: &str) -> reqwest::RequestBuilder {
        self.client.get(self.table_url(COMPLETENESS_TABLE)).query(&[
            ("select", "*"),
            ("limit", "1"),
            ("bioguide_id", format!("eq.{entity_id}").as_str()),
        ])
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<T>, SyncError> {
        let resp = request.send().await?;
        debug!(url = %resp.url(), "queried backing store");
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Upsert a status row; the row id is the conflict key.
    pub async fn upsert(&self, row: &StatusUpsert) -> Result<(), SyncError> {
        let url = self.table_url(SYNC_STATUS_TABLE);
        info!(url = %url, id = %row.id, status = %row.status, "upserting status row");
        let resp = self
            .client
            .post(&url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SyncRecordStore for RestClient {
    async fn get_sync_record(&self, pipeline: Pipeline) -> Result<Option<SyncRecord>, StoreError> {
        let rows: Vec<RawSyncRow> = self.get_rows(self.sync_status_request(pipeline)).await?;
        rows.into_iter()
            .next()
            .map(SyncRecord::try_from)
            .transpose()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CompletenessStore for RestClient {
    async fn get_completeness(
        &self,
        entity_id: &str,
    ) -> Result<Option<RawCompleteness>, StoreError> {
        let rows: Vec<RawCompleteness> = self.get_rows(self.completeness_request(entity_id)).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl StatusWriter for RestClient {
    async fn upsert_status(&self, row: StatusUpsert) -> Result<(), StoreError> {
        Ok(self.upsert(&row).await?)
    }
}
