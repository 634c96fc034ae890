use async_trait::async_trait;
use rand::Rng;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use locsync_core::{
    CmsClient, CmsSettings, ContentTypeSchema, Entry, EntryQuery, FieldId, LocSyncError,
    LocalizedValue, Result,
};

use crate::wire::{ContentTypeEnvelope, EntryCollection, EntryEnvelope};

const BASE_BACKOFF_MS: u64 = 500;

/// Client for the CMS management API, scoped to one space and environment.
#[derive(Clone)]
pub struct ManagementClient {
    http: reqwest::Client,
    base_url: String,
    space_id: String,
    environment_id: String,
    storage_locale: String,
    max_read_retries: u32,
}

impl ManagementClient {
    pub fn new(settings: &CmsSettings, timeout: Duration, max_read_retries: u32) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", settings.token))
            .map_err(|_| LocSyncError::Config("CMS token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| LocSyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(ManagementClient {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            space_id: settings.space_id.clone(),
            environment_id: settings.environment_id.clone(),
            storage_locale: settings.storage_locale.clone(),
            max_read_retries,
        })
    }

    /// The same client pointed at another space/environment. Connection pool
    /// and credentials are shared.
    pub fn with_scope(&self, space_id: &str, environment_id: &str) -> Self {
        let mut scoped = self.clone();
        scoped.space_id = space_id.to_string();
        scoped.environment_id = environment_id.to_string();
        scoped
    }

    pub fn storage_locale(&self) -> &str {
        &self.storage_locale
    }

    fn env_url(&self, path: &str) -> String {
        format!(
            "{}/spaces/{}/environments/{}{}",
            self.base_url, self.space_id, self.environment_id, path
        )
    }

    fn error_from_response(status: StatusCode, body: String) -> LocSyncError {
        // Prefer the message buried in the error JSON over the raw body.
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error").and_then(|e| e.get("message")))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.len() > 400 {
                    format!("{}...", &trimmed[..400])
                } else {
                    trimmed.to_string()
                }
            });

        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            LocSyncError::CmsTransient(format!("HTTP {}: {message}", status.as_u16()))
        } else {
            LocSyncError::Cms {
                status: status.as_u16(),
                message,
            }
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        headers: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut request = self.http.request(method, url).query(query);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(LocSyncError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_from_response(status, body));
        }
        response.json::<T>().await.map_err(LocSyncError::Http)
    }

    /// GETs are idempotent, so transient failures are retried with jittered
    /// exponential backoff. Writes go through `send` exactly once.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .send::<T>(Method::GET, url, query, &[], None)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_read_retries => {
                    let jitter: u64 = rand::thread_rng().gen_range(0..200);
                    let delay = BASE_BACKOFF_MS * 2u64.pow(attempt) + jitter;
                    warn!(url, attempt, error = %e, "transient CMS read failure, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl CmsClient for ManagementClient {
    async fn get_entry(&self, id: &str) -> Result<Entry> {
        let url = self.env_url(&format!("/entries/{id}"));
        let envelope: EntryEnvelope = self.get_with_retry(&url, &[]).await.map_err(|e| match e {
            LocSyncError::Cms { status: 404, .. } => LocSyncError::EntryNotFound(id.to_string()),
            other => other,
        })?;
        Ok(envelope.into_entry())
    }

    async fn get_content_type(&self, id: &str) -> Result<ContentTypeSchema> {
        let url = self.env_url(&format!("/content_types/{id}"));
        let envelope: ContentTypeEnvelope = self.get_with_retry(&url, &[]).await?;
        Ok(envelope.into_schema())
    }

    async fn find_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        let url = self.env_url("/entries");
        let mut params = Vec::new();
        if let Some(content_type) = &query.content_type {
            params.push(("content_type".to_string(), content_type.clone()));
        }
        for (field, value) in &query.field_equals {
            params.push((
                format!("fields.{field}.{}", self.storage_locale),
                value.clone(),
            ));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        let collection: EntryCollection = self.get_with_retry(&url, &params).await?;
        Ok(collection
            .items
            .into_iter()
            .map(EntryEnvelope::into_entry)
            .collect())
    }

    async fn create_entry(
        &self,
        content_type: &str,
        fields: BTreeMap<FieldId, LocalizedValue>,
    ) -> Result<Entry> {
        let url = self.env_url("/entries");
        debug!(content_type, "creating draft entry");
        let envelope: EntryEnvelope = self
            .send(
                Method::POST,
                &url,
                &[],
                &[("X-Contentful-Content-Type", content_type.to_string())],
                Some(json!({ "fields": fields })),
            )
            .await?;
        Ok(envelope.into_entry())
    }

    async fn update_entry(&self, entry: &Entry) -> Result<Entry> {
        let url = self.env_url(&format!("/entries/{}", entry.id));
        debug!(entry_id = %entry.id, version = entry.version, "updating entry");
        let envelope: EntryEnvelope = self
            .send(
                Method::PUT,
                &url,
                &[],
                &[("X-Contentful-Version", entry.version.to_string())],
                Some(json!({ "fields": entry.fields })),
            )
            .await?;
        Ok(envelope.into_entry())
    }

    async fn delete_entry(&self, id: &str) -> Result<()> {
        let current = self.get_entry(id).await?;
        let url = self.env_url(&format!("/entries/{id}"));
        let request = self
            .http
            .request(Method::DELETE, &url)
            .header("X-Contentful-Version", current.version.to_string());
        let response = request.send().await.map_err(LocSyncError::Http)?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_from_response(status, body));
        }
        Ok(())
    }
}
