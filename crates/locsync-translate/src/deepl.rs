use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use locsync_core::{
    LanguageInfo, LocSyncError, Result, TranslateOptions, Translator, TranslatorSettings,
    TranslatorUsage,
};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 800;

/// DeepL-style translation provider.
#[derive(Clone)]
pub struct DeepLClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TranslationsWire {
    translations: Vec<TranslationWire>,
}

#[derive(Debug, Deserialize)]
struct TranslationWire {
    text: String,
}

#[derive(Debug, Deserialize)]
struct UsageWire {
    character_count: u64,
    character_limit: u64,
}

impl DeepLClient {
    pub fn new(settings: &TranslatorSettings, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LocSyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(DeepLClient {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn auth_value(&self) -> String {
        format!("DeepL-Auth-Key {}", self.api_key)
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    fn provider_error(status: StatusCode, body: &str) -> LocSyncError {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.trim().chars().take(400).collect());
        LocSyncError::Translator(format!("HTTP {}: {message}", status.as_u16()))
    }

    async fn request_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .http
                .post(&url)
                .header("Authorization", self.auth_value())
                .form(form)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(LocSyncError::Http);
                    }
                    let body = response.text().await.unwrap_or_default();
                    let error = Self::provider_error(status, &body);
                    if Self::should_retry(status) && attempt + 1 < MAX_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        warn!(path, attempt, "translator returned {status}, retrying");
                        continue;
                    }
                    return Err(error);
                }
                Err(e) => {
                    let error = LocSyncError::Http(e);
                    if error.is_transient() && attempt + 1 < MAX_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        warn!(path, attempt, error = %error, "translator unreachable, retrying");
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn request_get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth_value())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::provider_error(status, &body));
        }
        response.json::<T>().await.map_err(LocSyncError::Http)
    }

    fn backoff(attempt: u32) -> Duration {
        let jitter: u64 = rand::thread_rng().gen_range(0..200);
        Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1) + jitter)
    }
}

#[async_trait]
impl Translator for DeepLClient {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        options: &TranslateOptions,
    ) -> Result<String> {
        let mut form: Vec<(&str, &str)> = vec![
            ("text", text),
            ("source_lang", source_lang),
            ("target_lang", target_lang),
        ];
        if options.preserve_formatting {
            form.push(("preserve_formatting", "1"));
        }
        if let Some(tag_handling) = options.tag_handling.as_deref() {
            form.push(("tag_handling", tag_handling));
        }

        let wire: TranslationsWire = self.request_form("/v2/translate", &form).await?;
        wire.translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| LocSyncError::Translator("empty translations array".into()))
    }

    async fn usage(&self) -> Result<TranslatorUsage> {
        let wire: UsageWire = self.request_get("/v2/usage").await?;
        Ok(TranslatorUsage {
            character_count: wire.character_count,
            character_limit: wire.character_limit,
        })
    }

    async fn source_languages(&self) -> Result<Vec<LanguageInfo>> {
        self.request_get("/v2/languages?type=source").await
    }

    async fn target_languages(&self) -> Result<Vec<LanguageInfo>> {
        self.request_get("/v2/languages?type=target").await
    }
}
