use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LocSyncError, Result};

#[derive(Debug, Clone)]
pub struct CmsSettings {
    pub token: String,
    pub space_id: String,
    pub environment_id: String,
    pub base_url: String,
    pub storage_locale: String,
}

#[derive(Debug, Clone)]
pub struct TranslatorSettings {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// Directory for the filesystem fallback store.
    pub dir: PathBuf,
    pub max_depth: u32,
    pub auto_translate_new_refs: bool,
    pub call_timeout: Duration,
    pub max_read_retries: u32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        TrackingSettings {
            dir: PathBuf::from(".locsync"),
            max_depth: 3,
            auto_translate_new_refs: true,
            call_timeout: Duration::from_secs(30),
            max_read_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub cms: CmsSettings,
    pub translator: TranslatorSettings,
    pub server: ServerSettings,
    pub tracking: TrackingSettings,
}

fn required(name: &str, hint: &str) -> Result<String> {
    env::var(name).map_err(|_| LocSyncError::Config(format!("{name} is not set; {hint}")))
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let cms = CmsSettings {
            token: required(
                "CMS_MANAGEMENT_TOKEN",
                "create a management token in the CMS and export it",
            )?,
            space_id: required("CMS_SPACE_ID", "the space the entries live in")?,
            environment_id: optional("CMS_ENVIRONMENT_ID", "master"),
            base_url: optional("CMS_BASE_URL", "https://api.contentful.com"),
            storage_locale: optional("CMS_STORAGE_LOCALE", "en-US-POSIX"),
        };

        let translator = TranslatorSettings {
            api_key: required(
                "TRANSLATOR_API_KEY",
                "export the machine-translation provider key",
            )?,
            base_url: optional("TRANSLATOR_BASE_URL", "https://api-free.deepl.com"),
        };

        let port = optional("PORT", "3001")
            .parse::<u16>()
            .map_err(|_| LocSyncError::Config("PORT must be a number".to_string()))?;

        let defaults = TrackingSettings::default();
        let tracking = TrackingSettings {
            dir: PathBuf::from(optional("TRACKING_DIR", ".locsync")),
            max_depth: optional("MAX_REFERENCE_DEPTH", "3")
                .parse()
                .map_err(|_| LocSyncError::Config("MAX_REFERENCE_DEPTH must be a number".into()))?,
            auto_translate_new_refs: optional("AUTO_TRANSLATE_NEW_REFS", "true") == "true",
            ..defaults
        };

        Ok(Settings {
            cms,
            translator,
            server: ServerSettings { port },
            tracking,
        })
    }
}
