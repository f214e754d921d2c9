use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::browser::Locator;
use crate::error::{ConfigError, Result};

pub const USERNAME_ENV: &str = "CROSSPOST_USERNAME";
pub const PASSWORD_ENV: &str = "CROSSPOST_PASSWORD";
pub const CMS_USERNAME_ENV: &str = "CROSSPOST_CMS_USERNAME";
pub const CMS_PASSWORD_ENV: &str = "CROSSPOST_CMS_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CrosspostConfig {
    pub browser: BrowserSection,
    #[serde(default)]
    pub timings: TimingsSection,
    pub platform: PlatformSection,
    pub publish: PublishSection,
    #[serde(default)]
    pub fetcher: FetcherSection,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
    pub cms: Option<CmsSection>,
    #[serde(default)]
    pub rewriter: RewriterSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub profile_dir: String,
    #[serde(default = "default_window")]
    pub window: [u32; 2],
    pub user_agent: Option<String>,
    pub lang: Option<String>,
    /// Per-character delay range while typing, in milliseconds.
    #[serde(default)]
    pub typing_delay_ms: [u64; 2],
    pub request_timeout_seconds: Option<u64>,
}

fn default_window() -> [u32; 2] {
    [1366, 768]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingsSection {
    pub element_wait_ms: u64,
    pub poll_interval_ms: u64,
    pub navigation_timeout_ms: u64,
    pub processing_timeout_ms: u64,
    pub tag_settle_ms: u64,
    pub verify_timeout_ms: u64,
}

impl Default for TimingsSection {
    fn default() -> Self {
        Self {
            element_wait_ms: 10_000,
            poll_interval_ms: 250,
            navigation_timeout_ms: 30_000,
            processing_timeout_ms: 120_000,
            tag_settle_ms: 500,
            verify_timeout_ms: 20_000,
        }
    }
}

impl TimingsSection {
    /// Zero waits everywhere; for scripted sessions.
    pub fn immediate() -> Self {
        Self {
            element_wait_ms: 0,
            poll_interval_ms: 0,
            navigation_timeout_ms: 0,
            processing_timeout_ms: 0,
            tag_settle_ms: 0,
            verify_timeout_ms: 0,
        }
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn tag_settle(&self) -> Duration {
        Duration::from_millis(self.tag_settle_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
}

/// Where the target platform keeps its pages and controls.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSection {
    pub login_url: String,
    pub upload_url: String,
    /// Substring of the URL while the sign-in page is still showing.
    pub signin_marker: String,
    /// Substring of the URL while the upload/edit page is still showing.
    pub upload_marker: String,
    pub selectors: PlatformSelectors,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSelectors {
    pub username_field: Locator,
    pub password_field: Locator,
    pub login_submit: Locator,
    pub file_input: Locator,
    /// Appears once ingestion finished and metadata fields are interactable.
    pub processing_ready: Locator,
    pub title_field: Locator,
    pub description_field: Locator,
    pub category_dropdown: Locator,
    pub tag_input: Locator,
    pub publish_button: Locator,
    pub confirmation: Option<Locator>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishSection {
    pub asset_source_url: String,
    pub local_asset_path: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherSection {
    pub transfer_timeout_seconds: u64,
    pub stall_timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for FetcherSection {
    fn default() -> Self {
        Self {
            transfer_timeout_seconds: 60,
            stall_timeout_seconds: 20,
            user_agent: "crosspost-fetcher/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSection {
    pub error_screenshot: PathBuf,
    pub confirmation_screenshot: Option<PathBuf>,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            error_screenshot: PathBuf::from("error_screenshot.png"),
            confirmation_screenshot: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmsSection {
    pub endpoint: String,
    #[serde(default = "default_post_status")]
    pub default_status: String,
    #[serde(default = "default_cms_timeout")]
    pub timeout_seconds: u64,
}

fn default_post_status() -> String {
    "draft".to_string()
}

fn default_cms_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewriterSection {
    pub proxy_host: String,
    pub default_alt: String,
    pub filtered_domains: Vec<String>,
}

impl Default for RewriterSection {
    fn default() -> Self {
        Self {
            proxy_host: "wsrv.nl".to_string(),
            default_alt: "image".to_string(),
            filtered_domains: Vec::new(),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Unset variables yield empty fields; validation rejects them later.
    pub fn from_env(username_key: &str, password_key: &str) -> Self {
        Self {
            username: std::env::var(username_key).unwrap_or_default(),
            password: std::env::var(password_key).unwrap_or_default(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything one publish run needs, fixed before the run starts.
#[derive(Clone)]
pub struct WorkflowConfig {
    pub username: String,
    pub password: String,
    pub asset_source_url: String,
    pub local_asset_path: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: String,
}

impl WorkflowConfig {
    pub fn from_parts(publish: &PublishSection, credentials: Credentials) -> Self {
        Self {
            username: credentials.username,
            password: credentials.password,
            asset_source_url: publish.asset_source_url.clone(),
            local_asset_path: publish.local_asset_path.clone(),
            title: publish.title.clone(),
            description: publish.description.clone(),
            tags: publish.tags.clone(),
            category: publish.category.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        require("username", &self.username)?;
        require("password", &self.password)?;
        require("asset_source_url", &self.asset_source_url)?;
        if self.local_asset_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("local_asset_path"));
        }
        require("title", &self.title)?;
        require("description", &self.description)?;
        require("category", &self.category)?;
        if self.tags.is_empty() {
            return Err(ConfigError::MissingField("tags"));
        }
        if let Some(position) = self.tags.iter().position(|tag| tag.trim().is_empty()) {
            return Err(ConfigError::InvalidField {
                field: "tags",
                reason: format!("tag #{} is empty", position + 1),
            });
        }
        let parsed = Url::parse(&self.asset_source_url).map_err(|err| ConfigError::InvalidField {
            field: "asset_source_url",
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https" | "file") {
            return Err(ConfigError::InvalidField {
                field: "asset_source_url",
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for WorkflowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("asset_source_url", &self.asset_source_url)
            .field("local_asset_path", &self.local_asset_path)
            .field("title", &self.title)
            .field("tags", &self.tags)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField(field))
    } else {
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CrosspostConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
