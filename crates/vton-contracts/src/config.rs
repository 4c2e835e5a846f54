use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::Category;
use crate::providers::{FallbackPolicy, NamedProvider};

pub const CONFIG_PATH_ENV: &str = "VTON_CONFIG";

/// Everything a pipeline run needs, loaded once and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub uploads: UploadsConfig,
    pub processing: ProcessingEndpoint,
    #[serde(default)]
    pub category: Category,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    #[serde(default)]
    pub targets: Vec<UploadTarget>,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_s: f64,
    /// Explicit degraded fallback. Unset means an exhausted upload fails the run.
    #[serde(default)]
    pub placeholder_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTarget {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthConfig,
    pub encoding: UploadEncoding,
    #[serde(default)]
    pub priority: i64,
    /// Overrides `uploads.attempt_timeout_s` for this host.
    #[serde(default)]
    pub timeout_s: Option<f64>,
}

impl NamedProvider for UploadTarget {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn priority(&self) -> i64 {
        self.priority
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadEncoding {
    Multipart {
        field: String,
        #[serde(default)]
        extra: IndexMap<String, String>,
    },
    Base64Form {
        field: String,
        #[serde(default)]
        extra: IndexMap<String, String>,
    },
    Base64Json {
        field: String,
        #[serde(default)]
        extra: IndexMap<String, Value>,
    },
    /// Raw bytes POSTed to `endpoint`; the public URL is derived from a
    /// template. Both may contain `{object}`.
    Raw { public_url: String },
}

impl UploadEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Multipart { .. } => "multipart",
            Self::Base64Form { .. } => "base64_form",
            Self::Base64Json { .. } => "base64_json",
            Self::Raw { .. } => "raw",
        }
    }
}

/// Credential reference. Secrets come from the environment; `value` is
/// accepted for local fixtures only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default, skip_serializing)]
    pub value: Option<String>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("env", &self.env)
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secret {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            env: None,
            value: Some(value.into()),
        }
    }

    pub fn expose(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn resolve(&mut self, owner: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        if self.value.as_deref().is_some_and(|value| !value.trim().is_empty()) {
            return Ok(());
        }
        let Some(key) = self.env.as_deref().map(str::trim).filter(|key| !key.is_empty()) else {
            bail!("{owner}: auth needs either `env` or `value`");
        };
        let Some(value) = lookup(key) else {
            bail!("{owner}: environment variable {key} not set");
        };
        self.value = Some(value);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// `name: <prefix><secret>`, e.g. `Ocp-Apim-Subscription-Key` or
    /// `Authorization: Client-ID ...`.
    Header {
        name: String,
        #[serde(default)]
        prefix: String,
        secret: Secret,
    },
    Bearer {
        secret: Secret,
    },
    /// Secret sent as a form or JSON body field (e.g. imgbb's `key`).
    FormField {
        name: String,
        secret: Secret,
    },
}

impl AuthConfig {
    fn secret_mut(&mut self) -> Option<&mut Secret> {
        match self {
            Self::None => None,
            Self::Header { secret, .. }
            | Self::Bearer { secret }
            | Self::FormField { secret, .. } => Some(secret),
        }
    }
}

/// Field names the processing endpoint expects for the two image URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitSchema {
    /// `human_img` / `garm_img`
    #[default]
    HumanGarm,
    /// `userImage` / `garmentId`
    UserGarment,
    Custom {
        subject_field: String,
        garment_field: String,
    },
}

impl SubmitSchema {
    pub fn subject_field(&self) -> &str {
        match self {
            Self::HumanGarm => "human_img",
            Self::UserGarment => "userImage",
            Self::Custom { subject_field, .. } => subject_field,
        }
    }

    pub fn garment_field(&self) -> &str {
        match self {
            Self::HumanGarm => "garm_img",
            Self::UserGarment => "garmentId",
            Self::Custom { garment_field, .. } => garment_field,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEndpoint {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub schema: SubmitSchema,
    #[serde(default = "default_true")]
    pub include_callback_url: bool,
    /// Template with `{endpoint}` and `{task_id}` placeholders.
    #[serde(default = "default_status_url")]
    pub status_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: f64,
    #[serde(default = "default_poll_deadline")]
    pub poll_deadline_s: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_s: f64,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_s: f64,
    #[serde(default)]
    pub health_url: Option<String>,
    /// Substrings (usually hosts) that mark a returned artifact URL as a
    /// provider-side mock rather than a real result.
    #[serde(default)]
    pub mock_artifact_markers: Vec<String>,
}

impl ProcessingEndpoint {
    pub fn endpoint(&self) -> &str {
        self.endpoint.trim().trim_end_matches('/')
    }

    pub fn status_url_for(&self, task_id: &str) -> String {
        self.status_url
            .replace("{endpoint}", self.endpoint())
            .replace("{task_id}", task_id.trim())
    }

    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_s, 0.1, 60.0)
    }

    pub fn poll_deadline(&self) -> Duration {
        seconds(self.poll_deadline_s, 1.0, 3600.0)
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_s, 1.0, 600.0)
    }

    pub fn download_timeout(&self) -> Duration {
        seconds(self.download_timeout_s, 1.0, 600.0)
    }

    /// First configured mock marker found in `url`, compared case-insensitively.
    pub fn mock_marker_in(&self, url: &str) -> Option<&str> {
        let url = url.to_ascii_lowercase();
        self.mock_artifact_markers
            .iter()
            .map(|marker| marker.trim())
            .filter(|marker| !marker.is_empty())
            .find(|marker| url.contains(&marker.to_ascii_lowercase()))
    }
}

impl UploadsConfig {
    pub fn attempt_timeout(&self, target: &UploadTarget) -> Duration {
        seconds(
            target.timeout_s.unwrap_or(self.attempt_timeout_s),
            1.0,
            600.0,
        )
    }
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_json::from_str(raw).context("pipeline config is not valid JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file and resolves every credential from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        let mut config = Self::from_json_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.resolve_secrets(&non_empty_env)?;
        Ok(config)
    }

    pub fn resolve_secrets(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        for target in &mut self.uploads.targets {
            let owner = format!("upload target '{}'", target.name);
            if let Some(secret) = target.auth.secret_mut() {
                secret.resolve(&owner, lookup)?;
            }
        }
        let owner = format!("processing endpoint '{}'", self.processing.name);
        if let Some(secret) = self.processing.auth.secret_mut() {
            secret.resolve(&owner, lookup)?;
        }
        Ok(())
    }

    pub fn fallback_policy(&self) -> FallbackPolicy<UploadTarget> {
        FallbackPolicy::new(
            self.uploads.targets.clone(),
            self.uploads.placeholder_url.clone(),
        )
    }

    fn validate(&self) -> Result<()> {
        if self.processing.endpoint().is_empty() {
            bail!("processing.endpoint is empty");
        }
        if !self.processing.status_url.contains("{task_id}") {
            bail!("processing.status_url must contain {{task_id}}");
        }
        let mut seen = Vec::new();
        for target in &self.uploads.targets {
            if target.name.trim().is_empty() || target.endpoint.trim().is_empty() {
                bail!("upload targets need a name and an endpoint");
            }
            if seen.contains(&target.name) {
                bail!("duplicate upload target '{}'", target.name);
            }
            seen.push(target.name.clone());
        }
        if self.uploads.targets.is_empty() && self.uploads.placeholder_url.is_none() {
            bail!("no upload targets configured");
        }
        Ok(())
    }
}

/// `--config` wins, then `$VTON_CONFIG`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| non_empty_env(CONFIG_PATH_ENV).map(PathBuf::from))
}

pub fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn seconds(value: f64, min: f64, max: f64) -> Duration {
    let value = if value.is_finite() { value } else { min };
    Duration::from_secs_f64(value.clamp(min, max))
}

fn default_true() -> bool {
    true
}

fn default_attempt_timeout() -> f64 {
    30.0
}

fn default_status_url() -> String {
    "{endpoint}/{task_id}".to_string()
}

fn default_poll_interval() -> f64 {
    10.0
}

fn default_poll_deadline() -> f64 {
    300.0
}

fn default_request_timeout() -> f64 {
    120.0
}

fn default_download_timeout() -> f64 {
    60.0
}
