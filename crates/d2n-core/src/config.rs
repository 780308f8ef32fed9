//! Configuration types for the d2n system
//!
//! Configuration is an explicit value built once at startup and passed to the
//! reconciler and adapters at construction time.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Error;

/// Timezone used when none is configured or the configured one is invalid
pub const DEFAULT_TIMEZONE: &str = "Asia/Seoul";

/// Main d2n configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct D2nConfig {
    /// Host daemon connection
    pub docker: DockerConfig,

    /// Record store connection
    pub notion: NotionConfig,

    /// Bucket names → remote database ids
    pub targets: TargetsConfig,

    /// Mapping cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// IANA timezone for last-seen timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Optional reconciler settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl D2nConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        self.docker.validate()?;
        self.notion.validate()?;
        self.targets.validate()?;
        self.cache.validate()?;
        Ok(())
    }

    /// Configured timezone, falling back to [`DEFAULT_TIMEZONE`] if invalid
    pub fn resolved_timezone(&self) -> Tz {
        resolve_timezone(&self.timezone)
    }
}

/// Parse an IANA timezone name, falling back to [`DEFAULT_TIMEZONE`]
pub fn resolve_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(
                "Invalid timezone: {}. Falling back to {}.",
                name,
                DEFAULT_TIMEZONE
            );
            chrono_tz::Asia::Seoul
        }
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Docker daemon connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Engine API endpoint, e.g. `unix:///var/run/docker.sock`,
    /// `tcp://127.0.0.1:2375` or `http://docker:2375`
    pub api_url: String,
}

/// Where the Engine API is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// HTTP base URL without a trailing slash (`tcp://` is served as plain HTTP)
    Http(String),
    /// Local Unix socket
    Unix(PathBuf),
}

impl DockerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let url = self.api_url.trim();
        if url.is_empty() {
            return Err(Error::config("Docker API URL cannot be empty"));
        }
        if let Some(path) = url.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::config(format!(
                    "Docker API URL '{url}' has no socket path"
                )));
            }
            return Ok(());
        }
        if !["tcp://", "http://", "https://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(Error::config(format!(
                "Docker API URL '{url}' must use unix://, tcp://, http:// or https://"
            )));
        }
        Ok(())
    }

    /// Parsed endpoint; call [`DockerConfig::validate`] first
    pub fn endpoint(&self) -> DockerEndpoint {
        let url = self.api_url.trim();
        if let Some(path) = url.strip_prefix("unix://") {
            return DockerEndpoint::Unix(PathBuf::from(path));
        }

        let url = url.trim_end_matches('/');
        match url.strip_prefix("tcp://") {
            Some(rest) => DockerEndpoint::Http(format!("http://{rest}")),
            None => DockerEndpoint::Http(url.to_string()),
        }
    }
}

/// Notion API connection
#[derive(Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    /// Integration token
    /// ⚠️ NEVER log this value
    pub api_key: String,

    /// API base URL override (tests, proxies)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl NotionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.api_key.trim().is_empty() {
            return Err(Error::config("Notion API key cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(Error::config("Notion request timeout must be > 0"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionConfig")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// One named destination database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTarget {
    /// Logical bucket name used in the `d2n.database` label
    pub name: String,
    /// Remote database id
    pub database_id: String,
}

/// Bucket mapping and default bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsConfig {
    /// Known destination databases
    #[serde(default)]
    pub databases: Vec<DatabaseTarget>,

    /// Name of the database used when a container names none (or an unknown one)
    #[serde(default)]
    pub default: String,
}

/// YAML document layout: `targets:` at the top level
#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(default)]
    targets: Option<TargetsConfig>,
}

impl TargetsConfig {
    /// Parse the `targets` section of a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        let file: Option<TargetsFile> = serde_yaml::from_str(yaml)?;
        file.and_then(|f| f.targets)
            .ok_or_else(|| Error::config("No targets configuration found in YAML file"))
    }

    /// Load the `targets` section from a YAML file
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "YAML configuration file '{}' could not be read: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.databases.is_empty() {
            return Err(Error::config("No database mappings found in configuration"));
        }

        for target in &self.databases {
            if target.name.trim().is_empty() || target.database_id.trim().is_empty() {
                return Err(Error::config(
                    "Every database mapping needs a non-empty name and database_id",
                ));
            }
        }

        if self.default.trim().is_empty() {
            return Err(Error::config("No default target configured"));
        }

        if !self.databases.iter().any(|t| t.name == self.default) {
            return Err(Error::config(format!(
                "Default target '{}' not found in database list",
                self.default
            )));
        }

        Ok(())
    }

    /// Resolve names to ids after validating
    pub fn bucket_map(&self) -> Result<BucketMap, Error> {
        self.validate()?;

        let by_name: HashMap<String, String> = self
            .databases
            .iter()
            .map(|t| (t.name.clone(), t.database_id.clone()))
            .collect();

        let default = by_name
            .get(&self.default)
            .cloned()
            .ok_or_else(|| Error::config(format!("Default target '{}' ID not found", self.default)))?;

        Ok(BucketMap { by_name, default })
    }
}

/// Validated mapping from bucket names to remote bucket ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMap {
    by_name: HashMap<String, String>,
    default: String,
}

impl BucketMap {
    /// Bucket id for a group name; unset or unknown groups use the default
    pub fn resolve(&self, group: Option<&str>) -> &str {
        match group {
            Some(name) => self.by_name.get(name).map_or_else(
                || {
                    tracing::debug!("Unknown target '{}', using default bucket", name);
                    self.default.as_str()
                },
                String::as_str,
            ),
            None => &self.default,
        }
    }

    pub fn default_bucket(&self) -> &str {
        &self.default
    }
}

/// Mapping cache backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// JSON file, survives restarts
    #[default]
    File,
    /// In-memory only
    Memory,
}

impl std::str::FromStr for CacheKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(CacheKind::File),
            "memory" => Ok(CacheKind::Memory),
            other => Err(Error::config(format!(
                "Cache type '{}' is not supported. Supported types: file, memory",
                other
            ))),
        }
    }
}

/// Mapping cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub kind: CacheKind,

    /// Cache file path (file backend only)
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Entry time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.ttl_secs == 0 {
            return Err(Error::config("Cache TTL must be > 0"));
        }
        if self.kind == CacheKind::File && self.path.as_os_str().is_empty() {
            return Err(Error::config("Cache path cannot be empty for the file cache"));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::default(),
            path: default_cache_path(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache.json")
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the monitoring event channel
    ///
    /// When full, new reconcile events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}
