//! Environment configuration for d2nd
//!
//! Everything except the bucket mapping comes from environment variables; the
//! bucket mapping lives in the YAML file named by `CONFIG_FILE_PATH`.
//!
//! Variables missing from the process environment are filled in from the
//! `.env` file named by `ENV_FILE_PATH`. Process variables always win.

use anyhow::{Context, Result};
use d2n_core::config::{CacheKind, DEFAULT_TIMEZONE, EngineConfig};
use d2n_core::{CacheConfig, D2nConfig, DockerConfig, NotionConfig, TargetsConfig};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_ENV_FILE_PATH: &str = "config/.env";
const DEFAULT_CONFIG_FILE_PATH: &str = "config/config.yaml";
const DEFAULT_CACHE_PATH: &str = "data/cache.json";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    pub docker_api_url: String,
    pub notion_api_key: String,
    pub timezone: String,
    pub config_file_path: PathBuf,
    pub cache_type: String,
    pub cache_path: PathBuf,
    pub cache_ttl_secs: u64,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

// The API key must never reach logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("docker_api_url", &self.docker_api_url)
            .field("notion_api_key", &"<REDACTED>")
            .field("timezone", &self.timezone)
            .field("config_file_path", &self.config_file_path)
            .field("cache_type", &self.cache_type)
            .field("cache_path", &self.cache_path)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("log_level", &self.log_level)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables and the `.env` file
    pub fn from_env() -> Result<Self> {
        Self::from_process_and_env_file(|key| env::var(key).ok())
    }

    /// Load configuration from `process`, filling gaps from the `.env` file
    ///
    /// The file is `ENV_FILE_PATH` (looked up in `process`) or
    /// `config/.env`. A missing file is not an error.
    pub fn from_process_and_env_file(process: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_file = process("ENV_FILE_PATH")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENV_FILE_PATH.to_string());
        let file_vars = load_env_file(Path::new(&env_file))?;

        Self::from_lookup(|key| process(key).or_else(|| file_vars.get(key).cloned()))
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cache_ttl_secs = match non_empty("D2N_CACHE_TTL_SECS") {
            Some(raw) => raw.trim().parse().with_context(|| {
                format!(
                    "D2N_CACHE_TTL_SECS '{}' is not a whole number of seconds",
                    raw
                )
            })?,
            None => DEFAULT_CACHE_TTL_SECS,
        };

        Ok(Self {
            docker_api_url: non_empty("DOCKER_API_URL").context(
                "DOCKER_API_URL is required. Set it via: export DOCKER_API_URL=unix:///var/run/docker.sock",
            )?,
            notion_api_key: non_empty("NOTION_API_KEY").context(
                "NOTION_API_KEY is required. Set it via: export NOTION_API_KEY=your_integration_token",
            )?,
            timezone: non_empty("TZ").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            config_file_path: non_empty("CONFIG_FILE_PATH")
                .unwrap_or_else(|| DEFAULT_CONFIG_FILE_PATH.to_string())
                .into(),
            cache_type: non_empty("D2N_CACHE_TYPE").unwrap_or_else(|| "file".to_string()),
            cache_path: non_empty("D2N_CACHE_PATH")
                .unwrap_or_else(|| DEFAULT_CACHE_PATH.to_string())
                .into(),
            cache_ttl_secs,
            log_level: normalize_log_level(
                &non_empty("D2N_LOG_LEVEL")
                    .or_else(|| non_empty("LOG_LEVEL"))
                    .unwrap_or_else(|| "info".to_string()),
            ),
            log_dir: non_empty("D2N_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Validate the configuration
    ///
    /// Checks placeholder credentials, the endpoint scheme and the cache
    /// settings. The YAML file is checked when it is loaded by
    /// [`Config::to_d2n_config`].
    pub fn validate(&self) -> Result<()> {
        // Check for obvious placeholder keys (common mistake)
        let key_lower = self.notion_api_key.to_lowercase();
        if key_lower.contains("your_integration_token")
            || key_lower.contains("replace_me")
            || key_lower == "token"
        {
            anyhow::bail!(
                "NOTION_API_KEY appears to be a placeholder. \
                Use the secret of a Notion integration shared with your databases."
            );
        }

        DockerConfig {
            api_url: self.docker_api_url.clone(),
        }
        .validate()
        .context("DOCKER_API_URL is invalid")?;

        let kind: CacheKind = self
            .cache_type
            .parse()
            .context("D2N_CACHE_TYPE is invalid")?;

        if kind == CacheKind::File && self.cache_path.as_os_str().is_empty() {
            anyhow::bail!("D2N_CACHE_PATH cannot be empty when D2N_CACHE_TYPE=file");
        }

        if self.cache_ttl_secs == 0 {
            anyhow::bail!("D2N_CACHE_TTL_SECS must be greater than 0");
        }

        Ok(())
    }

    /// Build the core configuration, reading the targets file
    pub fn to_d2n_config(&self) -> Result<D2nConfig> {
        let targets = TargetsConfig::load_yaml(&self.config_file_path).with_context(|| {
            format!(
                "Failed to load targets from {}",
                self.config_file_path.display()
            )
        })?;

        let config = D2nConfig {
            docker: DockerConfig {
                api_url: self.docker_api_url.clone(),
            },
            notion: NotionConfig::new(self.notion_api_key.clone()),
            targets,
            cache: CacheConfig {
                kind: self.cache_type.parse()?,
                path: self.cache_path.clone(),
                ttl_secs: self.cache_ttl_secs,
            },
            timezone: self.timezone.clone(),
            engine: EngineConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Read `KEY=value` pairs from a `.env` file; a missing file yields none
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter
            .collect::<std::result::Result<HashMap<_, _>, _>>()
            .with_context(|| format!("Failed to parse env file {}", path.display())),
        Err(e) if e.not_found() => Ok(HashMap::new()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read env file {}", path.display()))
        }
    }
}

/// Map a level name to a tracing level
///
/// Accepts `warning` and `critical` as aliases. Unknown names fall back to
/// `info` with a warning on stderr; logging is not up yet at this point.
fn normalize_log_level(raw: &str) -> String {
    let level = match raw.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => {
            eprintln!("Warning: Invalid log level '{}'. Defaulting to info.", raw);
            "info"
        }
    };
    level.to_string()
}
