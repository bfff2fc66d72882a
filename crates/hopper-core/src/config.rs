//! Configuration system for Hopper.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HOPPER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hopper/config.toml
//!   3. ~/.config/hopper/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Header carrying `servers.api_key` on every compute request.
pub const API_KEY_HEADER: &str = "RhinoComputeKey";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HopperConfig {
    pub servers: ServersConfig,
    pub solve: SolveConfig,
    pub definitions: DefinitionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersConfig {
    /// Remote compute servers, tried in this order before any local worker.
    pub urls: Vec<String>,
    /// Sent as the `RhinoComputeKey` header. Empty = no header.
    pub api_key: String,
    /// Per-request HTTP timeout. Minimum 1.
    pub http_timeout_secs: u64,
    /// Launch a local worker at start-up when no remote servers are listed.
    pub launch_worker_at_start: bool,
    /// Child workers the local worker should spawn.
    pub local_worker_count: u32,
    /// Port the local worker listens on.
    pub local_port: u16,
    /// Local worker executable. None = local launch unsupported.
    pub local_executable: Option<PathBuf>,
    pub hide_worker_windows: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveConfig {
    /// Max in-flight solve requests across all batches. Minimum 1.
    pub max_concurrent_requests: usize,
    /// Deepest nesting of definitions that call back into compute.
    pub recursion_limit: u32,
    pub cache_in_memory: bool,
    pub cache_on_server: bool,
    /// false = batches drain in the background and complete on an idle tick.
    pub synchronous: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionsConfig {
    /// Prefix joined onto relative definition paths. Empty = current dir.
    pub base_path: PathBuf,
}

/// Document tolerances and units sent with every solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSettings {
    pub absolute_tolerance: f64,
    pub angle_tolerance: f64,
    pub model_units: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            api_key: String::new(),
            http_timeout_secs: 100,
            launch_worker_at_start: true,
            local_worker_count: 1,
            local_port: 6500,
            local_executable: None,
            hide_worker_windows: true,
        }
    }
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            recursion_limit: 10,
            cache_in_memory: true,
            cache_on_server: true,
            synchronous: true,
        }
    }
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            absolute_tolerance: 0.001,
            angle_tolerance: 1.0,
            model_units: "Millimeters".into(),
        }
    }
}

// ── Bounded setters ───────────────────────────────────────────────────────────

impl ServersConfig {
    /// Replace the remote list; entries are trimmed and blanks dropped.
    pub fn set_urls<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.urls = urls
            .into_iter()
            .map(|u| u.as_ref().trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
    }

    pub fn set_http_timeout_secs(&mut self, secs: u64) {
        self.http_timeout_secs = secs.max(1);
    }

    pub fn set_local_worker_count(&mut self, count: u32) {
        self.local_worker_count = count;
    }
}

impl SolveConfig {
    pub fn set_max_concurrent_requests(&mut self, n: usize) {
        self.max_concurrent_requests = n.max(1);
    }

    pub fn set_recursion_limit(&mut self, limit: u32) {
        self.recursion_limit = limit;
    }
}

impl DefinitionsConfig {
    /// Resolve a definition path against `base_path`. URLs, GUIDs and
    /// absolute paths pass through untouched.
    pub fn resolve(&self, definition: &str) -> String {
        let lower = definition.to_ascii_lowercase();
        if lower.starts_with("http://")
            || lower.starts_with("https://")
            || uuid::Uuid::parse_str(definition).is_ok()
            || Path::new(definition).is_absolute()
            || self.base_path.as_os_str().is_empty()
        {
            return definition.to_string();
        }
        self.base_path.join(definition).to_string_lossy().into_owned()
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hopper")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HopperConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Same as [`load`](Self::load) but from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            HopperConfig::default()
        };
        config.clamp();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HOPPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HopperConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Values read from a file go through the same bounds as the setters.
    fn clamp(&mut self) {
        let urls = std::mem::take(&mut self.servers.urls);
        self.servers.set_urls(urls);
        self.servers.set_http_timeout_secs(self.servers.http_timeout_secs);
        self.solve
            .set_max_concurrent_requests(self.solve.max_concurrent_requests);
    }

    /// Apply HOPPER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HOPPER_SERVERS__URLS") {
            self.servers.set_urls(v.split(','));
        }
        if let Ok(v) = std::env::var("HOPPER_SERVERS__API_KEY") {
            self.servers.api_key = v;
        }
        if let Ok(v) = std::env::var("HOPPER_SERVERS__HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.servers.set_http_timeout_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("HOPPER_SOLVE__MAX_CONCURRENT_REQUESTS") {
            if let Ok(n) = v.parse() {
                self.solve.set_max_concurrent_requests(n);
            }
        }
        if let Ok(v) = std::env::var("HOPPER_SOLVE__SYNCHRONOUS") {
            self.solve.synchronous = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("HOPPER_SOLVE__CACHE_IN_MEMORY") {
            self.solve.cache_in_memory = v == "true" || v == "1";
        }
    }
}
