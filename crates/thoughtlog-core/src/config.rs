use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::commit::DEFAULT_COMMIT_WINDOW;
use crate::remote::RemoteIdPolicy;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:14141";
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_FILE_POLL_MS: u64 = 1000;
pub const DEFAULT_BRANCH_POLL_MS: u64 = 2000;
pub const DEFAULT_COMMIT_POLL_MS: u64 = 3000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThoughtlogConfig {
    pub project_id: Option<String>,
    /// Base URL of the remote event API, without the `/events` suffix.
    pub api_base_url: Option<String>,
    pub sync_interval_ms: Option<u64>,
    pub file_poll_ms: Option<u64>,
    pub branch_poll_ms: Option<u64>,
    pub commit_poll_ms: Option<u64>,
    /// How many of the latest commits the commit detector examines per tick.
    pub commit_window: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    /// How ids are synthesized for remote events that arrive without one.
    pub remote_id_policy: Option<RemoteIdPolicy>,
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".thoughtlog.toml", ".thoughtlogrc"]
}

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(".thoughtlog.toml")
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    for key in ["HOME", "USERPROFILE"] {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
    }
    None
}

pub fn resolve_thoughtlog_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("THOUGHTLOG_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".thoughtlog"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_thoughtlog_home_dir().map(|home| home.join("config.toml"))
}

/// First readable project config, or `None`. Unparseable files are ignored.
pub fn load_config(project_root: &Path) -> Option<ThoughtlogConfig> {
    for name in config_filename_candidates() {
        let path = project_root.join(name);
        if path.is_file() {
            if let Ok(text) = fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str::<ThoughtlogConfig>(&text) {
                    return Some(config);
                }
            }
        }
    }
    None
}

pub fn load_global_config() -> Option<ThoughtlogConfig> {
    let path = global_config_path()?;
    if !path.is_file() {
        return None;
    }
    let text = fs::read_to_string(path).ok()?;
    toml::from_str::<ThoughtlogConfig>(&text).ok()
}

pub fn write_config(project_root: &Path, config: &ThoughtlogConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path(project_root);
    let body = toml::to_string_pretty(config)?;
    fs::write(&path, body)?;
    Ok(path)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Project,
    Global,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Project => "project",
            ConfigSource::Global => "global",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Setting<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedConfig {
    pub project_id: Setting<String>,
    pub api_base_url: Setting<String>,
    pub sync_interval_ms: Setting<u64>,
    pub file_poll_ms: Setting<u64>,
    pub branch_poll_ms: Setting<u64>,
    pub commit_poll_ms: Setting<u64>,
    pub commit_window: Setting<usize>,
    pub request_timeout_ms: Setting<u64>,
    pub remote_id_policy: Setting<RemoteIdPolicy>,
}

impl ResolvedConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.value)
    }

    pub fn file_poll(&self) -> Duration {
        Duration::from_millis(self.file_poll_ms.value)
    }

    pub fn branch_poll(&self) -> Duration {
        Duration::from_millis(self.branch_poll_ms.value)
    }

    pub fn commit_poll(&self) -> Duration {
        Duration::from_millis(self.commit_poll_ms.value)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.value)
    }
}

fn pick<T>(
    project: Option<T>,
    global: Option<T>,
    default: impl FnOnce() -> T,
) -> Setting<T> {
    if let Some(value) = project {
        return Setting { value, source: ConfigSource::Project };
    }
    if let Some(value) = global {
        return Setting { value, source: ConfigSource::Global };
    }
    Setting {
        value: default(),
        source: ConfigSource::Default,
    }
}

/// Project id used when none is configured: the root directory's name.
pub fn default_project_id(project_root: &Path) -> String {
    let resolved = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

/// Resolves every setting as project config > global config > built-in default.
pub fn resolve_config(project_root: &Path) -> ResolvedConfig {
    let project = load_config(project_root).unwrap_or_default();
    let global = load_global_config().unwrap_or_default();
    let non_blank = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    ResolvedConfig {
        project_id: pick(
            non_blank(project.project_id),
            non_blank(global.project_id),
            || default_project_id(project_root),
        ),
        api_base_url: pick(
            non_blank(project.api_base_url),
            non_blank(global.api_base_url),
            || DEFAULT_API_BASE_URL.to_string(),
        ),
        sync_interval_ms: pick(project.sync_interval_ms, global.sync_interval_ms, || {
            DEFAULT_SYNC_INTERVAL_MS
        }),
        file_poll_ms: pick(project.file_poll_ms, global.file_poll_ms, || DEFAULT_FILE_POLL_MS),
        branch_poll_ms: pick(project.branch_poll_ms, global.branch_poll_ms, || {
            DEFAULT_BRANCH_POLL_MS
        }),
        commit_poll_ms: pick(project.commit_poll_ms, global.commit_poll_ms, || {
            DEFAULT_COMMIT_POLL_MS
        }),
        commit_window: pick(project.commit_window, global.commit_window, || {
            DEFAULT_COMMIT_WINDOW
        }),
        request_timeout_ms: pick(project.request_timeout_ms, global.request_timeout_ms, || {
            DEFAULT_REQUEST_TIMEOUT_MS
        }),
        remote_id_policy: pick(project.remote_id_policy, global.remote_id_policy, || {
            RemoteIdPolicy::default()
        }),
    }
}
