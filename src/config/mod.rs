//! Gateway settings: built-in defaults, then an optional TOML file, then
//! environment overrides. Secrets are read only from the environment or
//! `.env`, with the process environment winning.

pub mod dotenv;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::generators::flux::DEFAULT_FLUX_API_BASE;
use crate::generators::pixellab::DEFAULT_PIXELLAB_API_BASE;
use crate::generators::replicate::DEFAULT_REPLICATE_API_BASE;

pub const DEFAULT_BIND: &str = "127.0.0.1:8790";
pub const DEFAULT_SETTINGS_PATH: &str = "config/gateway.settings.toml";
pub const SETTINGS_PATH_ENV: &str = "IMAGEGEN_SETTINGS";
pub const API_KEY_ENV: &str = "IMAGEGEN_API_KEY";
pub const AUTH_DEV_BYPASS_ENV: &str = "IMAGEGEN_AUTH_DEV_BYPASS";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_FLUX_POLL_INTERVAL: Duration = Duration::from_millis(400);
const DEFAULT_REPLICATE_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("failed to read .env: {0}")]
    Dotenv(#[from] std::io::Error),
}

#[derive(Clone, PartialEq, Eq)]
pub struct FluxSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ReplicateSettings {
    pub api_base: String,
    pub api_token: Option<String>,
    pub poll_interval: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PixelLabSettings {
    pub api_base: String,
    pub api_key: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub bind: SocketAddr,
    /// Inbound bearer secret. `None` rejects every authenticated request.
    pub api_key: Option<String>,
    pub auth_dev_bypass: bool,
    pub http_timeout: Duration,
    pub flux: FluxSettings,
    pub replicate: ReplicateSettings,
    pub pixellab: PixelLabSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8790)),
            api_key: None,
            auth_dev_bypass: false,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            flux: FluxSettings {
                api_base: DEFAULT_FLUX_API_BASE.to_string(),
                api_key: None,
                poll_interval: DEFAULT_FLUX_POLL_INTERVAL,
            },
            replicate: ReplicateSettings {
                api_base: DEFAULT_REPLICATE_API_BASE.to_string(),
                api_token: None,
                poll_interval: DEFAULT_REPLICATE_POLL_INTERVAL,
            },
            pixellab: PixelLabSettings {
                api_base: DEFAULT_PIXELLAB_API_BASE.to_string(),
                api_key: None,
            },
        }
    }
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redacted(secret: &Option<String>) -> &'static str {
            if secret.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("GatewaySettings")
            .field("bind", &self.bind)
            .field("api_key", &redacted(&self.api_key))
            .field("auth_dev_bypass", &self.auth_dev_bypass)
            .field("http_timeout", &self.http_timeout)
            .field("flux_api_base", &self.flux.api_base)
            .field("flux_api_key", &redacted(&self.flux.api_key))
            .field("flux_poll_interval", &self.flux.poll_interval)
            .field("replicate_api_base", &self.replicate.api_base)
            .field("replicate_api_token", &redacted(&self.replicate.api_token))
            .field("replicate_poll_interval", &self.replicate.poll_interval)
            .field("pixellab_api_base", &self.pixellab.api_base)
            .field("pixellab_api_key", &redacted(&self.pixellab.api_key))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    server: ServerSection,
    flux: BackendSection,
    replicate: BackendSection,
    pixellab: BackendSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind: Option<String>,
    auth_dev_bypass: Option<bool>,
    http_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackendSection {
    api_base: Option<String>,
    poll_interval_ms: Option<u64>,
}

impl GatewaySettings {
    /// Resolves settings for a process started in `root`.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let env = dotenv::layered_env(root, std::env::vars())?;
        Self::resolve(root, &env)
    }

    /// Resolves settings against an explicit variable map.
    pub fn resolve(root: &Path, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        let explicit = lookup(env, SETTINGS_PATH_ENV).map(PathBuf::from);
        let path = match explicit {
            Some(p) if p.is_absolute() => p,
            Some(p) => root.join(p),
            None => root.join(DEFAULT_SETTINGS_PATH),
        };
        if let Some(file) = read_settings_file(path.as_path())? {
            settings.apply_file(file)?;
        }
        settings.apply_env(env)?;
        Ok(settings)
    }

    fn apply_file(&mut self, file: SettingsFile) -> Result<(), ConfigError> {
        if let Some(bind) = file.server.bind {
            self.bind = parse_bind("server.bind", bind.as_str())?;
        }
        if let Some(bypass) = file.server.auth_dev_bypass {
            self.auth_dev_bypass = bypass;
        }
        if let Some(ms) = file.server.http_timeout_ms {
            self.http_timeout = Duration::from_millis(ms);
        }
        apply_backend(&mut self.flux.api_base, Some(&mut self.flux.poll_interval), file.flux);
        apply_backend(
            &mut self.replicate.api_base,
            Some(&mut self.replicate.poll_interval),
            file.replicate,
        );
        apply_backend(&mut self.pixellab.api_base, None, file.pixellab);
        Ok(())
    }

    fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(bind) = lookup(env, "IMAGEGEN_BIND") {
            self.bind = parse_bind("IMAGEGEN_BIND", bind)?;
        }
        if let Some(value) = lookup(env, AUTH_DEV_BYPASS_ENV) {
            self.auth_dev_bypass = is_truthy(value);
        }
        if let Some(value) = lookup(env, "IMAGEGEN_HTTP_TIMEOUT_MS") {
            self.http_timeout = parse_millis("IMAGEGEN_HTTP_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup(env, "FLUX_API_BASE") {
            self.flux.api_base = value.to_string();
        }
        if let Some(value) = lookup(env, "FLUX_POLL_INTERVAL_MS") {
            self.flux.poll_interval = parse_millis("FLUX_POLL_INTERVAL_MS", value)?;
        }
        if let Some(value) = lookup(env, "REPLICATE_API_BASE") {
            self.replicate.api_base = value.to_string();
        }
        if let Some(value) = lookup(env, "REPLICATE_POLL_INTERVAL_MS") {
            self.replicate.poll_interval = parse_millis("REPLICATE_POLL_INTERVAL_MS", value)?;
        }
        if let Some(value) = lookup(env, "PIXELLAB_API_BASE") {
            self.pixellab.api_base = value.to_string();
        }

        self.api_key = lookup(env, API_KEY_ENV).map(str::to_string);
        self.flux.api_key = lookup(env, "BFL_API_KEY")
            .or_else(|| lookup(env, "FLUX_API_KEY"))
            .map(str::to_string);
        self.replicate.api_token = lookup(env, "REPLICATE_API_TOKEN").map(str::to_string);
        self.pixellab.api_key = lookup(env, "PIXELLAB_API_KEY").map(str::to_string);
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|error| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    toml::from_str::<SettingsFile>(raw.as_str())
        .map(Some)
        .map_err(|error| ConfigError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })
}

fn apply_backend(api_base: &mut String, poll_interval: Option<&mut Duration>, section: BackendSection) {
    if let Some(base) = section.api_base.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        *api_base = base;
    }
    if let (Some(target), Some(ms)) = (poll_interval, section.poll_interval_ms) {
        *target = Duration::from_millis(ms);
    }
}

fn lookup<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_bind(key: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
