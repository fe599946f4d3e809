//! Agent configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/transport-agent/agent.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `upstream.url`

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub schema_version: u32,
    pub upstream: UpstreamConfig,
    pub generation: GenerationConfig,
}

/// The upstream WebSocket endpoint this agent dials out to.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub reconnect_interval: Duration,
    pub reconnect_max_interval: Duration,
}

/// Tunables for the cancellable-generation registry.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub stale_threshold: Duration,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    upstream: Option<RawUpstreamConfig>,
    generation: Option<RawGenerationConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUpstreamConfig {
    url: Option<String>,
    ping_interval_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    reconnect_interval_ms: Option<u64>,
    reconnect_max_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawGenerationConfig {
    stale_threshold_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load agent config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<AgentConfig, AgentConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| AgentConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load agent config from the default path `/etc/transport-agent/agent.toml`.
pub fn load_config() -> Result<AgentConfig, AgentConfigError> {
    load_config_from_path(Path::new("/etc/transport-agent/agent.toml"))
}

/// Load agent config from a TOML string, applying the documented defaults
/// for every optional field.
pub fn load_config_from_str(toml_str: &str) -> Result<AgentConfig, AgentConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| AgentConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| AgentConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(AgentConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let raw_upstream = raw
        .upstream
        .ok_or_else(|| AgentConfigError::MissingField("upstream".to_owned()))?;
    let url = raw_upstream
        .url
        .ok_or_else(|| AgentConfigError::MissingField("upstream.url".to_owned()))?;
    let upstream = UpstreamConfig {
        url,
        ping_interval: Duration::from_millis(raw_upstream.ping_interval_ms.unwrap_or(30_000)),
        read_timeout: Duration::from_millis(raw_upstream.read_timeout_ms.unwrap_or(60_000)),
        write_timeout: Duration::from_millis(raw_upstream.write_timeout_ms.unwrap_or(10_000)),
        reconnect_interval: Duration::from_millis(
            raw_upstream.reconnect_interval_ms.unwrap_or(5_000),
        ),
        reconnect_max_interval: Duration::from_millis(
            raw_upstream.reconnect_max_interval_ms.unwrap_or(60_000),
        ),
    };

    let generation = GenerationConfig {
        stale_threshold: Duration::from_secs(
            raw.generation
                .and_then(|g| g.stale_threshold_secs)
                .unwrap_or(5 * 60),
        ),
    };

    Ok(AgentConfig {
        schema_version,
        upstream,
        generation,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum AgentConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for AgentConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentConfigError::Io(s) => write!(f, "IO error: {}", s),
            AgentConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            AgentConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            AgentConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for AgentConfigError {}
