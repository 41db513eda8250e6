//! Sync YAML parsing with environment variable substitution.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use syncwire_protocol::ConfiguredCatalog;

use crate::mapper::NamespaceDefinition;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// `${SOURCE_NAMESPACE}` is left alone: it is the namespace mapper's
/// substitution token, not an environment reference.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut errors = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        if var_name == "SOURCE_NAMESPACE" {
            continue;
        }
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                errors.push(var_name.to_string());
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", errors.join(", "));
    }

    Ok(result)
}

/// One connector's transport location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Directory holding the connector's pipes and sentinel files.
    pub pipe_dir: PathBuf,
}

/// Queue capacities, fixed for the life of a sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub source_capacity: usize,
    pub destination_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            source_capacity: 1000,
            destination_capacity: 1000,
        }
    }
}

/// Liveness and teardown thresholds, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub heartbeat_secs: u64,
    pub destination_secs: u64,
    pub monitor_poll_secs: u64,
    pub termination_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 10_800,
            destination_secs: 7_200,
            monitor_poll_secs: 60,
            termination_secs: 60,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    #[must_use]
    pub fn destination(&self) -> Duration {
        Duration::from_secs(self.destination_secs)
    }

    #[must_use]
    pub fn monitor_poll(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_secs)
    }

    #[must_use]
    pub fn termination(&self) -> Duration {
        Duration::from_secs(self.termination_secs)
    }
}

fn default_namespace() -> NamespaceDefinition {
    NamespaceDefinition::Source
}

fn default_true() -> bool {
    true
}

/// Top-level sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
    /// Path to the configured catalog (JSON).
    pub catalog: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: NamespaceDefinition,
    #[serde(default)]
    pub stream_prefix: Option<String>,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// When false, liveness violations log a warning instead of failing
    /// the sync.
    #[serde(default = "default_true")]
    pub liveness_fatal: bool,
    /// Include extracted primary keys when logging oversized record lines.
    #[serde(default)]
    pub log_oversized_record_pks: bool,
    /// Peek the source's output for a SPEC message to pick its protocol
    /// version. Off means the current version is assumed.
    #[serde(default = "default_true")]
    pub detect_source_version: bool,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.buffers.source_capacity > 0 && self.buffers.destination_capacity > 0,
            "buffer capacities must be positive"
        );
        Ok(())
    }
}

/// Parse a sync YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_sync_str(yaml_str: &str) -> Result<SyncConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: SyncConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse sync YAML")?;
    config.validate()?;
    Ok(config)
}

/// Parse a sync YAML file.
pub fn parse_sync(path: &Path) -> Result<SyncConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sync file: {}", path.display()))?;
    parse_sync_str(&content)
}

/// Load and validate a configured catalog from JSON.
pub fn load_catalog(path: &Path) -> Result<ConfiguredCatalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    let catalog: ConfiguredCatalog =
        serde_json::from_str(&content).context("Failed to parse configured catalog")?;
    catalog
        .validate()
        .map_err(|err| anyhow::anyhow!(err))
        .context("Invalid configured catalog")?;
    Ok(catalog)
}
