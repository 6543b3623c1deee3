use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KitError, Result};

/// Top-level Kitflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KitflowConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub audit: Option<AuditConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Default for KitflowConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            orchestrator: OrchestratorConfig::default(),
            audit: None,
            registry: RegistryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Sessions older than this are reclaimed by the expiry sweep.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Capacity of the execution event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
    /// How often the session sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
            event_bus_capacity: default_event_bus_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// JSONL audit trail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable the audit logger (default: true when section is present).
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Directory for audit files. Default: <workspace>/audit
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Keep state snapshots attached to stage events (default: true).
    #[serde(default = "default_include_snapshots")]
    pub include_snapshots: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            include_snapshots: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Kit ids forced inactive at startup.
    #[serde(default)]
    pub disabled_kits: Vec<String>,
}

fn default_workspace() -> String { "~/.kitflow".to_string() }
fn default_session_timeout_secs() -> u64 { 1800 }
fn default_event_bus_capacity() -> usize { 256 }
fn default_sweep_interval_secs() -> u64 { 300 }
fn default_audit_enabled() -> bool { true }
fn default_include_snapshots() -> bool { true }

impl KitflowConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| KitError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| KitError::Config(e.to_string()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        let ws = &self.workspace;
        if let Some(rest) = ws.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(ws)
    }

    /// Resolve the audit log directory, if auditing is enabled.
    pub fn audit_dir(&self) -> Option<PathBuf> {
        let audit = self.audit.as_ref().filter(|a| a.enabled)?;
        Some(match audit.log_dir {
            Some(ref dir) => PathBuf::from(dir),
            None => self.workspace_dir().join("audit"),
        })
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
