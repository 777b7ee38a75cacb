use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use marcus_core::graph::GraphConfig;
use marcus_core::lease::LeaseConfig;
use marcus_core::CoordinatorConfig;

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marcus")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// `ai.*`: the LLM used for instruction synthesis and blocker analysis.
/// `ai.enabled = false` wires up `NullLanguageModel` and Marcus runs with
/// no model dependency at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AiSection {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "none".to_string(),
            model: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TaskLeaseSection {
    pub default_hours: f64,
    pub min_lease_hours: f64,
    pub max_lease_hours: f64,
    pub warning_hours: f64,
    pub renewal_decay_factor: f64,
    pub grace_period_minutes: i64,
    pub stuck_threshold_renewals: u32,
}

impl Default for TaskLeaseSection {
    fn default() -> Self {
        let d = LeaseConfig::default();
        Self {
            default_hours: d.default_hours,
            min_lease_hours: d.min_lease_hours,
            max_lease_hours: d.max_lease_hours,
            warning_hours: d.warning_hours,
            renewal_decay_factor: d.renewal_decay_factor,
            grace_period_minutes: d.grace_period_minutes,
            stuck_threshold_renewals: d.stuck_threshold_renewals,
        }
    }
}

impl From<&TaskLeaseSection> for LeaseConfig {
    fn from(s: &TaskLeaseSection) -> Self {
        Self {
            default_hours: s.default_hours,
            min_lease_hours: s.min_lease_hours,
            max_lease_hours: s.max_lease_hours,
            warning_hours: s.warning_hours,
            renewal_decay_factor: s.renewal_decay_factor,
            grace_period_minutes: s.grace_period_minutes,
            stuck_threshold_renewals: s.stuck_threshold_renewals,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BoardHealthSection {
    pub stale_task_days: i64,
    pub max_tasks_per_agent: u32,
}

impl Default for BoardHealthSection {
    fn default() -> Self {
        let d = CoordinatorConfig::default();
        Self {
            stale_task_days: d.stale_task_days,
            max_tasks_per_agent: d.max_tasks_per_agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DependencyInferenceSection {
    pub confidence_threshold: f64,
    pub max_chain_length: usize,
    pub cascade_decay: f64,
}

impl Default for DependencyInferenceSection {
    fn default() -> Self {
        let d = GraphConfig::default();
        Self {
            confidence_threshold: d.confidence_threshold,
            max_chain_length: d.max_chain_length,
            cascade_decay: d.cascade_decay,
        }
    }
}

impl From<&DependencyInferenceSection> for GraphConfig {
    fn from(s: &DependencyInferenceSection) -> Self {
        Self {
            confidence_threshold: s.confidence_threshold,
            max_chain_length: s.max_chain_length,
            cascade_decay: s.cascade_decay,
        }
    }
}

/// The on-disk / env-resolved shape of `config.toml`. Every field has a
/// default, and unknown keys are rejected at load time rather than
/// silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigFile {
    pub database_url: Option<String>,
    pub bind: String,
    pub port: u16,
    pub monitoring_interval_seconds: u64,
    pub stall_threshold_hours: f64,
    pub task_lease: TaskLeaseSection,
    pub board_health: BoardHealthSection,
    pub dependency_inference: DependencyInferenceSection,
    pub ai: AiSection,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            database_url: None,
            bind: "127.0.0.1".to_string(),
            port: 4317,
            monitoring_interval_seconds: 60,
            stall_threshold_hours: 4.0,
            task_lease: TaskLeaseSection::default(),
            board_health: BoardHealthSection::default(),
            dependency_inference: DependencyInferenceSection::default(),
            ai: AiSection::default(),
        }
    }
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

/// Fully resolved runtime configuration: CLI flag > env var > config file >
/// default, per field.
#[derive(Debug, Clone)]
pub struct MarcusConfig {
    pub database_url: Option<String>,
    pub bind: String,
    pub port: u16,
    pub monitoring_interval_seconds: u64,
    pub coordinator: CoordinatorConfig,
    pub ai: AiSection,
}

impl MarcusConfig {
    pub fn resolve(
        config_path_override: Option<PathBuf>,
        cli_database_url: Option<String>,
        cli_bind: Option<String>,
        cli_port: Option<u16>,
    ) -> Result<Self> {
        let path = config_path_override.unwrap_or_else(config_path);
        let file = load_config_file(&path)?;

        let database_url = cli_database_url
            .or_else(|| env::var("MARCUS_DATABASE_URL").ok())
            .or(file.database_url);

        let bind = cli_bind
            .or_else(|| env::var("MARCUS_BIND").ok())
            .unwrap_or(file.bind);

        let port = cli_port
            .or_else(|| env::var("MARCUS_PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(file.port);

        let monitoring_interval_seconds = env::var("MARCUS_MONITORING_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(file.monitoring_interval_seconds);

        let coordinator = CoordinatorConfig {
            max_tasks_per_agent: file.board_health.max_tasks_per_agent,
            stale_task_days: file.board_health.stale_task_days,
            lease: (&file.task_lease).into(),
            graph: (&file.dependency_inference).into(),
        };

        Ok(Self {
            database_url,
            bind,
            port,
            monitoring_interval_seconds,
            coordinator,
            ai: file.ai,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let file = ConfigFile::default();
        let text = toml::to_string(&file).unwrap();
        let parsed: ConfigFile = toml::from_str(&text).unwrap();
        assert_eq!(parsed.port, file.port);
        assert_eq!(parsed.task_lease.default_hours, file.task_lease.default_hours);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let text = "port = 9999\nbogus_field = 1\n";
        let err = toml::from_str::<ConfigFile>(text).unwrap_err();
        assert!(err.to_string().contains("bogus_field") || err.to_string().contains("unknown"));
    }

    #[test]
    fn resolve_uses_file_defaults_when_nothing_else_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let resolved = MarcusConfig::resolve(Some(path), None, None, None).unwrap();
        assert_eq!(resolved.port, 4317);
        assert_eq!(resolved.coordinator.max_tasks_per_agent, 3);
    }

    #[test]
    fn cli_flag_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let resolved =
            MarcusConfig::resolve(Some(path), None, None, Some(8080)).unwrap();
        assert_eq!(resolved.port, 8080);
    }
}
