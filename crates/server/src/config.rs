use crate::functions;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tierflow_core::events::EventLog;
use tierflow_core::storage::{InMemoryEventLog, InMemoryReportStore, JsonlEventLog};
use tierflow_core::{
    EngineConfig, FunctionRegistry, LocalTierPool, TierConfig, WorkflowEngine, WorkflowSpec,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,

    /// Built-in function name -> tier name
    #[serde(default = "default_functions")]
    pub functions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Write run events to gzip JSONL files under the data directory
    #[serde(default = "default_persist_events")]
    pub persist_events: bool,

    #[serde(default = "default_event_log_dir")]
    pub event_log_dir: String,
}

fn default_persist_events() -> bool {
    true
}

fn default_event_log_dir() -> String {
    "events".to_string()
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig::new("light").with_max_concurrency(16),
        TierConfig::new("heavy")
            .with_max_concurrency(4)
            .with_timeout_secs(300),
    ]
}

fn default_functions() -> BTreeMap<String, String> {
    [("echo", "light"), ("sum", "light"), ("fail", "light"), ("sleep", "heavy")]
        .into_iter()
        .map(|(f, t)| (f.to_string(), t.to_string()))
        .collect()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist_events: default_persist_events(),
            event_log_dir: default_event_log_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
            tiers: default_tiers(),
            functions: default_functions(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;
        config.validate()?;

        Ok(config)
    }

    /// Every function must map to a configured tier, and tier names must be unique
    pub fn validate(&self) -> Result<()> {
        let mut tier_names = HashSet::new();
        for tier in &self.tiers {
            if !tier_names.insert(tier.name.as_str()) {
                bail!("Tier '{}' is configured more than once", tier.name);
            }
        }

        for (function, tier) in &self.functions {
            if !tier_names.contains(tier.as_str()) {
                bail!(
                    "Function '{}' is routed to tier '{}', which is not configured",
                    function,
                    tier
                );
            }
        }

        Ok(())
    }

    /// Get the event log path
    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.event_log_dir)
    }
}

/// Load a workflow spec from a `.json` or `.toml` file
pub fn load_workflow(path: &Path) -> Result<WorkflowSpec> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;

    let workflow = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content).context("Failed to parse TOML workflow")?,
        _ => serde_json::from_str(&content).context("Failed to parse JSON workflow")?,
    };

    Ok(workflow)
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<FunctionRegistry>,
    pub event_log: Arc<dyn EventLog>,
    pub reports: Arc<InMemoryReportStore>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let mut registry = FunctionRegistry::new();
        functions::register_builtins(&mut registry, &config.functions)?;
        let registry = Arc::new(registry);

        let pool = Arc::new(LocalTierPool::new(registry.clone(), config.tiers.clone()));

        let event_log: Arc<dyn EventLog> = if config.storage.persist_events {
            Arc::new(
                JsonlEventLog::new(config.event_log_path())
                    .context("Failed to create event log")?,
            )
        } else {
            Arc::new(InMemoryEventLog::new())
        };

        let reports = Arc::new(InMemoryReportStore::new());

        let engine = Arc::new(
            WorkflowEngine::new(registry.clone(), pool, event_log.clone())
                .with_config(config.engine.clone())
                .with_report_store(reports.clone()),
        );

        tracing::info!(
            "Registered {} function(s) across {} tier(s), cascade={:?}",
            registry.functions().len(),
            config.tiers.len(),
            config.engine.cascade
        );

        Ok(Self {
            engine,
            registry,
            event_log,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tierflow_core::CascadePolicy;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig::load(
            &temp_dir.path().join("absent.toml"),
            temp_dir.path().to_path_buf(),
        )
        .unwrap();

        assert_eq!(config.engine.cascade, CascadePolicy::HaltAll);
        assert_eq!(config.functions["sleep"], "heavy");
        assert_eq!(config.event_log_path(), temp_dir.path().join("events"));
    }

    #[test]
    fn test_parse_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tierflow.toml");
        std::fs::write(
            &path,
            r#"
[engine]
cascade = "dependents_only"

[storage]
persist_events = false

[[tiers]]
name = "payments"
max_concurrency = 2
timeout_secs = 10

[functions]
echo = "payments"
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path, temp_dir.path().to_path_buf()).unwrap();

        assert_eq!(config.engine.cascade, CascadePolicy::DependentsOnly);
        assert!(!config.storage.persist_events);
        assert_eq!(config.tiers.len(), 1);
        assert_eq!(config.tiers[0].timeout_secs, Some(10));
        assert_eq!(config.functions.len(), 1);
    }

    #[test]
    fn test_function_on_unknown_tier_rejected() {
        let mut config = ServerConfig::default();
        config
            .functions
            .insert("echo".to_string(), "gpu".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tier 'gpu'"));
    }

    #[test]
    fn test_load_workflow_json_and_toml() {
        let temp_dir = TempDir::new().unwrap();

        let json_path = temp_dir.path().join("wf.json");
        std::fs::write(
            &json_path,
            r#"{ "name": "j", "stages": [ { "id": "a", "function": "echo" } ] }"#,
        )
        .unwrap();
        assert_eq!(load_workflow(&json_path).unwrap().stages.len(), 1);

        let toml_path = temp_dir.path().join("wf.toml");
        std::fs::write(
            &toml_path,
            r#"
name = "t"

[[stages]]
id = "a"
function = "echo"

[[stages]]
id = "b"
function = "sum"
depends_on = ["a"]
params = { values = [1, 2] }
"#,
        )
        .unwrap();
        let workflow = load_workflow(&toml_path).unwrap();
        assert_eq!(workflow.name, "t");
        assert_eq!(workflow.stages[1].depends_on[0].0, "a");
    }
}
