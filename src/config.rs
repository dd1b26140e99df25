//! Layered configuration: environment variables override a project config
//! file (`.maker.toml`, falling back to `.maker.json`), which overrides
//! built-in defaults. Mirrors the orchestrator's `env > project config >
//! global config > defaults` precedence, minus the global `~/.maker/`
//! layer, which this crate folds into the project layer for simplicity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_maker_mode() -> MakerMode {
    MakerMode::High
}

fn default_candidates() -> usize {
    5
}

fn default_quorum() -> usize {
    3
}

fn default_max_iterations() -> u32 {
    25
}

fn default_kv_path() -> PathBuf {
    PathBuf::from(".maker/state.db")
}

/// Resource mode controlling MAKER's fan-out width and review strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MakerMode {
    /// Dedicated reviewer agent, full N-candidate fan-out.
    High,
    /// Planner reflects on its own output instead of a dedicated reviewer.
    Low,
}

/// Per-agent-role endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpointConfig {
    pub url: String,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_maker_mode")]
    pub maker_mode: MakerMode,
    #[serde(default = "default_candidates")]
    pub candidates: usize,
    #[serde(default = "default_quorum")]
    pub quorum: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_kv_path")]
    pub kv_path: PathBuf,
    #[serde(default)]
    pub agents: HashMap<String, AgentEndpointConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            log_level: default_log_level(),
            maker_mode: default_maker_mode(),
            candidates: default_candidates(),
            quorum: default_quorum(),
            max_iterations: default_max_iterations(),
            kv_path: default_kv_path(),
            agents: HashMap::new(),
        }
    }
}

/// Partial override layer, as read from a config file or built from env vars.
/// All fields optional so later layers only override what they set.
#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    workspace: Option<PathBuf>,
    log_level: Option<String>,
    maker_mode: Option<MakerMode>,
    candidates: Option<usize>,
    quorum: Option<usize>,
    max_iterations: Option<u32>,
    kv_path: Option<PathBuf>,
    #[serde(default)]
    agents: HashMap<String, AgentEndpointConfig>,
}

impl ConfigLayer {
    fn apply(self, base: &mut AppConfig) {
        if let Some(v) = self.workspace {
            base.workspace = v;
        }
        if let Some(v) = self.log_level {
            base.log_level = v;
        }
        if let Some(v) = self.maker_mode {
            base.maker_mode = v;
        }
        if let Some(v) = self.candidates {
            base.candidates = v;
        }
        if let Some(v) = self.quorum {
            base.quorum = v;
        }
        if let Some(v) = self.max_iterations {
            base.max_iterations = v;
        }
        if let Some(v) = self.kv_path {
            base.kv_path = v;
        }
        for (k, v) in self.agents {
            base.agents.insert(k, v);
        }
    }
}

/// Load configuration: defaults -> project config file -> environment.
pub fn load_config(project_root: &Path) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::default();

    if let Some(layer) = load_file_layer(project_root)? {
        layer.apply(&mut config);
    }

    load_env_layer().apply(&mut config);

    Ok(config)
}

fn load_file_layer(project_root: &Path) -> Result<Option<ConfigLayer>, AppError> {
    let toml_path = project_root.join(".maker.toml");
    if toml_path.exists() {
        let text = std::fs::read_to_string(&toml_path)?;
        let layer: ConfigLayer = toml::from_str(&text).map_err(|e| {
            AppError::configuration(e.to_string(), Some(&toml_path.display().to_string()))
        })?;
        return Ok(Some(layer));
    }

    let json_path = project_root.join(".maker.json");
    if json_path.exists() {
        let text = std::fs::read_to_string(&json_path)?;
        let layer: ConfigLayer = serde_json::from_str(&text).map_err(|e| {
            AppError::configuration(e.to_string(), Some(&json_path.display().to_string()))
        })?;
        return Ok(Some(layer));
    }

    Ok(None)
}

fn load_env_layer() -> ConfigLayer {
    let mut layer = ConfigLayer::default();

    if let Ok(v) = std::env::var("MAKER_WORKSPACE") {
        layer.workspace = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("MAKER_LOG_LEVEL") {
        layer.log_level = Some(v.to_lowercase());
    }
    if let Ok(v) = std::env::var("MAKER_MODE") {
        layer.maker_mode = match v.to_lowercase().as_str() {
            "low" => Some(MakerMode::Low),
            "high" => Some(MakerMode::High),
            _ => None,
        };
    }
    if let Ok(v) = std::env::var("MAKER_CANDIDATES") {
        layer.candidates = v.parse().ok();
    }
    if let Ok(v) = std::env::var("MAKER_QUORUM") {
        layer.quorum = v.parse().ok();
    }
    if let Ok(v) = std::env::var("MAKER_MAX_ITERATIONS") {
        layer.max_iterations = v.parse().ok();
    }
    if let Ok(v) = std::env::var("MAKER_KV_PATH") {
        layer.kv_path = Some(PathBuf::from(v));
    }

    layer
}
