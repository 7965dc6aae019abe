use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{OperatorError, OperatorResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Model identifier used when the front-end does not name one.
    #[serde(default)]
    pub active_model: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Model identifiers the operator can be started with.
    #[serde(default)]
    pub models: HashMap<String, ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var OPERATOR_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Binds a model identifier to a provider, a wire model name and a response strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this model.
    pub temperature: Option<f64>,
}

/// How the model is asked to express where to click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Raw percentage / fractional coordinates.
    #[default]
    Plain,
    /// Labels drawn over detected elements (`~12`).
    Labeled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Hard ceiling on executed turns per objective.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Consecutive unparseable responses tolerated before aborting.
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,
    #[serde(default)]
    pub accurate_mode: bool,
    #[serde(default = "default_refine_crop_px")]
    pub refine_crop_px: u32,
    /// Pause before each capture so animations can finish.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub summarize_on_done: bool,
    /// Labeled strategy only: ask a second, concurrent "which label" question.
    #[serde(default)]
    pub cross_check: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_parse_retries: default_max_parse_retries(),
            accurate_mode: false,
            refine_crop_px: default_refine_crop_px(),
            settle_delay_ms: default_settle_delay_ms(),
            summarize_on_done: false,
            cross_check: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_move_duration_ms")]
    pub move_duration_ms: u64,
    #[serde(default = "default_move_steps")]
    pub move_steps: u32,
    #[serde(default = "default_true")]
    pub settle_circle: bool,
    #[serde(default = "default_settle_radius_px")]
    pub settle_radius_px: u32,
    #[serde(default = "default_key_dwell_ms")]
    pub key_dwell_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            move_duration_ms: default_move_duration_ms(),
            move_steps: default_move_steps(),
            settle_circle: true,
            settle_radius_px: default_settle_radius_px(),
            key_dwell_ms: default_key_dwell_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// YOLO ONNX model used by the labeled strategy.
    #[serde(default)]
    pub detector_model_path: Option<String>,
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    /// Directory where per-turn screenshots are written. Nothing is written when unset.
    #[serde(default)]
    pub screenshot_dir: Option<String>,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            detector_model_path: None,
            conf_threshold: default_conf_threshold(),
            iou_threshold: default_iou_threshold(),
            screenshot_dir: None,
        }
    }
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_parse_retries() -> u32 {
    2
}

fn default_refine_crop_px() -> u32 {
    200
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_move_duration_ms() -> u64 {
    500
}

fn default_move_steps() -> u32 {
    20
}

fn default_settle_radius_px() -> u32 {
    10
}

fn default_key_dwell_ms() -> u64 {
    100
}

fn default_conf_threshold() -> f32 {
    0.3
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> OperatorResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(OperatorError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn parse_config(content: &str) -> OperatorResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.operator.max_iterations == 0 {
        return Err(OperatorError::Config(
            "operator.max_iterations must be at least 1".into(),
        ));
    }
    Ok(config)
}

pub fn load_config() -> OperatorResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), model = %config.llm.active_model, "config loaded");
    Ok(config)
}
