pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent_engine::engine::AgentEngine;
use crate::agent_engine::history::SessionHistory;
use crate::config::{AppConfig, Strategy};
use crate::executor::dispatcher::ActionExecutor;
use crate::executor::input::EnigoDriver;
use crate::llm::registry::ProviderRegistry;
use crate::perception::screenshot::XcapCapture;
use crate::perception::traits::ElementDetector;
use crate::perception::yolo_detector::YoloDetector;

pub use crate::agent_engine::loop_control::StopHandle;
pub use crate::agent_engine::state::{SessionOutcome, SessionReport};
pub use crate::errors::{OperatorError, OperatorResult};

/// What a front-end supplies alongside the objective.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `llm.active_model`.
    pub model_id: Option<String>,
    /// Overrides `operator.accurate_mode`.
    pub accurate_mode: Option<bool>,
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the
/// default `info` filter; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Run one objective against the real screen, mouse and keyboard.
pub async fn run(objective: &str, opts: RunOptions, stop: StopHandle) -> OperatorResult<SessionReport> {
    init_tracing();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };
    let engine = build_engine(&cfg, opts, stop)?;
    Ok(engine.run(objective).await)
}

fn build_engine(cfg: &AppConfig, opts: RunOptions, stop: StopHandle) -> OperatorResult<AgentEngine> {
    let registry = ProviderRegistry::from_config(cfg);
    let model_id = opts
        .model_id
        .unwrap_or_else(|| registry.active_model().to_string());
    let model = registry.resolve(&model_id)?;

    let mut operator = cfg.operator.clone();
    if let Some(accurate) = opts.accurate_mode {
        operator.accurate_mode = accurate;
    }

    let detector: Option<Arc<dyn ElementDetector>> = match (&model.strategy, &cfg.perception.detector_model_path) {
        (Strategy::Labeled, Some(path)) => YoloDetector::try_new(
            path,
            cfg.perception.conf_threshold,
            cfg.perception.iou_threshold,
        )
        .map(|d| Arc::new(d) as Arc<dyn ElementDetector>),
        (Strategy::Labeled, None) => {
            tracing::warn!(model = %model_id, "labeled strategy without perception.detector_model_path");
            None
        }
        (Strategy::Plain, _) => None,
    };

    let executor = ActionExecutor::new(Arc::new(EnigoDriver), cfg.input.clone());
    Ok(AgentEngine::new(model, Arc::new(XcapCapture), executor, operator, stop)
        .with_detector(detector)
        .with_history(SessionHistory::new())
        .with_screenshot_dir(cfg.perception.screenshot_dir.as_ref().map(PathBuf::from)))
}
