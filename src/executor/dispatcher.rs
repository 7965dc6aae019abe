// Action dispatcher: typed actions → input primitives → outcome strings.
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::state::{Action, ClickAction};
use crate::config::InputConfig;
use crate::errors::OperatorResult;
use crate::executor::coordinator::percent_to_pixel;
use crate::executor::input::InputDriver;
use crate::perception::types::ScreenshotMeta;

/// Pause between opening the application launcher and typing into it.
const LAUNCHER_DELAY_MS: u64 = 1000;
/// Points on the settle circle.
const SETTLE_POINTS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    MacOs,
    Windows,
    Linux,
}

impl OsFamily {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            OsFamily::MacOs
        } else if cfg!(target_os = "windows") {
            OsFamily::Windows
        } else {
            OsFamily::Linux
        }
    }

    /// Key chord that opens the platform application launcher.
    pub fn launcher_keys(self) -> Vec<String> {
        match self {
            OsFamily::MacOs => vec!["cmd".into(), "space".into()],
            OsFamily::Windows | OsFamily::Linux => vec!["win".into()],
        }
    }
}

/// Executes one action at a time. Never fails: OS errors become outcome text
/// the model reads on its next turn.
pub struct ActionExecutor {
    driver: Arc<dyn InputDriver>,
    cfg: InputConfig,
    os: OsFamily,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn InputDriver>, cfg: InputConfig) -> Self {
        Self::with_os(driver, cfg, OsFamily::current())
    }

    pub fn with_os(driver: Arc<dyn InputDriver>, cfg: InputConfig, os: OsFamily) -> Self {
        Self { driver, cfg, os }
    }

    /// Run `action` against the screen described by `screen`.
    pub async fn execute(&self, action: &Action, screen: &ScreenshotMeta) -> String {
        let outcome = match action {
            Action::Click(click) => self.click(click, screen).await,
            Action::Type { text } => self
                .driver
                .type_text(text)
                .map(|_| format!("Typed \"{text}\""))
                .map_err(|e| format!("Failed to type \"{text}\": {e}")),
            Action::Press { keys } => self.press(keys).await,
            Action::Search { query } => self.search(query).await,
            Action::Scroll { clicks } => self
                .driver
                .scroll(*clicks)
                .map(|_| format!("Scrolled {clicks}"))
                .map_err(|e| format!("Failed to scroll {clicks}: {e}")),
            Action::Done { .. } | Action::Unknown { .. } => {
                Err(format!("Nothing to execute for '{}'", action.name()))
            }
        };

        match outcome {
            Ok(msg) => {
                tracing::info!(action = action.name(), outcome = %msg, "action executed");
                msg
            }
            Err(msg) => {
                tracing::warn!(action = action.name(), outcome = %msg, "action failed");
                msg
            }
        }
    }

    async fn click(&self, click: &ClickAction, screen: &ScreenshotMeta) -> Result<String, String> {
        let target = format!("x={}%, y={}%", click.x_percent, click.y_percent);
        let (px, py) = map_point(click, screen).map_err(|e| format!("Failed to click at {target}: {e}"))?;

        self.glide_to(px, py)
            .await
            .map_err(|e| format!("Failed to move to {target}: {e}"))?;

        if self.cfg.settle_circle {
            self.settle(px, py)
                .await
                .map_err(|e| format!("Failed to move to {target}: {e}"))?;
        }

        let label = click
            .label
            .as_deref()
            .map(|l| format!(" ({l})"))
            .unwrap_or_default();

        if click.scroll != 0 {
            if click.left_click {
                tracing::debug!(scroll = click.scroll, "click suppressed by scroll");
            }
            self.driver
                .scroll(click.scroll)
                .map_err(|e| format!("Failed to scroll at {target}: {e}"))?;
            return Ok(format!("Scrolled {} at {target}{label}", click.scroll));
        }

        if click.left_click {
            self.driver
                .click(px, py)
                .map_err(|e| format!("Failed to click at {target}: {e}"))?;
            return Ok(format!("Clicked at {target}{label}"));
        }

        Ok(format!("Moved cursor to {target}{label}"))
    }

    /// Eased interpolation from the current cursor to the target.
    async fn glide_to(&self, x: i32, y: i32) -> OperatorResult<()> {
        let steps = self.cfg.move_steps.max(1);
        let (sx, sy) = self.driver.cursor_position().unwrap_or((x, y));
        let pause = Duration::from_millis(self.cfg.move_duration_ms / steps as u64);

        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            let eased = t * t * (3.0 - 2.0 * t);
            let cx = sx as f64 + (x - sx) as f64 * eased;
            let cy = sy as f64 + (y - sy) as f64 * eased;
            self.driver.move_to(cx.round() as i32, cy.round() as i32)?;
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }

    /// Small circle around the target so hover handlers fire, ending on it.
    async fn settle(&self, x: i32, y: i32) -> OperatorResult<()> {
        let r = self.cfg.settle_radius_px as f64;
        for i in 0..SETTLE_POINTS {
            let angle = TAU * i as f64 / SETTLE_POINTS as f64;
            let cx = x as f64 + r * angle.cos();
            let cy = y as f64 + r * angle.sin();
            self.driver.move_to(cx.round() as i32, cy.round() as i32)?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.driver.move_to(x, y)
    }

    /// Hold every key in order, dwell, then release in the same order.
    async fn press(&self, keys: &[String]) -> Result<String, String> {
        let combo = keys.join("+");
        if keys.is_empty() {
            return Err("Failed to press keys: no keys given".into());
        }
        self.chord(keys)
            .await
            .map(|_| format!("Pressed {combo}"))
            .map_err(|e| format!("Failed to press {combo}: {e}"))
    }

    async fn chord(&self, keys: &[String]) -> OperatorResult<()> {
        let mut pressed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Err(e) = self.driver.key_down(key) {
                self.release(&pressed);
                return Err(e);
            }
            pressed.push(key.clone());
        }
        tokio::time::sleep(Duration::from_millis(self.cfg.key_dwell_ms)).await;

        let mut first_err = None;
        for key in keys {
            if let Err(e) = self.driver.key_up(key) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Best-effort release after a partial chord.
    fn release(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.driver.key_up(key) {
                tracing::warn!(key = %key, error = %e, "release after failed chord");
            }
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        self.launch(query)
            .await
            .map(|_| format!("Opened program \"{query}\""))
            .map_err(|e| format!("Failed to search for \"{query}\": {e}"))
    }

    async fn launch(&self, query: &str) -> OperatorResult<()> {
        self.chord(&self.os.launcher_keys()).await?;
        tokio::time::sleep(Duration::from_millis(LAUNCHER_DELAY_MS)).await;
        self.driver.type_text(query)?;
        self.chord(&["enter".to_string()]).await
    }
}

/// Percent coordinates → pixels in the input backend's (logical) space.
pub fn map_point(click: &ClickAction, screen: &ScreenshotMeta) -> OperatorResult<(i32, i32)> {
    let x = percent_to_pixel(&click.x_percent, screen.logical_width)?;
    let y = percent_to_pixel(&click.y_percent, screen.logical_height)?;
    Ok((x, y))
}
