// Loop bounds and operator cancellation.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::agent_engine::state::LoopState;
use crate::config::OperatorConfig;
use crate::errors::{OperatorError, OperatorResult};

/// Clonable stop switch shared between the engine and a front-end.
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        tracing::info!("stop requested");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> OperatorResult<()> {
        if self.is_stopped() {
            Err(OperatorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless a stop arrives first.
    pub async fn sleep(&self, duration: Duration) -> OperatorResult<()> {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before re-checking the flag so a concurrent stop() is not lost.
        notified.as_mut().enable();
        self.check()?;

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = notified => Err(OperatorError::Cancelled),
        }
    }
}

/// What to do after a response could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Report the failure to the model and ask again.
    Retry,
    /// Consecutive failures exhausted the budget.
    GiveUp,
}

/// Owns the iteration ceiling and the parse-retry budget.
pub struct LoopController {
    max_iterations: u32,
    max_parse_retries: u32,
    stop: StopHandle,
}

impl LoopController {
    pub fn new(cfg: &OperatorConfig, stop: StopHandle) -> Self {
        Self {
            max_iterations: cfg.max_iterations.max(1),
            max_parse_retries: cfg.max_parse_retries,
            stop,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// True once no further action may be executed.
    pub fn ceiling_reached(&self, state: &LoopState) -> bool {
        state.iteration_count >= self.max_iterations
    }

    pub fn check_cancelled(&self) -> OperatorResult<()> {
        self.stop.check()
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    pub fn record_action(&self, state: &mut LoopState) {
        state.iteration_count += 1;
        state.parse_failures = 0;
    }

    pub fn record_parse_failure(&self, state: &mut LoopState) -> RetryDecision {
        state.parse_failures += 1;
        if state.parse_failures > self.max_parse_retries {
            tracing::warn!(
                failures = state.parse_failures,
                budget = self.max_parse_retries,
                "parse retry budget exhausted"
            );
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_iterations: u32, max_parse_retries: u32) -> LoopController {
        let cfg = OperatorConfig {
            max_iterations,
            max_parse_retries,
            ..OperatorConfig::default()
        };
        LoopController::new(&cfg, StopHandle::new())
    }

    #[test]
    fn ceiling_counts_executed_actions() {
        let ctl = controller(2, 0);
        let mut state = LoopState::default();
        assert!(!ctl.ceiling_reached(&state));
        ctl.record_action(&mut state);
        ctl.record_action(&mut state);
        assert!(ctl.ceiling_reached(&state));
    }

    #[test]
    fn parse_budget_resets_after_success() {
        let ctl = controller(10, 1);
        let mut state = LoopState::default();
        assert_eq!(ctl.record_parse_failure(&mut state), RetryDecision::Retry);
        ctl.record_action(&mut state);
        assert_eq!(ctl.record_parse_failure(&mut state), RetryDecision::Retry);
        assert_eq!(ctl.record_parse_failure(&mut state), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cut_short_by_stop() {
        let stop = StopHandle::new();
        let waiter = stop.clone();
        let task = tokio::spawn(async move { waiter.sleep(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        stop.stop();
        let res = task.await.unwrap();
        assert!(matches!(res, Err(OperatorError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_after_stop_fails_immediately() {
        let stop = StopHandle::new();
        stop.stop();
        assert!(stop.sleep(Duration::from_secs(1)).await.is_err());
        assert!(stop.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_stop() {
        let stop = StopHandle::new();
        assert!(stop.sleep(Duration::from_millis(10)).await.is_ok());
    }
}
