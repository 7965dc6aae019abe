use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::history::{Conversation, HistoryEntry, SessionHistory};
use crate::agent_engine::loop_control::{LoopController, RetryDecision, StopHandle};
use crate::agent_engine::parser::{self, ParseContext};
use crate::agent_engine::prompts;
use crate::agent_engine::refine::refine_click;
use crate::agent_engine::state::{
    Action, AgentState, ClickAction, FailureKind, LoopState, SessionOutcome, SessionReport,
};
use crate::config::{OperatorConfig, Strategy};
use crate::errors::{ErrorKind, OperatorError, OperatorResult};
use crate::executor::dispatcher::{ActionExecutor, OsFamily};
use crate::llm::registry::ResolvedModel;
use crate::llm::types::{ChatMessage, LlmResponse, Role};
use crate::perception::annotator::build_label_list;
use crate::perception::pipeline::observe;
use crate::perception::traits::{ElementDetector, ScreenCapture};
use crate::perception::types::{LabelMap, ScreenshotMeta};

/// Per-objective data, owned by a single `run`.
struct Session {
    objective: String,
    transcript: Conversation,
    loop_state: LoopState,
    strategy: Strategy,
    /// Recorded from the first capture and reused for the rest of the session.
    screen: Option<ScreenshotMeta>,
    /// Labels of the screenshot the pending response was produced for.
    labels: Option<LabelMap>,
    /// Cross-check answer for the pending response.
    cross_check: Option<String>,
    last_outcome: Option<String>,
    turns: u32,
}

impl Session {
    fn screen(&self) -> OperatorResult<ScreenshotMeta> {
        self.screen
            .ok_or_else(|| OperatorError::Perception("no screenshot taken yet".into()))
    }
}

/// What a parsed response asks the loop to do next.
enum Step {
    Continue,
    Finish(String),
}

/// The perception → decision → action loop for one objective.
pub struct AgentEngine {
    model: ResolvedModel,
    screen: Arc<dyn ScreenCapture>,
    detector: Option<Arc<dyn ElementDetector>>,
    executor: ActionExecutor,
    cfg: OperatorConfig,
    loop_ctrl: LoopController,
    history: SessionHistory,
    screenshot_dir: Option<PathBuf>,
    os: OsFamily,
}

impl AgentEngine {
    pub fn new(
        model: ResolvedModel,
        screen: Arc<dyn ScreenCapture>,
        executor: ActionExecutor,
        cfg: OperatorConfig,
        stop: StopHandle,
    ) -> Self {
        Self {
            model,
            screen,
            detector: None,
            executor,
            loop_ctrl: LoopController::new(&cfg, stop),
            cfg,
            history: SessionHistory::new(),
            screenshot_dir: None,
            os: OsFamily::current(),
        }
    }

    pub fn with_detector(mut self, detector: Option<Arc<dyn ElementDetector>>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_history(mut self, history: SessionHistory) -> Self {
        self.history = history;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.screenshot_dir = dir;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.loop_ctrl.stop_handle().clone()
    }

    /// Drive the loop until the objective is done, the ceiling is hit, the
    /// operator stops it, or something fails. Never panics and never loses
    /// the transcript.
    pub async fn run(self, objective: &str) -> SessionReport {
        let mut session = Session {
            objective: objective.to_string(),
            transcript: Conversation::new(),
            loop_state: LoopState::default(),
            strategy: self.model.strategy,
            screen: None,
            labels: None,
            cross_check: None,
            last_outcome: None,
            turns: 0,
        };
        tracing::info!(
            session = %self.history.session_id,
            model = %self.model.model_id,
            strategy = ?session.strategy,
            accurate = self.cfg.accurate_mode,
            "session started"
        );

        let mut state = AgentState::Init;
        let outcome = loop {
            state = match state {
                AgentState::Init => {
                    self.seed(&mut session);
                    AgentState::AwaitingModel
                }

                AgentState::AwaitingModel => {
                    if self.loop_ctrl.ceiling_reached(&session.loop_state) {
                        break SessionOutcome::BestEffort {
                            summary: self.best_effort_summary(&session),
                        };
                    }
                    match self.infer(&mut session).await {
                        Ok(raw) => AgentState::Parsing { raw },
                        Err(e) => AgentState::Aborted { reason: e.to_string() },
                    }
                }

                AgentState::Parsing { raw } => self.interpret(&mut session, raw),

                AgentState::Executing { actions } => match self.execute_all(&mut session, actions).await {
                    Ok(Step::Continue) => AgentState::AwaitingModel,
                    Ok(Step::Finish(summary)) => AgentState::Done { summary },
                    Err(e) => AgentState::Aborted { reason: e.to_string() },
                },

                AgentState::Done { summary } => break SessionOutcome::Completed { summary },
                AgentState::Aborted { reason } => break SessionOutcome::Aborted { error: reason },
            };
            tracing::debug!(state = ?state, iteration = session.loop_state.iteration_count, "state transition");
        };

        session.loop_state.terminal = true;
        match &outcome {
            SessionOutcome::Completed { summary } => tracing::info!(summary = %summary, "objective complete"),
            SessionOutcome::BestEffort { summary } => tracing::warn!(summary = %summary, "iteration ceiling reached"),
            SessionOutcome::Aborted { error } => tracing::error!(error = %error, "session aborted"),
        }
        self.history.record(
            HistoryEntry::new(session.loop_state.iteration_count, "session", outcome_text(&outcome))
                .with_action(serde_json::to_value(&outcome).unwrap_or_default()),
        );

        SessionReport {
            session_id: self.history.session_id.clone(),
            outcome,
            loop_state: session.loop_state,
            transcript: session.transcript.into_messages(),
        }
    }

    fn seed(&self, session: &mut Session) {
        let labeled = session.strategy == Strategy::Labeled;
        session
            .transcript
            .push_text(Role::System, prompts::system_prompt(labeled, self.os));
        session
            .transcript
            .push_text(Role::User, prompts::objective_message(&session.objective));
        self.history
            .record(HistoryEntry::new(0, "user", session.objective.clone()));
    }

    // ── AwaitingModel ───────────────────────────────────────────────────

    /// Capture, show the model a throwaway transcript copy with the image,
    /// and return its raw reply.
    async fn infer(&self, session: &mut Session) -> OperatorResult<String> {
        if session.turns > 0 && self.cfg.settle_delay_ms > 0 {
            self.loop_ctrl
                .stop_handle()
                .sleep(Duration::from_millis(self.cfg.settle_delay_ms))
                .await?;
        }
        self.loop_ctrl.check_cancelled()?;

        let detector = match session.strategy {
            Strategy::Labeled => self.detector.as_deref(),
            Strategy::Plain => None,
        };
        let (obs, shot) = observe(self.screen.as_ref(), detector).await?;
        self.loop_ctrl.check_cancelled()?;
        session.turns += 1;

        if session.screen.is_none() {
            tracing::info!(
                width = obs.meta.logical_width,
                height = obs.meta.logical_height,
                scale = obs.meta.scale_factor,
                "screen size recorded"
            );
            session.screen = Some(obs.meta);
        }
        self.save_screenshot(session.turns, &shot.image_bytes).await;

        if session.strategy == Strategy::Labeled && obs.labels.is_none() {
            tracing::warn!("no labels for this screen, falling back to plain strategy");
            session.strategy = Strategy::Plain;
            session.transcript.push_text(Role::User, prompts::labels_unavailable());
        }

        let label_list = obs.labels.as_ref().map(build_label_list);
        let instruction =
            prompts::turn_instruction(&session.objective, session.turns == 1, label_list.as_deref());
        let messages = session
            .transcript
            .with_turn(ChatMessage::user_with_image(&obs.image_base64, instruction));

        tracing::info!(
            turn = session.turns,
            messages = messages.len(),
            labels = obs.labels.as_ref().map_or(0, LabelMap::len),
            "calling model"
        );

        let reply = match (&label_list, self.cfg.cross_check) {
            (Some(list), true) => {
                let question = vec![ChatMessage::user_with_image(
                    &obs.image_base64,
                    prompts::cross_check_prompt(&session.objective, list),
                )];
                let (decision, check) = tokio::try_join!(
                    self.model.provider.chat(messages, &self.model.call),
                    self.model.provider.chat(question, &self.model.call),
                )?;
                self.note_response(session, &decision);
                session.cross_check = first_label(&check.content);
                decision.content
            }
            _ => {
                let decision = self.model.provider.chat(messages, &self.model.call).await?;
                self.note_response(session, &decision);
                session.cross_check = None;
                decision.content
            }
        };
        session.labels = obs.labels;

        tracing::info!(reply = %reply, "model replied");
        self.history
            .record(HistoryEntry::new(session.loop_state.iteration_count, "model", reply.clone()));
        Ok(reply)
    }

    fn note_response(&self, session: &mut Session, response: &LlmResponse) {
        if let Some(token) = &response.session_token {
            session.loop_state.session_token = Some(token.clone());
        }
        if !response.reasoning.is_empty() {
            tracing::debug!(reasoning = %response.reasoning, "model reasoning");
        }
    }

    async fn save_screenshot(&self, turn: u32, png: &[u8]) {
        let Some(dir) = &self.screenshot_dir else {
            return;
        };
        let path = dir.join(format!("turn_{turn:03}.png"));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, png).await
        }
        .await;
        match result {
            Ok(()) => tracing::debug!(path = %path.display(), "screenshot saved"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to save screenshot"),
        }
    }

    // ── Parsing ─────────────────────────────────────────────────────────

    fn interpret(&self, session: &mut Session, raw: String) -> AgentState {
        let ctx = ParseContext {
            objective: &session.objective,
            labels: session.labels.as_ref(),
            last_outcome: session.last_outcome.as_deref(),
        };
        let actions = parser::parse(&raw, &ctx);
        session.labels = None;

        if let Some(Action::Unknown { kind, cause, .. }) = actions.iter().find(|a| matches!(a, Action::Unknown { .. })) {
            tracing::warn!(kind = ?kind, cause = %cause, raw = %raw, "unusable model reply");
            let switch = *kind == FailureKind::MissingLabel && session.strategy == Strategy::Labeled;
            if switch {
                session.strategy = Strategy::Plain;
            }
            return self.reject(session, &raw, prompts::failure_report(cause, switch));
        }

        if let Some(checked) = session.cross_check.take() {
            let chosen = actions.iter().find_map(|a| match a {
                Action::Click(ClickAction { label: Some(l), .. }) => Some(l.clone()),
                _ => None,
            });
            if let Some(chosen) = chosen.filter(|c| *c != checked) {
                tracing::warn!(chosen = %chosen, cross_check = %checked, "cross-check disagrees");
                return self.reject(session, &raw, prompts::cross_check_disagreement(&chosen, &checked));
            }
        }

        tracing::info!(count = actions.len(), first = actions[0].name(), "reply parsed");
        AgentState::Executing { actions }
    }

    /// Report a rejected reply to the model, or abort once the retry budget is spent.
    fn reject(&self, session: &mut Session, raw: &str, report: String) -> AgentState {
        match self.loop_ctrl.record_parse_failure(&mut session.loop_state) {
            RetryDecision::Retry => {
                session.transcript.push_text(Role::User, report);
                AgentState::AwaitingModel
            }
            RetryDecision::GiveUp => AgentState::Aborted {
                reason: OperatorError::Parse(format!("{report} Model said: {raw}")).to_string(),
            },
        }
    }

    // ── Executing ───────────────────────────────────────────────────────

    async fn execute_all(&self, session: &mut Session, actions: Vec<Action>) -> OperatorResult<Step> {
        let screen = session.screen()?;

        for action in actions {
            if self.loop_ctrl.ceiling_reached(&session.loop_state) {
                tracing::warn!(action = action.name(), "ceiling reached, remaining actions dropped");
                return Ok(Step::Continue);
            }
            self.loop_ctrl.check_cancelled()?;

            let action = match action {
                Action::Done { summary } => return Ok(Step::Finish(self.finish(session, summary).await)),
                Action::Click(click) if self.cfg.accurate_mode => {
                    match refine_click(
                        &self.model,
                        self.screen.as_ref(),
                        &session.transcript,
                        &click,
                        &screen,
                        self.cfg.refine_crop_px,
                    )
                    .await
                    {
                        Ok(refined) => Action::Click(refined),
                        Err(e) if e.kind() == ErrorKind::RefinementFailure => {
                            tracing::warn!(error = %e, "refinement failed, click skipped");
                            let outcome = format!(
                                "{e}. The click at x={}%, y={}% was not executed",
                                click.x_percent, click.y_percent
                            );
                            self.record_outcome(session, &Action::Click(click), outcome);
                            return Ok(Step::Continue);
                        }
                        Err(e) => return Err(e),
                    }
                }
                other => other,
            };

            self.loop_ctrl.check_cancelled()?;
            let outcome = self.executor.execute(&action, &screen).await;
            self.record_outcome(session, &action, outcome);
        }
        Ok(Step::Continue)
    }

    fn record_outcome(&self, session: &mut Session, action: &Action, outcome: String) {
        self.loop_ctrl.record_action(&mut session.loop_state);
        tracing::info!(
            iteration = session.loop_state.iteration_count,
            action = action.name(),
            outcome = %outcome,
            "turn recorded"
        );
        self.history.record(
            HistoryEntry::new(session.loop_state.iteration_count, "assistant", outcome.clone())
                .with_action(serde_json::to_value(action).unwrap_or_default()),
        );
        session.transcript.push_text(Role::Assistant, outcome.clone());
        session.last_outcome = Some(outcome);
    }

    async fn finish(&self, session: &Session, fallback: String) -> String {
        if !self.cfg.summarize_on_done {
            return fallback;
        }
        let messages = session
            .transcript
            .with_turn(ChatMessage::text(Role::User, prompts::summary_prompt(&session.objective)));
        match self.model.provider.chat(messages, &self.model.call).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                tracing::warn!(error = %e, "summary call failed, using context summary");
                fallback
            }
        }
    }

    fn best_effort_summary(&self, session: &Session) -> String {
        let mut summary = format!(
            "Stopped after {} actions without confirming \"{}\" was completed",
            self.loop_ctrl.max_iterations(),
            session.objective
        );
        if let Some(last) = &session.last_outcome {
            summary.push_str(&format!(". Last action: {last}"));
        }
        summary
    }
}

fn outcome_text(outcome: &SessionOutcome) -> String {
    match outcome {
        SessionOutcome::Completed { summary } | SessionOutcome::BestEffort { summary } => summary.clone(),
        SessionOutcome::Aborted { error } => error.clone(),
    }
}

/// First `~N` token in a cross-check reply; `NONE` and prose yield nothing.
fn first_label(reply: &str) -> Option<String> {
    let start = reply.find('~')?;
    let digits: String = reply[start + 1..].chars().take_while(char::is_ascii_digit).collect();
    (!digits.is_empty()).then(|| format!("~{digits}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputConfig;
    use crate::llm::types::CallConfig;
    use crate::perception::types::BoundingBox;
    use crate::testing::{FixedDetector, MockProvider, MockScreen, RecordingDriver};

    struct Harness {
        provider: Arc<MockProvider>,
        screen: Arc<MockScreen>,
        driver: Arc<RecordingDriver>,
        engine: AgentEngine,
    }

    fn operator_cfg() -> OperatorConfig {
        OperatorConfig {
            max_iterations: 10,
            max_parse_retries: 2,
            settle_delay_ms: 0,
            ..OperatorConfig::default()
        }
    }

    fn harness_with(
        replies: Vec<OperatorResult<String>>,
        cfg: OperatorConfig,
        strategy: Strategy,
        screen: MockScreen,
        driver: RecordingDriver,
        stop: StopHandle,
    ) -> Harness {
        let provider = Arc::new(MockProvider::scripted(replies));
        let screen = Arc::new(screen);
        let driver = Arc::new(driver);
        let input = InputConfig {
            move_duration_ms: 0,
            move_steps: 1,
            settle_circle: false,
            settle_radius_px: 0,
            key_dwell_ms: 0,
        };
        let model = ResolvedModel {
            model_id: "mock-vision".into(),
            provider: provider.clone(),
            call: CallConfig { model: "mock-vision".into(), stream: false, temperature: 0.0 },
            strategy,
        };
        let executor = ActionExecutor::with_os(driver.clone(), input, OsFamily::Linux);
        let engine = AgentEngine::new(model, screen.clone(), executor, cfg, stop)
            .with_history(SessionHistory::disabled());
        Harness { provider, screen, driver, engine }
    }

    fn harness(replies: Vec<&str>, cfg: OperatorConfig) -> Harness {
        harness_with(
            replies.into_iter().map(|r| Ok(r.to_string())).collect(),
            cfg,
            Strategy::Plain,
            MockScreen::new(),
            RecordingDriver::default(),
            StopHandle::new(),
        )
    }

    fn transcript_text(report: &SessionReport) -> String {
        report
            .transcript
            .iter()
            .map(ChatMessage::text_content)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn clicks(driver: &RecordingDriver) -> Vec<String> {
        driver.events().into_iter().filter(|e| e.starts_with("click")).collect()
    }

    fn labels() -> LabelMap {
        let mut labels = LabelMap::new(192, 108);
        labels.insert("~1", BoundingBox { min_x: 10.0, min_y: 10.0, max_x: 30.0, max_y: 30.0 });
        labels.insert("~2", BoundingBox { min_x: 96.0, min_y: 54.0, max_x: 116.0, max_y: 74.0 });
        labels
    }

    #[tokio::test(start_paused = true)]
    async fn done_completes_with_context_summary() {
        let h = harness(vec!["TYPE hello", "DONE"], operator_cfg());
        let report = h.engine.run("write a greeting").await;

        let SessionOutcome::Completed { summary } = &report.outcome else {
            panic!("{:?}", report.outcome)
        };
        assert!(summary.contains("write a greeting"));
        assert!(summary.contains("Typed \"hello\""));
        assert_eq!(h.driver.events(), vec!["type hello"]);
        assert_eq!(report.loop_state.iteration_count, 1);
        assert!(report.loop_state.terminal);
        assert_eq!(report.loop_state.session_token.as_deref(), Some("resp-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn screenshots_stay_out_of_the_transcript() {
        let h = harness(vec!["TYPE a", "DONE"], operator_cfg());
        let provider = h.provider.clone();
        let report = h.engine.run("x").await;

        assert!(!report.transcript.iter().any(ChatMessage::has_image));
        let second = provider.call(1);
        assert!(second.last().unwrap().has_image());
        assert_eq!(second.iter().filter(|m| m.has_image()).count(), 1);
        assert_eq!(second[second.len() - 2].text_content(), "Typed \"a\"");
        assert_eq!(second[second.len() - 2].role, Role::Assistant);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_stops_a_model_that_never_finishes() {
        let cfg = OperatorConfig { max_iterations: 3, ..operator_cfg() };
        let h = harness(vec!["TYPE again"], cfg);
        let provider = h.provider.clone();
        let report = h.engine.run("loop forever").await;

        assert!(matches!(report.outcome, SessionOutcome::BestEffort { .. }), "{:?}", report.outcome);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(h.driver.events().len(), 3);
        assert_eq!(report.loop_state.iteration_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_truncates_a_multi_action_reply() {
        let cfg = OperatorConfig { max_iterations: 2, ..operator_cfg() };
        let reply = r#"[{"operation": "write", "content": "a"}, {"operation": "write", "content": "b"}, {"operation": "write", "content": "c"}]"#;
        let h = harness(vec![reply], cfg);
        let report = h.engine.run("type abc").await;

        assert!(matches!(report.outcome, SessionOutcome::BestEffort { .. }));
        assert_eq!(h.driver.events(), vec!["type a", "type b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn press_failure_is_reported_and_loop_continues() {
        let h = harness_with(
            vec![Ok("PRESS ctrl+c".into()), Ok("DONE".into())],
            operator_cfg(),
            Strategy::Plain,
            MockScreen::new(),
            RecordingDriver::failing_key("c"),
            StopHandle::new(),
        );
        let provider = h.provider.clone();
        let report = h.engine.run("copy").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
        assert_eq!(provider.call_count(), 2);
        assert!(transcript_text(&report).contains("Failed to press ctrl+c"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_first_capture_prevents_any_action() {
        let stop = StopHandle::new();
        let h = harness_with(
            vec![Ok(r#"CLICK { "x": "50%", "y": "50%" }"#.into())],
            operator_cfg(),
            Strategy::Plain,
            MockScreen::stopping_on(1, stop.clone()),
            RecordingDriver::default(),
            stop,
        );
        let provider = h.provider.clone();
        let report = h.engine.run("click the middle").await;

        let SessionOutcome::Aborted { error } = &report.outcome else { panic!() };
        assert!(error.contains("cancelled"), "{error}");
        assert!(h.driver.events().is_empty());
        assert_eq!(provider.call_count(), 0);
        assert_eq!(report.transcript.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_later_capture_keeps_earlier_actions() {
        let stop = StopHandle::new();
        let h = harness_with(
            vec![Ok("TYPE one".into()), Ok("TYPE two".into())],
            operator_cfg(),
            Strategy::Plain,
            MockScreen::stopping_on(2, stop.clone()),
            RecordingDriver::default(),
            stop,
        );
        let screen = h.screen.clone();
        let report = h.engine.run("type").await;

        assert!(matches!(report.outcome, SessionOutcome::Aborted { .. }));
        assert_eq!(h.driver.events(), vec!["type one"]);
        assert_eq!(screen.capture_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_reply_is_retried_then_recovers() {
        let h = harness(vec!["let me think about it", "TYPE ok", "DONE"], operator_cfg());
        let provider = h.provider.clone();
        let report = h.engine.run("say ok").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
        let retry = provider.call(1);
        assert!(retry[retry.len() - 2].text_content().contains("could not be executed"));
        assert_eq!(h.driver.events(), vec!["type ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_parse_failures_abort_with_raw_text() {
        let cfg = OperatorConfig { max_parse_retries: 1, ..operator_cfg() };
        let h = harness(vec!["gibberish"], cfg);
        let provider = h.provider.clone();
        let report = h.engine.run("anything").await;

        let SessionOutcome::Aborted { error } = &report.outcome else { panic!() };
        assert!(error.starts_with("Could not parse model response"), "{error}");
        assert!(error.contains("gibberish"), "{error}");
        assert_eq!(provider.call_count(), 2);
        assert!(h.driver.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn model_error_aborts_and_keeps_transcript() {
        let h = harness_with(
            vec![Ok("TYPE a".into()), Err(OperatorError::LlmProvider("HTTP 500".into()))],
            operator_cfg(),
            Strategy::Plain,
            MockScreen::new(),
            RecordingDriver::default(),
            StopHandle::new(),
        );
        let report = h.engine.run("x").await;

        let SessionOutcome::Aborted { error } = &report.outcome else { panic!() };
        assert!(error.contains("HTTP 500"));
        assert!(transcript_text(&report).contains("Typed \"a\""));
    }

    #[tokio::test(start_paused = true)]
    async fn accurate_mode_clicks_the_refined_point() {
        let cfg = OperatorConfig { accurate_mode: true, ..operator_cfg() };
        let h = harness(
            vec![r#"CLICK { "x": "50%", "y": "50%" }"#, r#"CLICK { "x": "25%", "y": "25%" }"#, "DONE"],
            cfg,
        );
        let report = h.engine.run("click").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
        assert_eq!(clicks(&h.driver), vec!["click 480,270"]);
        assert_eq!(h.screen.regions.lock().unwrap().as_slice(), &[(960, 540, 200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn refinement_error_skips_click_but_not_the_session() {
        let cfg = OperatorConfig { accurate_mode: true, ..operator_cfg() };
        let h = harness(vec![r#"CLICK { "x": "50%", "y": "50%" }"#, "ERROR", "DONE"], cfg);
        let report = h.engine.run("click").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
        assert!(clicks(&h.driver).is_empty());
        assert!(transcript_text(&report).contains("was not executed"));
        assert_eq!(report.loop_state.iteration_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_label_falls_back_to_plain_strategy() {
        let replies = vec![
            Ok(r#"[{"operation": "click", "label": "~9"}]"#.to_string()),
            Ok(r#"CLICK { "x": "10%", "y": "10%" }"#.to_string()),
            Ok("DONE".to_string()),
        ];
        let h = harness_with(
            replies,
            operator_cfg(),
            Strategy::Labeled,
            MockScreen::new(),
            RecordingDriver::default(),
            StopHandle::new(),
        );
        let engine = h.engine.with_detector(Some(Arc::new(FixedDetector(labels()))));
        let report = engine.run("press the button").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
        assert_eq!(clicks(&h.driver), vec!["click 192,108"]);

        let first = h.provider.call(0);
        assert!(first[0].text_content().contains("\"operation\""));
        assert!(first.last().unwrap().text_content().contains("~1"));
        let second = h.provider.call(1);
        assert!(second[second.len() - 2].text_content().contains("percentages"));
        assert!(!second.last().unwrap().text_content().contains("Detected elements"));
    }

    #[tokio::test(start_paused = true)]
    async fn labeled_click_resolves_against_detected_elements() {
        let replies = vec![
            Ok(r#"[{"operation": "click", "label": "~2"}]"#.to_string()),
            Ok(r#"[{"operation": "done"}]"#.to_string()),
        ];
        let h = harness_with(
            replies,
            operator_cfg(),
            Strategy::Labeled,
            MockScreen::new(),
            RecordingDriver::default(),
            StopHandle::new(),
        );
        let engine = h.engine.with_detector(Some(Arc::new(FixedDetector(labels()))));
        let report = engine.run("press ~2").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
        // Box center (106, 64) on a 192×108 image → 55.2%, 59.3% of 1920×1080.
        assert_eq!(clicks(&h.driver), vec!["click 1060,640"]);
        assert!(transcript_text(&report).contains("(~2)"));
    }

    #[tokio::test(start_paused = true)]
    async fn cross_check_disagreement_is_reported_instead_of_clicked() {
        let replies = vec![
            Ok(r#"[{"operation": "click", "label": "~1"}]"#.to_string()),
            Ok("~2".to_string()),
            Ok(r#"[{"operation": "click", "label": "~2"}]"#.to_string()),
            Ok("I would click ~2".to_string()),
            Ok("DONE".to_string()),
            Ok("NONE".to_string()),
        ];
        let cfg = OperatorConfig { cross_check: true, ..operator_cfg() };
        let h = harness_with(
            replies,
            cfg,
            Strategy::Labeled,
            MockScreen::new(),
            RecordingDriver::default(),
            StopHandle::new(),
        );
        let engine = h.engine.with_detector(Some(Arc::new(FixedDetector(labels()))));
        let report = engine.run("press ~2").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }), "{:?}", report.outcome);
        assert_eq!(clicks(&h.driver), vec!["click 1060,640"]);
        assert_eq!(h.provider.call_count(), 6);
        assert!(transcript_text(&report).contains("You chose ~1"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cross_check_fails_the_turn_without_acting() {
        let replies = vec![
            Ok(r#"[{"operation": "click", "label": "~2"}]"#.to_string()),
            Err(OperatorError::LlmProvider("HTTP 502".into())),
        ];
        let cfg = OperatorConfig { cross_check: true, ..operator_cfg() };
        let h = harness_with(
            replies,
            cfg,
            Strategy::Labeled,
            MockScreen::new(),
            RecordingDriver::default(),
            StopHandle::new(),
        );
        let engine = h.engine.with_detector(Some(Arc::new(FixedDetector(labels()))));
        let report = engine.run("press ~2").await;

        let SessionOutcome::Aborted { error } = &report.outcome else { panic!("{:?}", report.outcome) };
        assert!(error.contains("HTTP 502"), "{error}");
        assert!(h.driver.events().is_empty());
        assert_eq!(h.provider.call_count(), 2);
        assert_eq!(report.loop_state.iteration_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn click_failure_is_reported_and_loop_continues() {
        let h = harness_with(
            vec![Ok(r#"CLICK { "x": "50%", "y": "50%" }"#.into()), Ok("DONE".into())],
            operator_cfg(),
            Strategy::Plain,
            MockScreen::new(),
            RecordingDriver::failing_clicks(),
            StopHandle::new(),
        );
        let provider = h.provider.clone();
        let report = h.engine.run("click the middle").await;

        assert!(matches!(report.outcome, SessionOutcome::Completed { .. }), "{:?}", report.outcome);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(report.loop_state.iteration_count, 1);
        let second = provider.call(1);
        let outcome = second[second.len() - 2].text_content();
        assert!(outcome.starts_with("Failed to click at"), "{outcome}");
        assert!(outcome.contains("simulated click failure"), "{outcome}");
    }

    #[tokio::test(start_paused = true)]
    async fn summarize_on_done_asks_the_model() {
        let cfg = OperatorConfig { summarize_on_done: true, ..operator_cfg() };
        let h = harness(vec!["DONE", "The settings page is open."], cfg);
        let report = h.engine.run("open settings").await;
        assert_eq!(report.summary(), "The settings page is open.");
    }

    #[tokio::test(start_paused = true)]
    async fn summarize_failure_falls_back_to_context() {
        let cfg = OperatorConfig { summarize_on_done: true, ..operator_cfg() };
        let h = harness_with(
            vec![Ok("DONE".into()), Err(OperatorError::LlmProvider("timeout".into()))],
            cfg,
            Strategy::Plain,
            MockScreen::new(),
            RecordingDriver::default(),
            StopHandle::new(),
        );
        let report = h.engine.run("open settings").await;
        assert!(report.summary().contains("open settings"));
    }

    #[tokio::test(start_paused = true)]
    async fn screenshots_are_saved_per_turn() {
        let dir = std::env::temp_dir().join(format!("operator-shots-{}", uuid::Uuid::new_v4()));
        let h = harness(vec!["TYPE a", "DONE"], operator_cfg());
        let engine = h.engine.with_screenshot_dir(Some(dir.clone()));
        engine.run("x").await;

        assert!(dir.join("turn_001.png").exists());
        assert!(dir.join("turn_002.png").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn cross_check_label_extraction() {
        assert_eq!(first_label("~12"), Some("~12".into()));
        assert_eq!(first_label("I would click ~3."), Some("~3".into()));
        assert_eq!(first_label("NONE"), None);
        assert_eq!(first_label("~"), None);
    }
}
