use crate::llm::types::ChatMessage;

/// Lifecycle states of the control loop.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentState {
    Init,
    AwaitingModel,
    Parsing { raw: String },
    Executing { actions: Vec<Action> },
    Done { summary: String },
    Aborted { reason: String },
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Done { .. } | AgentState::Aborted { .. })
    }
}

/// A pointer action at percent-of-screen coordinates.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClickAction {
    pub x_percent: f64,
    pub y_percent: f64,
    /// Set when the model referred to a detected element instead of raw coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub left_click: bool,
    /// Wheel clicks to scroll after moving; positive is up.
    #[serde(default)]
    pub scroll: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClickAction {
    pub fn at(x_percent: f64, y_percent: f64) -> Self {
        Self {
            x_percent,
            y_percent,
            label: None,
            left_click: true,
            scroll: 0,
            description: None,
            reason: None,
        }
    }
}

/// Why a response could not be turned into executable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unrecognized shape, broken braces, invalid JSON.
    Parse,
    /// Coordinates that are not numbers in range.
    Coordinate,
    /// A label that is not in the current label map.
    MissingLabel,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click(ClickAction),
    Type { text: String },
    Press { keys: Vec<String> },
    Search { query: String },
    Scroll { clicks: i32 },
    Done { summary: String },
    Unknown { raw: String, kind: FailureKind, cause: String },
}

impl Action {
    pub fn unknown(raw: &str, kind: FailureKind, cause: impl Into<String>) -> Self {
        Action::Unknown {
            raw: raw.to_string(),
            kind,
            cause: cause.into(),
        }
    }

    /// Short name used in logs and session history.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click(_) => "click",
            Action::Type { .. } => "type",
            Action::Press { .. } => "press",
            Action::Search { .. } => "search",
            Action::Scroll { .. } => "scroll",
            Action::Done { .. } => "done",
            Action::Unknown { .. } => "unknown",
        }
    }
}

/// Per-session loop bookkeeping, owned by the engine.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoopState {
    pub iteration_count: u32,
    /// Id of the latest model response. Reported only: chat-completion
    /// clients are stateless and get the full transcript on every call.
    pub session_token: Option<String>,
    pub terminal: bool,
    /// Consecutive turns whose response could not be used.
    pub parse_failures: u32,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed { summary: String },
    /// Ceiling reached: a graceful stop, not a fault.
    BestEffort { summary: String },
    Aborted { error: String },
}

/// Returned to the front-end; the transcript is kept for post-mortems.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub outcome: SessionOutcome,
    pub loop_state: LoopState,
    pub transcript: Vec<ChatMessage>,
}

impl SessionReport {
    pub fn summary(&self) -> &str {
        match &self.outcome {
            SessionOutcome::Completed { summary } | SessionOutcome::BestEffort { summary } => summary,
            SessionOutcome::Aborted { error } => error,
        }
    }
}
