use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model '{0}' is not recognized; no client is configured for it")]
    ModelUnrecognized(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Could not parse model response: {0}")]
    Parse(String),

    #[error("Malformed coordinate: {0}")]
    MalformedCoordinate(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Refinement failed: {0}")]
    Refinement(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Operation cancelled by operator")]
    Cancelled,
}

/// Coarse classification used by the control loop to pick a recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseFailure,
    CoordinateFailure,
    ExecutionFailure,
    RefinementFailure,
    ModelUnrecognized,
    OperatorCancelled,
    /// Anything raised by an external collaborator (network, capture, IO).
    Infrastructure,
}

impl OperatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperatorError::Parse(_) | OperatorError::SseParsing(_) => ErrorKind::ParseFailure,
            OperatorError::MalformedCoordinate(_) => ErrorKind::CoordinateFailure,
            OperatorError::Executor(_) => ErrorKind::ExecutionFailure,
            OperatorError::Refinement(_) => ErrorKind::RefinementFailure,
            OperatorError::ModelUnrecognized(_) => ErrorKind::ModelUnrecognized,
            OperatorError::Cancelled => ErrorKind::OperatorCancelled,
            _ => ErrorKind::Infrastructure,
        }
    }
}

impl serde::Serialize for OperatorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type OperatorResult<T> = Result<T, OperatorError>;
