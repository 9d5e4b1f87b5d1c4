/// Error types for the signal service.
/// The service must:
/// - Keep polling on recoverable feed errors
/// - Refuse to start on bad configuration
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("upstream API error: {status} {body}")]
    UpstreamApi { status: u16, body: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Failures of the pure signal computations. Local to a single call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("snapshot has no expiries")]
    EmptySnapshot,

    #[error("insufficient price data: {points} point(s), need at least 2")]
    InsufficientData { points: usize },
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
