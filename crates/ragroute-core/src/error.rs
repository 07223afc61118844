//! Error types for ragroute

use thiserror::Error;

use crate::routing::Category;

/// Result type alias using ragroute's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Ragroute error types with helpful messages and suggestions
///
/// Every variant is recoverable at the request boundary; none of them should
/// take the process down.
#[derive(Error, Debug)]
pub enum Error {
    // Feedback errors (E100-E199)
    #[error("Invalid reward {0}: rewards must be between 0.0 and 1.0")]
    InvalidReward(f64),

    #[error("Interaction '{0}' not found. It was never recorded or the ledger was reset.")]
    UnknownInteraction(String),

    // Routing errors (E200-E299)
    #[error("Arm ({category}, {handler}) is not tracked by the router")]
    UnknownArm { category: Category, handler: String },

    #[error("No eligible handlers to route a '{0}' query")]
    NoEligibleHandlers(Category),

    #[error("Handler '{0}' is not registered. Run `ragroute handlers` to see all handlers.")]
    UnknownHandler(String),

    // Handler errors (E300-E399)
    #[error("Handler '{handler}' failed: {message}")]
    HandlerExecutionFailure { handler: String, message: String },

    #[error("Handler '{handler}' timed out after {secs} seconds")]
    HandlerTimeout { handler: String, secs: u64 },

    // Storage errors (E400-E499)
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidReward(_) => "E100",
            Self::UnknownInteraction(_) => "E101",
            Self::UnknownArm { .. } => "E200",
            Self::NoEligibleHandlers(_) => "E201",
            Self::UnknownHandler(_) => "E202",
            Self::HandlerExecutionFailure { .. } => "E300",
            Self::HandlerTimeout { .. } => "E301",
            Self::PersistenceFailure(_) => "E400",
            Self::Serialization(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidReward(_) => Some("Submit a reward between 0.0 and 1.0".to_string()),
            Self::UnknownInteraction(_) => {
                Some("Use the interaction id returned by `ragroute route`".to_string())
            }
            Self::UnknownHandler(_) => Some("ragroute handlers".to_string()),
            Self::HandlerTimeout { .. } => {
                Some("ragroute config set orchestrator.handler_timeout_secs <secs>".to_string())
            }
            Self::ConfigError(_) => Some("ragroute config list".to_string()),
            _ => None,
        }
    }

    /// Whether the error was caused by the caller rather than by the router
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidReward(_) | Self::UnknownInteraction(_) | Self::UnknownHandler(_)
        )
    }
}
