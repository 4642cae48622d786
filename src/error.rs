//! Stable error taxonomy for the simulation engine.
//!
//! Every fallible core operation returns [`EngineResult`]. Identifiers are
//! part of the engine's contract with host wrappers: adding a variant is
//! fine, renaming or removing one is a breaking change.

use thiserror::Error;

/// The engine's single error type. Variant names double as the stable
/// identifiers a host wrapper maps to its own exception hierarchy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("operation attempted on a null or destroyed model")]
    InvalidModel,

    #[error("invalid pacing schedule: {0}")]
    InvalidPacing(String),

    #[error("logging already initialized for this model")]
    LoggingAlreadyInitialized,

    #[error("logging not initialized for this model")]
    LoggingNotInitialized,

    #[error("log descriptor references unknown variable(s): {0:?}")]
    UnknownVariablesInLog(Vec<String>),

    #[error("append to log sink failed: {0}")]
    LogAppendFailed(String),

    #[error("append to sensitivity log sink failed: {0}")]
    SensitivityLogAppendFailed(String),

    #[error("sensitivity matrix logging requested on a non-sensitivity run")]
    NoSensitivitiesToLog,

    #[error("simulation already initialized and running")]
    AlreadyRunning,

    #[error("simulation is not initialized")]
    NotInitialized,

    #[error("solver error ({code}): {message}")]
    Solver { code: i32, message: String },

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("invalid value: {0}")]
    Value(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("cancelled by host")]
    Cancelled,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Wraps a raw `rgsl::Value` failure code with solver-supplied context.
    pub fn from_solver(code: i32, message: impl Into<String>) -> Self {
        EngineError::Solver {
            code,
            message: message.into(),
        }
    }
}
