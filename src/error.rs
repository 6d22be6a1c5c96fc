use thiserror::Error;

/// Failures raised by a [`SimulatorLink`](crate::link::SimulatorLink) call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("no open simulator session")]
    NotConnected,

    #[error("load SimConnect library failed: {0}")]
    LibraryLoad(String),

    #[error("SimConnect symbol {0} not found")]
    MissingSymbol(&'static str),

    #[error("{call} failed {hresult}")]
    Call { call: &'static str, hresult: String },

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("event channel closed")]
    Closed,
}

/// Failures while reading a supervisor configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
