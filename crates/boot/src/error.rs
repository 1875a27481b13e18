//! Error taxonomy for the bootstrap pipeline.
//!
//! Every component surfaces a typed error to its caller; only the stage
//! sequencer decides pipeline-level consequences.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the boot crate.
pub type Result<T, E = BootError> = std::result::Result<T, E>;

/// Typed errors produced by the bootstrap components.
#[derive(Debug, Error)]
pub enum BootError {
    /// A `KEY=VALUE` configuration file contained a line that could not be parsed.
    #[error("malformed config line {line} in {path}: {content:?}")]
    ConfigParse {
        path: PathBuf,
        line: usize,
        content: String,
    },

    /// Neither the target config file nor its template exists.
    #[error("template {template} not found (target {target} missing)")]
    TemplateMissing { target: PathBuf, template: PathBuf },

    /// A configuration key that must be declared was absent.
    #[error("key {key} not found in {scope}")]
    KeyNotFound { key: String, scope: String },

    /// A configuration value exists but cannot be parsed as the expected type.
    #[error("invalid value for {key}: {value:?} (expected {expected})")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    /// A chain RPC endpoint could not be reached or returned a non-JSON-RPC response.
    #[error("rpc endpoint {endpoint} unavailable: {reason}")]
    RpcUnavailable { endpoint: String, reason: String },

    /// A read-only call returned bytes that do not match the declared signature.
    #[error("failed to decode call result: {0}")]
    Decode(String),

    /// A state-mutating transaction was rejected by the node.
    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    /// A derived-value computation left its integer domain (misconfiguration).
    #[error("arithmetic domain error: {0}")]
    ArithmeticDomain(String),

    /// A structured query result had the wrong arity or element types.
    #[error("malformed query result: {0}")]
    MalformedResult(String),

    /// One or more propagation targets could not be written. The message
    /// enumerates exactly which targets succeeded and which failed.
    #[error("propagation wrote {written} target(s), failed {}: {detail}", .failed.len())]
    Propagation {
        written: usize,
        failed: Vec<String>,
        detail: String,
    },

    /// A polling budget was exhausted without the predicate being satisfied.
    #[error("poll budget exhausted after {attempts} attempts: {what}")]
    PollExhausted { what: String, attempts: u32 },

    /// The service launcher failed to bring up a service.
    #[error("launcher: {0}")]
    Launcher(String),

    /// Underlying filesystem failure while reading or writing a config file.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BootError {
    /// Short kind label used when reporting a failed stage.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse { .. } => "ConfigParseError",
            Self::TemplateMissing { .. } => "TemplateMissingError",
            Self::KeyNotFound { .. } => "KeyNotFoundError",
            Self::InvalidValue { .. } => "InvalidValueError",
            Self::RpcUnavailable { .. } => "RpcUnavailableError",
            Self::Decode(_) => "DecodeError",
            Self::TransactionRejected(_) => "TransactionRejectedError",
            Self::ArithmeticDomain(_) => "ArithmeticDomainError",
            Self::MalformedResult(_) => "MalformedResultError",
            Self::Propagation { .. } => "PropagationError",
            Self::PollExhausted { .. } => "PollExhaustedError",
            Self::Launcher(_) => "LauncherError",
            Self::Io { .. } => "IoError",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
