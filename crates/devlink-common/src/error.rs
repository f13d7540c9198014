//! ---
//! dl_section: "01-data-primitives"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Error taxonomy shared across the DevLink workspace."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DevlinkError>;

/// Stable machine-readable error codes surfaced alongside the reason text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Config,
    InvalidArgument,
    RemoteUnreachable,
    RemoteCallFailure,
    DriverInitFailure,
    NotFound,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Config => "config",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::RemoteUnreachable => "remote-unreachable",
            ErrorCode::RemoteCallFailure => "remote-call-failure",
            ErrorCode::DriverInitFailure => "driver-init-failure",
            ErrorCode::NotFound => "not-found",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy for the device service runtime.
///
/// Startup paths treat every variant except [`DevlinkError::NotFound`] as
/// fatal; steady-state paths log and absorb. The `RemoteCall` variant tags
/// the failing sub-operation so callers can tell get/create/update failures
/// apart without parsing reason text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DevlinkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{service} service unreachable: {reason}")]
    RemoteUnreachable { service: String, reason: String },

    #[error("remote call {operation} failed: {reason}")]
    RemoteCall { operation: String, reason: String },

    #[error("protocol driver initialization failed")]
    DriverInit,

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },
}

impl DevlinkError {
    pub fn config(reason: impl Into<String>) -> Self {
        DevlinkError::Config(reason.into())
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        DevlinkError::InvalidArgument(reason.into())
    }

    pub fn unreachable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        DevlinkError::RemoteUnreachable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn remote_call(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        DevlinkError::RemoteCall {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        DevlinkError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DevlinkError::Config(_) => ErrorCode::Config,
            DevlinkError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            DevlinkError::RemoteUnreachable { .. } => ErrorCode::RemoteUnreachable,
            DevlinkError::RemoteCall { .. } => ErrorCode::RemoteCallFailure,
            DevlinkError::DriverInit => ErrorCode::DriverInitFailure,
            DevlinkError::NotFound { .. } => ErrorCode::NotFound,
        }
    }
}
