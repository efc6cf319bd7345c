//! Error types for the SafeSpeak node
//!
//! Local-store failures always propagate; remote failures are classified so
//! callers can degrade status instead of failing.

use serde::Serialize;
use thiserror::Error;

/// Failure to persist on the device. Fatal to the operation that caused it.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The local store refuses new records
    #[error("local store is full ({limit} reports)")]
    CapacityExceeded { limit: usize },

    /// No record with this identifier
    #[error("report not found: {0}")]
    NotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classified failure kinds reported by the shared document store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteErrorKind {
    /// Anonymous sign-in is not enabled on the backend
    AuthNotConfigured,
    /// Security rules reject this client
    PermissionDenied,
    /// This origin is not on the backend's allow-list
    UnauthorizedOrigin,
    /// Connectivity failure
    Network,
    /// The operation exceeded its time bound
    Timeout,
}

impl RemoteErrorKind {
    /// Classify a document-store error code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "permission-denied" => RemoteErrorKind::PermissionDenied,
            "auth/configuration-not-found" | "auth/internal-error" => {
                RemoteErrorKind::AuthNotConfigured
            }
            "auth/unauthorized-domain" => RemoteErrorKind::UnauthorizedOrigin,
            "timeout" | "deadline-exceeded" => RemoteErrorKind::Timeout,
            _ => RemoteErrorKind::Network,
        }
    }

    /// Classify an HTTP status returned by the gateway.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => RemoteErrorKind::AuthNotConfigured,
            403 => RemoteErrorKind::PermissionDenied,
            421 => RemoteErrorKind::UnauthorizedOrigin,
            408 | 504 => RemoteErrorKind::Timeout,
            _ => RemoteErrorKind::Network,
        }
    }

    /// Misconfiguration that needs operator action rather than a retry.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RemoteErrorKind::AuthNotConfigured
                | RemoteErrorKind::PermissionDenied
                | RemoteErrorKind::UnauthorizedOrigin
        )
    }

    /// Operator-facing explanation of what to fix.
    pub fn diagnostic(&self) -> &'static str {
        match self {
            RemoteErrorKind::AuthNotConfigured => {
                "Anonymous sign-in is not enabled on the document store"
            }
            RemoteErrorKind::PermissionDenied => {
                "The document store denied access (check its security rules)"
            }
            RemoteErrorKind::UnauthorizedOrigin => {
                "This origin is not authorized by the document store"
            }
            RemoteErrorKind::Network => "Cannot reach the document store",
            RemoteErrorKind::Timeout => "The document store did not answer in time",
        }
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemoteErrorKind::AuthNotConfigured => "auth-not-configured",
            RemoteErrorKind::PermissionDenied => "permission-denied",
            RemoteErrorKind::UnauthorizedOrigin => "unauthorized-origin",
            RemoteErrorKind::Network => "network",
            RemoteErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Failure of a remote operation. Never fatal to local work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::timeout(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::new(RemoteErrorKind::from_status(status.as_u16()), err.to_string())
        } else {
            RemoteError::network(err.to_string())
        }
    }
}

/// Rate-limiter rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Throttled {
    /// Time left on the ban (millis)
    pub remaining_ms: u64,
    /// True when this submission is the one that triggered the ban
    pub newly_banned: bool,
}

impl Throttled {
    pub fn remaining_secs(&self) -> u64 {
        self.remaining_ms.div_ceil(1000)
    }

    /// Message to show the person submitting.
    pub fn user_message(&self) -> String {
        if self.newly_banned {
            format!(
                "Too many reports in a short time. Submissions are blocked for {} seconds.",
                self.remaining_secs()
            )
        } else {
            format!(
                "You are submitting too quickly. Please try again in {} seconds.",
                self.remaining_secs()
            )
        }
    }
}

impl std::fmt::Display for Throttled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message())
    }
}

/// Why a submission was not accepted
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The report could not be saved on this device; nothing was accepted
    #[error("report could not be saved on this device: {0}")]
    Durability(#[from] StorageError),

    #[error("{0}")]
    Throttled(Throttled),

    /// The classifier decided this is not an incident report
    #[error("not an incident report: {reason}")]
    NotAnIncident { reason: String },

    #[error("report has neither text nor media")]
    Empty,
}

/// Failure of the external content classifier
#[derive(Error, Debug)]
#[error("classifier unavailable: {0}")]
pub struct ClassifierError(pub String);
