//! Error type shared by every collaborator seam.

use thiserror::Error;

/// Failure reported by a collaborator (download, LLM, search, render, ...).
///
/// Only `Transient` failures are retried; everything else surfaces
/// immediately as a delta error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::Interrupted => Self::Transient(err.to_string()),
            _ => Self::Permanent(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Transient(format!("request timeout: {err}"));
        }
        if err.is_connect() {
            return Self::Transient(format!("connection failed: {err}"));
        }
        if let Some(status) = err.status() {
            return classify_status(status.as_u16(), &err.to_string());
        }
        Self::Permanent(format!("request failed: {err}"))
    }
}

/// Classify an HTTP status: 429 and 5xx are transient, the rest permanent.
pub fn classify_status(status: u16, body: &str) -> CollaboratorError {
    let message = format!("http {status}: {}", body.trim());
    if status == 429 || (500..600).contains(&status) {
        CollaboratorError::Transient(message)
    } else {
        CollaboratorError::Permanent(message)
    }
}
