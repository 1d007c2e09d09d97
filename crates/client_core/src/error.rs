use std::sync::Arc;

use reqwest::StatusCode;
use shared::error::{ErrorKind, ErrorReport};
use thiserror::Error;

use crate::session::SessionError;

/// Failures surfaced by gateway operations.
///
/// Cloneable so one refresh result can be handed to every caller waiting on
/// it; foreign errors are held behind `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("request aborted")]
    Aborted,
    #[error("transport failure: {0}")]
    Transport(#[source] Arc<reqwest::Error>),
    #[error("server responded with {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("invalid response body: {0}")]
    Decode(#[source] Arc<serde_json::Error>),
    #[error("access token cannot be sent as a header")]
    InvalidCredential,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => GatewayError::Status {
                status,
                url: err.url().map(|url| url.to_string()).unwrap_or_default(),
            },
            None => GatewayError::Transport(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(Arc::new(err))
    }
}

impl GatewayError {
    pub fn is_abort(&self) -> bool {
        matches!(self, GatewayError::Aborted)
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn report(&self, operation: &str) -> ErrorReport {
        let kind = match self {
            GatewayError::Aborted | GatewayError::Transport(_) => ErrorKind::Transport,
            GatewayError::Status { .. } => ErrorKind::Status,
            GatewayError::Decode(_) => ErrorKind::Decode,
            GatewayError::InvalidCredential | GatewayError::Session(_) => ErrorKind::Session,
        };
        let report = ErrorReport::new(kind, operation, self.to_string());
        match self.status() {
            Some(status) => report.with_status(status.as_u16()),
            None => report,
        }
    }
}

/// Collapse an abort into "no value"; every other failure is kept.
pub fn ignore_abort<T>(result: Result<T, GatewayError>) -> Result<Option<T>, GatewayError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GatewayError::Aborted) => Ok(None),
        Err(err) => Err(err),
    }
}
