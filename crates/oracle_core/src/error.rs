//! Error taxonomy for oracle runs.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleErrorKind {
    Validation,
    Transport,
    MalformedEvent,
    Upstream,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Rejected before any request is made; shown inline.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Transport(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    /// Message sent by the oracle itself, shown verbatim.
    #[error("{0}")]
    Upstream(String),
}

impl OracleError {
    pub fn kind(&self) -> OracleErrorKind {
        match self {
            OracleError::Validation(_) => OracleErrorKind::Validation,
            OracleError::Transport(_) => OracleErrorKind::Transport,
            OracleError::MalformedEvent(_) => OracleErrorKind::MalformedEvent,
            OracleError::Upstream(_) => OracleErrorKind::Upstream,
        }
    }

    /// Every failure of a started run forces the user through verification again.
    pub fn requires_reverification(&self) -> bool {
        !matches!(self, OracleError::Validation(_))
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Transport(format!("request to the oracle timed out: {err}"))
        } else {
            OracleError::Transport(err.to_string())
        }
    }
}
