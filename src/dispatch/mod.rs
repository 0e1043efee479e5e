//! Scheduler-side half of the distributed build protocol: the
//! [`BuildMachine`] proxy talking to a remote agent, and the
//! [`RemoteBuildRequest`] polling state machine tracking one dispatched
//! build to completion.

pub mod machine;
pub mod remote;

pub use machine::BuildMachine;
pub use remote::RemoteBuildRequest;

use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Transport and protocol failures talking to a build agent. Build
/// outcomes never appear here; they always travel as a status value in
/// a successful response, keeping the protocol resilient to partial
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid agent URL")]
    InvalidAgentUrl,
    #[error("error from build agent: {0}\n{1}")]
    AgentError(StatusCode, String),
    #[error("HTTP error: {0}\n{1}")]
    HttpError(reqwest::Error, String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DispatchError {
    /// The HTTP status code of any error inside, if there is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::AgentError(status, _) => Some(*status),
            Self::HttpError(error, _body) => error.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpError(err, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn error_status_extraction() {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        assert_eq!(
            DispatchError::AgentError(status, "".into()).status(),
            Some(status)
        );
        assert!(DispatchError::InvalidAgentUrl.status().is_none());
        assert!(DispatchError::Other(anyhow!("some error")).status().is_none());
    }
}
