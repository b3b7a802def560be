//! Cloud control plane errors

use thiserror::Error;

/// Errors from the identity directory and the resource manager
#[derive(Debug, Error)]
pub enum CloudError {
    /// Request never produced an HTTP response
    #[error("request failed: {0}")]
    Transport(String),

    /// Unexpected HTTP status
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code returned
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// Response could not be decoded or lacked a required field
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Deployment reached a terminal state other than `Succeeded`
    #[error("deployment {deployment} finished in state {state}")]
    DeploymentFailed {
        /// Deployment name
        deployment: String,
        /// Terminal provisioning state
        state: String,
    },
}

impl CloudError {
    /// Create a malformed-response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Whether the same request could succeed if sent again.
    ///
    /// Transport failures, throttling (429) and server errors (5xx) are
    /// transient; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Transport(_) => true,
            CloudError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            CloudError::MalformedResponse(_) | CloudError::DeploymentFailed { .. } => false,
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CloudError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None if err.is_decode() => CloudError::MalformedResponse(err.to_string()),
            None => CloudError::Transport(err.to_string()),
        }
    }
}
