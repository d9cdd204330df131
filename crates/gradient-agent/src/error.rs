use thiserror::Error;

/// Errors that can be returned by the agent client.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent answered with a non-2xx status.
    #[error("agent returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The agent could not be reached, timed out, or the body could not be read.
    #[error("agent unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    /// A buffered 2xx response did not carry a JSON body.
    #[error("invalid agent response: {0}")]
    InvalidResponse(String),
}

impl AgentError {
    /// HTTP status reported by the agent, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            AgentError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}
