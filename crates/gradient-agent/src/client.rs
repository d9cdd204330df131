use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::stream::CompletionStream;
use crate::types::{AgentEndpoint, AgentFlags, AgentMessage, Completion, CompletionRequest, CompletionResponse};

/// Upper bound on how much of an error body is kept for diagnostics.
const MAX_ERROR_BODY: usize = 2048;

/// Streaming calls carry no request timeout, so reading an error body is
/// bounded separately.
const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the agent chat-completions endpoint.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    timeout: Duration,
    error_body_timeout: Duration,
}

impl AgentClient {
    /// `timeout` bounds buffered calls only; streaming calls run until the
    /// agent closes the body.
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(concat!("gradient-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout,
            error_body_timeout: ERROR_BODY_TIMEOUT,
        }
    }

    /// Buffered completion: one request, one JSON response.
    pub async fn complete(
        &self,
        endpoint: &AgentEndpoint,
        messages: &[AgentMessage],
        flags: AgentFlags,
    ) -> Result<Completion, AgentError> {
        let resp = self
            .client
            .post(endpoint.completions_url())
            .bearer_auth(&endpoint.access_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .json(&CompletionRequest::new(messages, flags, false))
            .send()
            .await?;
        let resp = check_status(resp, self.error_body_timeout).await?;

        let text = resp.text().await?;
        let parsed: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
        let completion = Completion::from(parsed);
        debug!(content_len = completion.content.len(), "agent completion received");
        Ok(completion)
    }

    /// Streamed completion.
    ///
    /// Resolves once the agent has answered with a 2xx status; the body is
    /// then read lazily through the returned [`CompletionStream`].
    pub async fn stream(
        &self,
        endpoint: &AgentEndpoint,
        messages: &[AgentMessage],
        flags: AgentFlags,
    ) -> Result<CompletionStream, AgentError> {
        let resp = self
            .client
            .post(endpoint.completions_url())
            .bearer_auth(&endpoint.access_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(&CompletionRequest::new(messages, flags, true))
            .send()
            .await?;
        let resp = check_status(resp, self.error_body_timeout).await?;
        debug!(status = resp.status().as_u16(), "agent stream opened");
        Ok(CompletionStream::new(resp.bytes_stream()))
    }
}

async fn check_status(resp: Response, read_timeout: Duration) -> Result<Response, AgentError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = read_error_body(resp, read_timeout).await;
    warn!(status = status.as_u16(), "agent returned an error status");
    Err(AgentError::Upstream {
        status: status.as_u16(),
        body,
    })
}

/// At most [`MAX_ERROR_BODY`] bytes of the body, whatever arrived within
/// `read_timeout`.
async fn read_error_body(mut resp: Response, read_timeout: Duration) -> String {
    let mut raw = Vec::new();
    let read = async {
        while let Ok(Some(chunk)) = resp.chunk().await {
            raw.extend_from_slice(&chunk);
            if raw.len() >= MAX_ERROR_BODY {
                break;
            }
        }
    };
    if tokio::time::timeout(read_timeout, read).await.is_err() {
        debug!("agent error body still open; keeping what arrived");
    }

    raw.truncate(MAX_ERROR_BODY);
    let mut body = String::from_utf8_lossy(&raw).into_owned();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
