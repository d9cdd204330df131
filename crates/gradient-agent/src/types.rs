//! Request and response shapes of the agent chat-completions endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the agent lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    pub base_url: String,
    pub access_key: String,
}

impl AgentEndpoint {
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_key: access_key.into(),
        }
    }

    /// `{base_url}/api/v1/chat/completions`, tolerating a trailing slash.
    pub fn completions_url(&self) -> String {
        format!(
            "{}/api/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Which side-channel payloads the agent should attach to its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentFlags {
    pub include_retrieval_info: bool,
    pub include_functions_info: bool,
    pub include_guardrails_info: bool,
}

impl Default for AgentFlags {
    fn default() -> Self {
        Self {
            include_retrieval_info: true,
            include_functions_info: false,
            include_guardrails_info: false,
        }
    }
}

/// One entry of the conversation history sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: String,
    pub content: String,
}

impl AgentMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// JSON body of `POST /api/v1/chat/completions`.
#[derive(Debug, Serialize)]
pub(crate) struct CompletionRequest<'a> {
    pub messages: &'a [AgentMessage],
    pub stream: bool,
    pub include_retrieval_info: bool,
    pub include_functions_info: bool,
    pub include_guardrails_info: bool,
}

impl<'a> CompletionRequest<'a> {
    pub(crate) fn new(messages: &'a [AgentMessage], flags: AgentFlags, stream: bool) -> Self {
        Self {
            messages,
            stream,
            include_retrieval_info: flags.include_retrieval_info,
            include_functions_info: flags.include_functions_info,
            include_guardrails_info: flags.include_guardrails_info,
        }
    }
}

/// Result of a buffered completion call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Assistant text; empty when the agent sent none.
    pub content: String,
    pub retrieval: Option<Value>,
    pub guardrails: Option<Value>,
    pub functions: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    retrieval: Option<Value>,
    #[serde(default)]
    guardrails: Option<Value>,
    #[serde(default)]
    functions: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl From<CompletionResponse> for Completion {
    fn from(resp: CompletionResponse) -> Self {
        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        Self {
            content,
            retrieval: resp.retrieval.filter(|v| !v.is_null()),
            guardrails: resp.guardrails.filter(|v| !v.is_null()),
            functions: resp.functions.filter(|v| !v.is_null()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn completions_url_strips_trailing_slash() {
        let ep = AgentEndpoint::new("https://agent.example/", "k");
        assert_eq!(
            ep.completions_url(),
            "https://agent.example/api/v1/chat/completions"
        );
    }

    #[test]
    fn request_body_carries_flags() {
        let msgs = vec![AgentMessage::new("user", "hi")];
        let body = CompletionRequest::new(&msgs, AgentFlags::default(), true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["include_retrieval_info"], true);
        assert_eq!(json["include_functions_info"], false);
        assert_eq!(json["include_guardrails_info"], false);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn completion_without_choices_is_empty() {
        let resp: CompletionResponse = serde_json::from_str(r#"{"retrieval":{"k":1}}"#).unwrap();
        let c = Completion::from(resp);
        assert_eq!(c.content, "");
        assert_eq!(c.retrieval, Some(serde_json::json!({"k": 1})));
        assert!(c.functions.is_none());
    }
}
