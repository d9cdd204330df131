use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// The singleton agent settings record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AgentSettings {
    pub do_agent_base_url: Option<String>,
    pub do_agent_access_key: Option<String>,
    #[serde(default = "default_true")]
    pub include_retrieval_info: bool,
    #[serde(default)]
    pub include_functions_info: bool,
    #[serde(default)]
    pub include_guardrails_info: bool,
}

fn default_true() -> bool {
    true
}

/// Partial update of [`AgentSettings`]; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct AgentSettingsPatch {
    #[validate(url)]
    pub do_agent_base_url: Option<String>,
    #[validate(length(min = 1))]
    pub do_agent_access_key: Option<String>,
    pub include_retrieval_info: Option<bool>,
    pub include_functions_info: Option<bool>,
    pub include_guardrails_info: Option<bool>,
}
