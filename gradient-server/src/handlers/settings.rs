//! Loading and merge-updating the agent settings record.

use gradient_agent::{AgentEndpoint, AgentFlags};
use tracing::{info, warn};

use crate::config::AgentDefaults;
use crate::entities::SettingsStore;
use crate::error::ServerError;
use crate::schemas::admin::settings::{AgentSettings, AgentSettingsPatch};

/// `config_store` key of the settings record.
pub const SETTINGS_KEY: &str = "agent_settings";

impl AgentSettings {
    pub fn from_defaults(defaults: &AgentDefaults) -> Self {
        Self {
            do_agent_base_url: defaults.base_url.clone(),
            do_agent_access_key: defaults.access_key.clone(),
            include_retrieval_info: defaults.include_retrieval_info,
            include_functions_info: defaults.include_functions_info,
            include_guardrails_info: defaults.include_guardrails_info,
        }
    }

    pub fn apply(&mut self, patch: AgentSettingsPatch) {
        if let Some(url) = patch.do_agent_base_url {
            self.do_agent_base_url = Some(url);
        }
        if let Some(key) = patch.do_agent_access_key {
            self.do_agent_access_key = Some(key);
        }
        if let Some(v) = patch.include_retrieval_info {
            self.include_retrieval_info = v;
        }
        if let Some(v) = patch.include_functions_info {
            self.include_functions_info = v;
        }
        if let Some(v) = patch.include_guardrails_info {
            self.include_guardrails_info = v;
        }
    }

    /// Endpoint to call, or [`ServerError::Configuration`] when either the
    /// base URL or the access key is missing.
    pub fn endpoint(&self) -> Result<AgentEndpoint, ServerError> {
        let base_url = self
            .do_agent_base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let access_key = self
            .do_agent_access_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match (base_url, access_key) {
            (Some(url), Some(key)) => Ok(AgentEndpoint::new(url, key)),
            _ => Err(ServerError::Configuration),
        }
    }

    pub fn flags(&self) -> AgentFlags {
        AgentFlags {
            include_retrieval_info: self.include_retrieval_info,
            include_functions_info: self.include_functions_info,
            include_guardrails_info: self.include_guardrails_info,
        }
    }
}

/// The stored record, or one seeded from `defaults` when none is stored.
///
/// An unreadable stored record is an internal error; it is never replaced
/// by the defaults.
pub async fn load<S: SettingsStore>(
    store: &S,
    defaults: &AgentDefaults,
) -> Result<AgentSettings, ServerError> {
    let Some(raw) = store.get_config_value(SETTINGS_KEY).await? else {
        return Ok(AgentSettings::from_defaults(defaults));
    };
    serde_json::from_str(&raw).map_err(|e| {
        warn!(error = %e, "stored agent settings are unreadable");
        ServerError::Internal(format!("stored agent settings are unreadable: {e}"))
    })
}

/// Merge `patch` onto the current record and persist the result.
pub async fn update<S: SettingsStore>(
    store: &S,
    defaults: &AgentDefaults,
    patch: AgentSettingsPatch,
) -> Result<AgentSettings, ServerError> {
    let mut settings = load(store, defaults).await?;
    settings.apply(patch);
    let raw = serde_json::to_string(&settings)
        .map_err(|e| ServerError::Internal(format!("failed to encode agent settings: {e}")))?;
    store.set_config_value(SETTINGS_KEY, &raw).await?;
    info!(
        base_url = settings.do_agent_base_url.as_deref().unwrap_or(""),
        include_retrieval_info = settings.include_retrieval_info,
        include_functions_info = settings.include_functions_info,
        include_guardrails_info = settings.include_guardrails_info,
        "agent settings updated"
    );
    Ok(settings)
}
