//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Runtime configuration for gradient-server.
///
/// Every field except the JWT secret has a default so a development server
/// starts with only `GRADIENT_JWT_SECRET` set. A `.env` file in the working
/// directory is honoured.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://gradient.db?mode=rwc"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// HS256 secret used to verify caller bearer tokens.
    pub jwt_secret: String,

    /// Bearer token guarding `/admin`; `None` leaves admin routes open.
    pub admin_token: Option<String>,

    /// Comma-separated CORS allow-list; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,

    /// Timeout for buffered agent calls. Streaming calls are unbounded.
    pub agent_timeout: Duration,

    /// Agent settings used until an admin stores a settings record.
    pub agent_defaults: AgentDefaults,
}

/// Environment-provided seed for the agent settings record.
#[derive(Debug, Clone)]
pub struct AgentDefaults {
    pub base_url: Option<String>,
    pub access_key: Option<String>,
    pub include_retrieval_info: bool,
    pub include_functions_info: bool,
    pub include_guardrails_info: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("missing required environment variable {0}")]
pub struct MissingEnv(&'static str);

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, MissingEnv> {
        dotenvy::dotenv().ok();

        let jwt_secret = non_empty_env("GRADIENT_JWT_SECRET").ok_or(MissingEnv("GRADIENT_JWT_SECRET"))?;

        Ok(Self {
            bind_address: env_or("GRADIENT_BIND", "0.0.0.0:8000"),
            database_url: env_or("GRADIENT_DATABASE_URL", "sqlite://gradient.db?mode=rwc"),
            log_level: env_or("GRADIENT_LOG", "info"),
            log_json: parse_bool("GRADIENT_LOG_JSON", false),
            jwt_secret,
            admin_token: non_empty_env("GRADIENT_ADMIN_TOKEN"),
            cors_allowed_origins: non_empty_env("GRADIENT_CORS_ORIGINS"),
            enable_swagger: parse_bool("GRADIENT_ENABLE_SWAGGER", true),
            agent_timeout: Duration::from_secs(parse_env("GRADIENT_AGENT_TIMEOUT_SECS", 60)),
            agent_defaults: AgentDefaults {
                base_url: non_empty_env("GRADIENT_AGENT_BASE_URL"),
                access_key: non_empty_env("GRADIENT_AGENT_ACCESS_KEY"),
                include_retrieval_info: parse_bool("GRADIENT_INCLUDE_RETRIEVAL_INFO", true),
                include_functions_info: parse_bool("GRADIENT_INCLUDE_FUNCTIONS_INFO", false),
                include_guardrails_info: parse_bool("GRADIENT_INCLUDE_GUARDRAILS_INFO", false),
            },
        })
    }
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            base_url: None,
            access_key: None,
            include_retrieval_info: true,
            include_functions_info: false,
            include_guardrails_info: false,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    /// Configuration for tests: in-memory database, open admin routes.
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            log_level: "debug".into(),
            log_json: false,
            jwt_secret: "test-secret".into(),
            admin_token: None,
            cors_allowed_origins: None,
            enable_swagger: false,
            agent_timeout: Duration::from_secs(5),
            agent_defaults: AgentDefaults::default(),
        }
    }
}
