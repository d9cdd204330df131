//! Agent settings management.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::handlers::settings;
use crate::schemas::admin::settings::{AgentSettings, AgentSettingsPatch};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(get_settings, update_settings),
    components(schemas(AgentSettings, AgentSettingsPatch))
)]
pub struct SettingsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/settings", get(get_settings).put(update_settings))
}

#[utoipa::path(
    get,
    path = "/admin/settings",
    tag = "admin",
    responses(
        (status = 200, description = "Current agent settings", body = AgentSettings),
        (status = 401, description = "Unauthorised (management token required)"),
    )
)]
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AgentSettings>, ServerError> {
    let current = settings::load(&*state.store, &state.config.agent_defaults).await?;
    Ok(Json(current))
}

#[utoipa::path(
    put,
    path = "/admin/settings",
    tag = "admin",
    request_body = AgentSettingsPatch,
    responses(
        (status = 200, description = "Merged and stored agent settings", body = AgentSettings),
        (status = 400, description = "Invalid field value"),
        (status = 401, description = "Unauthorised (management token required)"),
    )
)]
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<AgentSettingsPatch>,
) -> Result<Json<AgentSettings>, ServerError> {
    patch.validate()?;
    let merged = settings::update(&*state.store, &state.config.agent_defaults, patch).await?;
    Ok(Json(merged))
}
