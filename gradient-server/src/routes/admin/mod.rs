pub mod settings;

use crate::middleware::auth;
use crate::state::AppState;

use axum::{middleware, Router};
use std::sync::Arc;
use utoipa::OpenApi;

/// Routes nested under `/admin`, guarded by the management token.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(settings::router())
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::check_management_auth,
        ))
}

pub fn api_docs() -> utoipa::openapi::OpenApi {
    settings::SettingsApi::openapi()
}
