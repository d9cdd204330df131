//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI document (disable with `GRADIENT_ENABLE_SWAGGER=false`)
//! - Health route
//! - `/conversations` routes (caller bearer token required)
//! - `/admin` routes (optionally protected by the management token)

mod admin;
mod conversations;
pub mod doc;
mod health;

use axum::{middleware, Router};
use crate::middleware::{cors, trace};
use crate::state::AppState;
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

// ── Router builder ────────────────────────────────────────────────────────────

pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .merge(conversations::router(Arc::clone(&state)))
        .nest("/admin", admin::router(Arc::clone(&state)));

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            trace::trace_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::entities::memory_store;
    use crate::middleware::auth::issue_token;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{header as has_header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn app_with(config: Config) -> Router {
        let state = AppState::new(config, memory_store().await);
        build(Arc::new(state))
    }

    async fn app() -> Router {
        app_with(Config::for_tests()).await
    }

    fn bearer(user: &str) -> String {
        format!("Bearer {}", issue_token("test-secret", user))
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn call_json(
        app: &Router,
        verb: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(verb).uri(uri);
        if let Some(user) = user {
            req = req.header(header::AUTHORIZATION, bearer(user));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        let (status, bytes) = call(app, req).await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let app = app().await;
        let (status, body) = call_json(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn conversations_require_a_valid_token() {
        let app = app().await;
        let (status, body) = call_json(&app, "GET", "/conversations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let req = Request::builder()
            .uri("/conversations")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&app, req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let app = app().await;

        let (status, created) =
            call_json(&app, "POST", "/conversations", Some("alice"), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["title"], "New chat");
        let id = created["id"].as_str().unwrap().to_owned();
        let uri = format!("/conversations/{id}");

        let (status, _) =
            call_json(&app, "PATCH", &uri, Some("alice"), Some(json!({"title": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, renamed) =
            call_json(&app, "PATCH", &uri, Some("alice"), Some(json!({"title": "Plans"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["title"], "Plans");

        let (_, listed) = call_json(&app, "GET", "/conversations", Some("alice"), None).await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        let (_, others) = call_json(&app, "GET", "/conversations", Some("bob"), None).await;
        assert_eq!(others, json!([]));

        let (status, _) = call_json(&app, "GET", &uri, Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, detail) = call_json(&app, "GET", &uri, Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["title"], "Plans");
        assert_eq!(detail["messages"], json!([]));

        let (status, _) = call_json(&app, "DELETE", &uri, Some("alice"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call_json(&app, "DELETE", &uri, Some("alice"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_message_is_rejected_before_anything_is_stored() {
        let app = app().await;
        let (_, created) = call_json(&app, "POST", "/conversations", Some("alice"), None).await;
        let id = created["id"].as_str().unwrap();

        let (status, _) = call_json(
            &app,
            "POST",
            &format!("/conversations/{id}/messages/stream"),
            Some("alice"),
            Some(json!({"content": " \n "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, detail) =
            call_json(&app, "GET", &format!("/conversations/{id}"), Some("alice"), None).await;
        assert_eq!(detail["messages"], json!([]));
    }

    #[tokio::test]
    async fn stream_without_agent_settings_is_a_configuration_error() {
        let app = app().await;
        let (_, created) = call_json(&app, "POST", "/conversations", Some("alice"), None).await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = call_json(
            &app,
            "POST",
            &format!("/conversations/{id}/messages/stream"),
            Some("alice"),
            Some(json!({"content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "agent endpoint not configured by admin");

        let (_, detail) =
            call_json(&app, "GET", &format!("/conversations/{id}"), Some("alice"), None).await;
        assert_eq!(detail["messages"][0]["role"], "user");
        assert_eq!(detail["messages"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn streamed_turn_over_http() {
        let agent = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(has_header("authorization", "Bearer agent-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(
                        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                         data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                         data: [DONE]\n\n",
                    ),
            )
            .mount(&agent)
            .await;

        let app = app().await;
        let (status, _) = call_json(
            &app,
            "PUT",
            "/admin/settings",
            None,
            Some(json!({"do_agent_base_url": agent.uri(), "do_agent_access_key": "agent-key"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, created) = call_json(&app, "POST", "/conversations", Some("alice"), None).await;
        let id = created["id"].as_str().unwrap();

        let req = Request::builder()
            .method("POST")
            .uri(format!("/conversations/{id}/messages/stream"))
            .header(header::AUTHORIZATION, bearer("alice"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"content": "hi"}).to_string()))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        assert!(response.headers().contains_key(trace::X_TRACE_ID));
        let text = String::from_utf8(
            response.into_body().collect().await.unwrap().to_bytes().to_vec(),
        )
        .unwrap();
        assert!(text.contains("data: Hel\n\ndata: lo\n\ndata: [DONE]\n\n"), "{text:?}");

        let (_, detail) =
            call_json(&app, "GET", &format!("/conversations/{id}"), Some("alice"), None).await;
        assert_eq!(detail["messages"][1]["content"], "Hello");
        assert_eq!(detail["title"], "Hello");
    }

    #[tokio::test]
    async fn admin_token_guards_settings() {
        let mut config = Config::for_tests();
        config.admin_token = Some("root".into());
        let app = app_with(config).await;

        let (status, _) = call_json(&app, "GET", "/admin/settings", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/admin/settings")
            .header(header::AUTHORIZATION, "Bearer root")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let settings: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(settings["include_retrieval_info"], true);
        assert_eq!(settings["include_functions_info"], false);
    }

    #[tokio::test]
    async fn settings_patch_merges() {
        let app = app().await;
        call_json(
            &app,
            "PUT",
            "/admin/settings",
            None,
            Some(json!({"do_agent_base_url": "http://agent.local", "include_guardrails_info": true})),
        )
        .await;
        let (status, merged) = call_json(
            &app,
            "PUT",
            "/admin/settings",
            None,
            Some(json!({"do_agent_access_key": "k"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(merged["do_agent_base_url"], "http://agent.local");
        assert_eq!(merged["do_agent_access_key"], "k");
        assert_eq!(merged["include_guardrails_info"], true);

        let (status, _) = call_json(
            &app,
            "PUT",
            "/admin/settings",
            None,
            Some(json!({"do_agent_base_url": "not a url"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
