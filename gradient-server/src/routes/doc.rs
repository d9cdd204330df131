use crate::routes::{admin, conversations, health};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "gradient-server",
    description = "Conversations and streamed agent replies",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(conversations::ConversationApi::openapi());
    root.merge(admin::api_docs());
    root
}
