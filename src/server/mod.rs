mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;
pub use self::types::*;

#[derive(OpenApi)]
#[openapi(
    paths(api::run_handler, api::metrics_handler),
    components(schemas(types::JobRequest, types::JobResponse))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/run", post(api::run_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // 请求只有任务描述：64K
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}
