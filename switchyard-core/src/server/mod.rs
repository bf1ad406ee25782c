//! HTTP surface of the gateway
//!
//! Every endpoint transformer in the registry gets a `POST` route at its
//! bound path. Auxiliary routes cover token counting, provider management and
//! read-only views of the transformers and configuration.

mod handlers;
mod providers;

use crate::error::{GatewayError, GatewayResult};
use crate::pipeline::Gateway;
use axum::extract::rejection::JsonRejection;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Request bodies may carry base64 images and long histories
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Route used for token counting, outside the transformer endpoints
pub const COUNT_TOKENS_ROUTE: &str = "/v1/messages/count_tokens";

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

/// Unwrap a JSON body, reporting rejections in the gateway's error shape
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> GatewayResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| GatewayError::InvalidRequest(rejection.body_text()))
}

/// Build the axum router for `gateway`
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(COUNT_TOKENS_ROUTE, post(handlers::count_tokens))
        .route("/api/transformers", get(handlers::list_transformers))
        .route("/api/config", get(handlers::get_config))
        .route(
            "/providers",
            get(providers::list_providers).post(providers::create_provider),
        )
        .route(
            "/providers/{name}",
            get(providers::get_provider)
                .put(providers::update_provider)
                .delete(providers::delete_provider),
        )
        .route("/providers/{name}/toggle", patch(providers::toggle_provider));

    for (path, transformer) in gateway.transformers().endpoints() {
        debug!("Serving {} through transformer '{}'", path, transformer.name());
        router = router.route(&path, post(handlers::transformer_endpoint));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(AppState::new(gateway))
}

/// Serve on the configured host and port until `shutdown` resolves
pub async fn serve<F>(gateway: Arc<Gateway>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server = &gateway.config().config().server;
    let bind_addr = format!("{}:{}", server.host, server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    serve_on(listener, gateway, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_on<F>(listener: TcpListener, gateway: Arc<Gateway>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Gateway listening on {}", listener.local_addr()?);
    let app = build_router(gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Gateway shut down gracefully");
    Ok(())
}
