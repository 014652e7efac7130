//! HTTP control surface
//!
//! Code redemption, log inspection and connection introspection, all behind
//! the admin IP gate. `/health` is the only ungated route.

pub mod admin;
pub mod routes;


use crate::auth::StepUpAuthenticator;
use crate::registry::ConnectionRegistry;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use gatekeeper_core::LogSink;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use admin::AdminAllowList;

/// Shared state of the control surface
#[derive(Clone)]
pub struct ApiState {
    pub auth: Arc<StepUpAuthenticator>,
    pub log: LogSink,
    pub registry: ConnectionRegistry,
    pub admin_ips: Arc<AdminAllowList>,
}

/// Build the control surface router
pub fn create_api_router(state: ApiState) -> Router {
    let gated = Router::new()
        .route(
            "/api/authenticate",
            get(routes::authenticate).post(routes::authenticate),
        )
        .route("/api/log", get(routes::view_log))
        .route("/api/connections", get(routes::list_connections))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin_ip,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the control surface on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("control surface listening on {}", addr);
    }

    let app = create_api_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
