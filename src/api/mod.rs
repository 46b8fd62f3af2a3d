pub mod auth;
pub mod error;
mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::activity::ActivityMonitor;
use crate::manager::ExecManager;
use crate::shutdown::ShutdownCoordinator;

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub manager: ExecManager,
    pub activity: ActivityMonitor,
    pub shutdown: ShutdownCoordinator,
}

/// Configuration for the HTTP/WS router.
///
/// Use `RouterConfig::default()` in tests for a minimal no-auth setup.
#[derive(Default)]
pub struct RouterConfig {
    pub token: Option<String>,
    pub cors_origins: Vec<String>,
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let protected = Router::new()
        .route("/exec", post(create_exec))
        .route("/exec/{id}", get(get_exec))
        .route("/exec/{id}/resize", post(resize_exec))
        .route("/containers", get(list_containers))
        .route("/attach/{id}", get(attach))
        .with_state(state.clone());

    // Every accepted request counts as activity; the tick layer sits inside
    // auth so unauthorized probes cannot keep the daemon alive. Health
    // checks bypass both.
    let activity = state.activity.clone();
    let protected = protected.layer(axum::middleware::from_fn(
        move |req: axum::extract::Request, next: axum::middleware::Next| {
            let activity = activity.clone();
            async move {
                activity.tick();
                next.run(req).await
            }
        },
    ));

    let protected = match config.token {
        Some(token) => protected.layer(axum::middleware::from_fn(move |req, next| {
            let t = token.clone();
            async move { auth::require_auth(t, req, next).await }
        })),
        None => protected,
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)); // 1 MB

    if config.cors_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
    }
}
