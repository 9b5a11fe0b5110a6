//! HTTP front-end for the multiclient dispatch engine.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /api/v1/request` | [`router::handle_request`] |
//! | `GET /health` | [`router::handle_health`] |
//! | `GET /metrics` | [`router::handle_metrics`] |
//! | `GET, POST /admin/engines` | [`admin::list_engines`], [`admin::add_engine`] |
//! | `PUT, DELETE /admin/engines/{id}` | [`admin::replace_engine`], [`admin::remove_engine`] |
//! | `POST /admin/engines/{id}/probe` | [`admin::probe_engine`] |
//! | `GET /admin/consensus-height` | [`admin::consensus_height`] |

pub mod admin;
pub mod errors;
pub mod router;

use axum::{
    routing::{get, post, put},
    Router,
};
use multiclient_core::{config::AppConfig, engine::MultiClient};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Builds the application router around a started or unstarted client.
pub fn create_app(client: Arc<MultiClient>, config: &AppConfig) -> Router {
    let mut public = Router::new().route("/health", get(router::handle_health));
    if config.metrics.enabled {
        public = public.route("/metrics", get(router::handle_metrics));
    }

    let api = Router::new().route("/api/v1/request", post(router::handle_request));

    let admin = Router::new()
        .route("/admin/engines", get(admin::list_engines).post(admin::add_engine))
        .route(
            "/admin/engines/{id}",
            put(admin::replace_engine).delete(admin::remove_engine),
        )
        .route("/admin/engines/{id}/probe", post(admin::probe_engine))
        .route("/admin/consensus-height", get(admin::consensus_height));

    public
        .merge(api)
        .merge(admin)
        .with_state(client)
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
}
