//! Router construction.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, Request, header::CONTENT_TYPE};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::handlers::{health, newz, proxy, store};
use crate::state::AppState;

/// Build the full `/v0` router with CORS and request tracing.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE]);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                route = %request.uri().path(),
                status_code = tracing::field::Empty,
                latency_ms = tracing::field::Empty,
            )
        })
        .on_response(
            |response: &axum::response::Response, latency: Duration, span: &Span| {
                span.record("status_code", response.status().as_u16());
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                span.record("latency_ms", latency_ms);
            },
        );

    Router::new()
        .route("/v0/health", get(health))
        .route("/v0/store/user", get(store::get_user))
        .route(
            "/v0/store/magnets",
            get(store::list_magnets).post(store::add_magnet),
        )
        .route("/v0/store/magnets/check", get(store::check_magnet))
        .route(
            "/v0/store/magnets/link/generate",
            post(store::generate_link),
        )
        .route(
            "/v0/store/magnets/{id}",
            get(store::get_magnet).delete(store::remove_magnet),
        )
        .route(
            "/v0/store/newz",
            get(newz::list_newz).post(newz::add_newz),
        )
        .route("/v0/store/newz/check", get(newz::check_newz))
        .route(
            "/v0/store/newz/link/generate",
            post(newz::generate_newz_link),
        )
        .route(
            "/v0/store/newz/{id}",
            get(newz::get_newz).delete(newz::remove_newz),
        )
        .route(
            "/v0/proxy",
            get(proxy::create_proxy_links).post(proxy::create_proxy_links),
        )
        .route("/v0/proxy/{token}", get(proxy::proxy_access))
        .route("/v0/proxy/{token}/{filename}", get(proxy::proxy_access))
        .layer(cors_layer)
        .layer(trace_layer)
        .with_state(state)
}
