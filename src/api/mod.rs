use axum::body::Body;
use axum::extract::{OriginalUri, State};
use axum::http::{
    header::{HeaderName, ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, ORIGIN},
    Request, StatusCode,
};
use axum::response::IntoResponse;
use axum::response::Response;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};

use crate::config::Config;

pub mod chat;

pub use chat::AppState;

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
static LAST_EVENT_ID_HEADER: HeaderName = HeaderName::from_static("last-event-id");

pub fn router(cfg: &Config, state: AppState) -> Router {
    let allowed_headers = [
        ACCEPT,
        CACHE_CONTROL,
        CONTENT_TYPE,
        ORIGIN,
        HeaderName::from_static("x-requested-with"),
        LAST_EVENT_ID_HEADER.clone(),
        REQUEST_ID_HEADER.clone(),
    ];
    let exposed_headers = [CONTENT_TYPE, CACHE_CONTROL, CONNECTION];

    let cors = if cfg.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(allowed_headers)
            .expose_headers(exposed_headers)
            .allow_methods(Any)
            .allow_credentials(false)
    } else {
        let origins = cfg
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_headers(allowed_headers)
            .expose_headers(exposed_headers)
            .allow_methods(Any)
            .allow_credentials(true)
    };

    let trace = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            let request_id = header_value(req, &REQUEST_ID_HEADER);
            let forwarded_for = header_value(req, &HeaderName::from_static("x-forwarded-for"));
            let user_agent = header_value(req, &HeaderName::from_static("user-agent"));
            info_span!(
                "http.request",
                method = %req.method(),
                uri = %req.uri(),
                version = ?req.version(),
                request_id = %request_id,
                forwarded_for = %forwarded_for,
                user_agent = %user_agent
            )
        })
        .on_request(|req: &Request<Body>, _span: &tracing::Span| {
            if req.headers().contains_key(&LAST_EVENT_ID_HEADER) {
                let last_event_id = header_value(req, &LAST_EVENT_ID_HEADER);
                info!(last_event_id = %last_event_id, "[RECONNECT] client resumed with Last-Event-ID");
            }
            info!("request.start");
        })
        .on_response(
            |res: &Response, latency: std::time::Duration, _span: &tracing::Span| {
                if res.status() == StatusCode::TOO_MANY_REQUESTS {
                    warn!("[RATE_LIMIT] duplicate request rejected");
                }
                info!(status = %res.status(), latency_ms = %latency.as_millis(), "request.end");
            },
        )
        .on_failure(|err, latency: std::time::Duration, _span: &tracing::Span| {
            tracing::error!(error = %err, latency_ms = %latency.as_millis(), "request.failure");
        });

    let meta = Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        .with_state(state.clone());

    Router::new()
        .merge(chat::router(state))
        .merge(meta)
        .route("/", get(root))
        .fallback(fallback_404)
        .layer(cors)
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER.clone()))
        .layer(SetRequestIdLayer::new(
            REQUEST_ID_HEADER.clone(),
            MakeRequestUuid,
        ))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": crate::core::time::now_rfc3339(),
        "uptime": state.started.elapsed().as_secs_f64(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "dedup": { "tracked": state.chat.dedup().len() }
        }
    }))
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Streaming chat server for community activity recommendations",
        "endpoints": {
            "health": "/health",
            "stream": "/api/v1/chat/stream?message=<text>"
        }
    }))
}

async fn fallback_404(uri: OriginalUri) -> impl IntoResponse {
    let path = uri.0.path().to_string();
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "message": "resource not found",
                "path": path
            }
        })),
    )
}

fn header_value(req: &Request<Body>, name: &HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}
