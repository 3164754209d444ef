pub mod config;
pub mod envelope;
pub mod error;
pub mod login;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::MatchedPath;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use common_auth::Authenticator;
use common_obs::{
    encode_prometheus_metrics, health_router, http_requests_inflight, http_requests_total,
    SpanExt, PROMETHEUS_CONTENT_TYPE,
};
use config::{CorsSettings, LoginSvcConfig};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info_span;
use uuid::Uuid;

pub const SERVICE_NAME: &str = "login-svc";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
const REQUEST_ID_HEADER: &str = "x-request-id";
const UNMATCHED_ROUTE: &str = "unmatched";

#[derive(Clone, Debug)]
pub struct AppState {
    pub authenticator: Authenticator,
    pub cors: CorsSettings,
}

impl AppState {
    pub fn new(config: &LoginSvcConfig) -> Self {
        Self {
            authenticator: Authenticator::new(config.credentials.clone()),
            cors: config.cors.clone(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    login::register_metrics();
    let cors = cors_layer(&state.cors);

    Router::new()
        .route("/api/login", post(login::login))
        .route("/metrics", get(metrics))
        .with_state(state)
        .merge(health_router(SERVICE_NAME, VERSION))
        .layer(cors)
        .route_layer(from_fn(tag_route))
        .layer(from_fn(request_context))
}

/// Route template a response was served by, used as the metrics label.
#[derive(Clone, Debug)]
struct RouteLabel(String);

/// Runs only for registered routes, so requests answered by the fallback
/// (including CORS preflights to unknown paths) carry no label.
async fn tag_route(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string());
    let mut response = next.run(req).await;
    if let Some(route) = route {
        response.extensions_mut().insert(RouteLabel(route));
    }
    response
}

fn cors_layer(settings: &CorsSettings) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if settings.allows_any() {
        layer.allow_origin(Any)
    } else {
        let origins = settings
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok());
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let request_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let _inflight = InFlightGuard::new();

    let span = info_span!(
        "http.request",
        method = %method,
        path = %path,
        remote_addr = remote_addr.as_str(),
        request_id = %request_id
    );
    span.with_req(&request_id);

    let start = Instant::now();
    {
        let _guard = span.enter();
        tracing::debug!(event = "request_start", method = %method, path = %path);
    }
    let mut response = next.run(req).await;

    let status = response.status();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    {
        let _guard = span.enter();
        tracing::info!(
            event = "request_end",
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            remote_addr = remote_addr.as_str()
        );
    }

    let route = response
        .extensions()
        .get::<RouteLabel>()
        .map(|label| label.0.as_str())
        .unwrap_or(UNMATCHED_ROUTE);
    http_requests_total().inc(&[SERVICE_NAME, route, status.as_str()], 1);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        )],
        encode_prometheus_metrics(),
    )
}

struct InFlightGuard;

impl InFlightGuard {
    fn new() -> Self {
        http_requests_inflight().add(&[SERVICE_NAME], 1);
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        http_requests_inflight().add(&[SERVICE_NAME], -1);
    }
}
