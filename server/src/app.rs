use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{AudioCache, Synthesizer};

use crate::auth::require_api_key;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::handlers;
use crate::metrics::AppMetrics;
use crate::service::SpeechService;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SpeechService>,
    pub config: Arc<ServerConfig>,
    pub metrics: AppMetrics,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, cache: Arc<AudioCache>, synth: Arc<dyn Synthesizer>) -> Self {
        let metrics = AppMetrics::new();
        let service = SpeechService::new(
            cache,
            synth,
            config.synthesis_timeout(),
            metrics.speech.clone(),
        );
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
            metrics,
            started_at: Instant::now(),
        }
    }
}

/// Build the full application: every route at the root and under `/api`.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();

    // One bucket per client IP: X-Forwarded-For / X-Real-IP / Forwarded,
    // then the peer address.
    let replenish_ms = (60_000 / u64::from(config.rate_limit_per_minute.max(1))).max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute per client", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(rate_limit_as_json))
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let public_api = Router::new()
        .route("/", get(handlers::service_info))
        .route("/health", get(handlers::health_check));

    let protected_api = Router::new()
        .route("/voices", get(handlers::list_voices))
        .route("/synthesize", post(handlers::synthesize))
        .route("/stream", post(handlers::stream))
        .route("/download/{audio_id}", get(handlers::download))
        .route("/cache/status", get(handlers::cache_status))
        .route("/cache/clear", post(handlers::cache_clear))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let api = Router::new().merge(public_api).merge(protected_api);

    let app = Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(RequestBodyLimitLayer::new(body_limit(&config)))
        .layer(middleware::from_fn_with_state(state.clone(), oversized_body_as_json))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state);

    Ok(app)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let base = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(allowed_origins) = &config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

/// Largest accepted request body: worst-case UTF-8 for the longest input plus
/// room for the other fields.
fn body_limit(config: &ServerConfig) -> usize {
    config.max_input_length.saturating_mul(4).saturating_add(4096)
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let Ok(value) = HeaderValue::from_str(&request_id) else {
        return next.run(request).await;
    };
    let name = HeaderName::from_static(REQUEST_ID_HEADER);
    request.headers_mut().insert(name.clone(), value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(name, value);
    response
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    response
}

/// Give governor rejections the same JSON body as every other error, keeping
/// its retry headers.
async fn rate_limit_as_json(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return response;
    }

    warn!("Rate limit exceeded");
    let mut json = ApiError::RateLimitExceeded.into_response();
    for name in [header::RETRY_AFTER, HeaderName::from_static("x-ratelimit-after")] {
        if let Some(value) = response.headers().get(&name) {
            json.headers_mut().insert(name.clone(), value.clone());
        }
    }
    json
}

/// Bodies rejected by the size limit are reported like any other over-long
/// input.
async fn oversized_body_as_json(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return response;
    }

    warn!("Request body over {} bytes rejected", body_limit(&state.config));
    ApiError::InvalidInput(format!(
        "Text too long (max {} characters)",
        state.config.max_input_length
    ))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_limit_covers_max_input() {
        let config = ServerConfig {
            max_input_length: 100,
            ..ServerConfig::default()
        };
        assert_eq!(body_limit(&config), 4496);
    }
}
