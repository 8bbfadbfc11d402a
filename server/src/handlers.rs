use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tts_core::{wav, CacheStatus, Fingerprint, Voice};

use crate::app::AppState;
use crate::error::ApiError;
use crate::metrics::{EndpointMetrics, EndpointMetricsResponse, MetricsResponse, SystemMetrics};
use crate::service::SpeechAudio;
use crate::validation::{validate_audio_id, validate_synthesis_request, ValidatedRequest};

const SERVICE_NAME: &str = "Speech Synthesis API";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
pub struct SpeechBody {
    pub text: Option<String>,
    pub voice_id: Option<u32>,
    pub rate: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Serialize)]
pub struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    status: &'static str,
    cache_size: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    cache_size: usize,
    version: &'static str,
    max_text_length: usize,
    engine: &'static str,
}

#[derive(Serialize)]
pub struct VoicesResponse {
    voices: Vec<Voice>,
}

#[derive(Serialize)]
pub struct StreamResponse {
    audio_id: Fingerprint,
    file_size: usize,
    download_url: String,
    status: &'static str,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
}

#[derive(Serialize)]
pub struct ClearResponse {
    removed_count: usize,
    failed_count: usize,
    message: String,
}

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: SERVICE_NAME,
        version: VERSION,
        status: "active",
        cache_size: state.service.cache().len(),
    })
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        cache_size: state.service.cache().len(),
        version: VERSION,
        max_text_length: state.config.max_text_length,
        engine: state.service.synthesizer().name(),
    })
}

pub async fn list_voices(State(state): State<AppState>) -> Result<Json<VoicesResponse>, ApiError> {
    let voices = state.service.synthesizer().voices().await?;
    info!("Returning {} available voices", voices.len());
    Ok(Json(VoicesResponse { voices }))
}

/// Synthesize (or fetch from cache) and return the WAV bytes.
pub async fn synthesize(
    State(state): State<AppState>,
    payload: Result<Json<SpeechBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (validated, audio) = timed(&state.metrics.synthesize, speak(&state, payload)).await?;

    let mut headers = audio_headers(&audio.fingerprint)?;
    headers.insert(
        "x-cache",
        HeaderValue::from_static(if audio.cached { "HIT" } else { "MISS" }),
    );
    if validated.truncated {
        headers.insert("x-text-truncated", HeaderValue::from_static("true"));
    }

    Ok((headers, audio.bytes).into_response())
}

/// Synthesize and return where the audio can be downloaded.
pub async fn stream(
    State(state): State<AppState>,
    payload: Result<Json<SpeechBody>, JsonRejection>,
) -> Result<Json<StreamResponse>, ApiError> {
    let (_, audio) = timed(&state.metrics.stream, speak(&state, payload)).await?;
    let info = wav::describe(&audio.bytes);

    Ok(Json(StreamResponse {
        audio_id: audio.fingerprint,
        file_size: audio.bytes.len(),
        download_url: format!("/api/download/{}", audio.fingerprint),
        status: "ready",
        cached: audio.cached,
        duration_ms: info.map(|i| i.duration_ms),
        sample_rate: info.map(|i| i.sample_rate),
    }))
}

pub async fn download(
    State(state): State<AppState>,
    Path(audio_id): Path<String>,
) -> Result<Response, ApiError> {
    let fingerprint = validate_audio_id(&audio_id)?;
    let bytes = state
        .service
        .cached_audio(&fingerprint)
        .await?
        .ok_or_else(|| ApiError::NotFound("Audio not found".to_string()))?;

    Ok((audio_headers(&fingerprint)?, bytes).into_response())
}

pub async fn cache_status(State(state): State<AppState>) -> Json<CacheStatus> {
    Json(state.service.cache().status())
}

pub async fn cache_clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let report = state.service.cache().clear();
    Json(ClearResponse {
        removed_count: report.removed,
        failed_count: report.failed,
        message: format!("Cache cleared successfully. {} files removed.", report.removed),
    })
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let cache = state.service.cache();
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: state.started_at.elapsed().as_secs(),
        },
        endpoints: EndpointMetricsResponse {
            synthesize: state.metrics.synthesize.stats(),
            stream: state.metrics.stream.stats(),
        },
        speech: state.metrics.speech.snapshot(cache.len(), cache.capacity()),
    })
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("Endpoint not found".to_string())
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn speak(
    state: &AppState,
    payload: Result<Json<SpeechBody>, JsonRejection>,
) -> Result<(ValidatedRequest, SpeechAudio), ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let validated = validate_synthesis_request(
        body.text.as_deref(),
        body.voice_id,
        body.rate,
        body.volume,
        &state.config,
    )?;
    let audio = state.service.speak(&validated.request).await?;
    Ok((validated, audio))
}

async fn timed<T>(
    metrics: &EndpointMetrics,
    fut: impl std::future::Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    let start = Instant::now();
    let result = fut.await;
    metrics.record_request(start.elapsed().as_millis() as u64);
    if result.is_err() {
        metrics.record_error();
    }
    result
}

fn audio_headers(fingerprint: &Fingerprint) -> Result<HeaderMap, ApiError> {
    let disposition = format!("attachment; filename=\"audio_{fingerprint}.wav\"");
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/wav"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|e| ApiError::InternalError(e.to_string()))?,
    );
    headers.insert(
        "x-audio-id",
        HeaderValue::from_str(&fingerprint.to_string()).map_err(|e| ApiError::InternalError(e.to_string()))?,
    );
    Ok(headers)
}
