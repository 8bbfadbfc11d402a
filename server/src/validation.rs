use tracing::warn;
use tts_core::text::prepare_text;
use tts_core::{Fingerprint, SynthesisRequest};

use crate::config::ServerConfig;
use crate::error::ApiError;

/// Speaking rate bounds, words per minute. espeak-ng does not go below 80,
/// so slower rates would share audio under distinct fingerprints.
const MIN_RATE: f64 = 80.0;
const MAX_RATE: f64 = 400.0;
/// Volume bounds
const MIN_VOLUME: f64 = 0.1;
const MAX_VOLUME: f64 = 1.0;

/// A synthesis request after validation, normalization and clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub request: SynthesisRequest,
    /// Text was cut at `max_text_length`
    pub truncated: bool,
}

/// Validate a synthesis request and fill in defaults
pub fn validate_synthesis_request(
    text: Option<&str>,
    voice_id: Option<u32>,
    rate: Option<f64>,
    volume: Option<f64>,
    config: &ServerConfig,
) -> Result<ValidatedRequest, ApiError> {
    let raw = text.ok_or_else(|| ApiError::InvalidInput("Text is required".to_string()))?;

    if raw.chars().count() > config.max_input_length {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            config.max_input_length
        )));
    }

    let prepared = prepare_text(raw, config.max_text_length);
    if prepared.text.is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if prepared.truncated {
        warn!("Text truncated to {} characters", config.max_text_length);
    }

    let rate = rate.unwrap_or(config.default_rate);
    if !rate.is_finite() {
        return Err(ApiError::InvalidInput("rate must be a finite number".to_string()));
    }
    let volume = volume.unwrap_or(config.default_volume);
    if !volume.is_finite() {
        return Err(ApiError::InvalidInput("volume must be a finite number".to_string()));
    }

    Ok(ValidatedRequest {
        request: SynthesisRequest {
            text: prepared.text,
            voice_id: voice_id.unwrap_or(config.default_voice_id),
            rate: rate.clamp(MIN_RATE, MAX_RATE),
            volume: volume.clamp(MIN_VOLUME, MAX_VOLUME),
        },
        truncated: prepared.truncated,
    })
}

/// Validate an audio id from a download URL
pub fn validate_audio_id(audio_id: &str) -> Result<Fingerprint, ApiError> {
    audio_id
        .parse()
        .map_err(|e: tts_core::ParseFingerprintError| ApiError::InvalidInput(e.to_string()))
}
