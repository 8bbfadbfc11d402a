//! Speech synthesis adapters.
//!
//! A [`Synthesizer`] turns text into an audio file. Engines are black boxes:
//! they may be slow, and they may fail in the ways listed in
//! [`SynthesisError`]. Callers bound the call with their own timeout.

mod espeak;
#[cfg(feature = "piper")]
mod piper;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use espeak::EspeakSynthesizer;
#[cfg(feature = "piper")]
pub use piper::PiperSynthesizer;

/// Effective parameters of one synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    /// Index into [`Synthesizer::voices`]; engines fall back to their default
    /// voice when it is out of range.
    pub voice_id: u32,
    /// Words per minute.
    pub rate: f64,
    /// 0.0 ..= 1.0
    pub volume: f64,
}

impl SynthesisRequest {
    pub fn check(&self) -> Result<(), SynthesisError> {
        if self.text.trim().is_empty() {
            return Err(SynthesisError::InvalidParameters("text is empty".to_string()));
        }
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(SynthesisError::InvalidParameters(format!("rate {}", self.rate)));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(SynthesisError::InvalidParameters(format!("volume {}", self.volume)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: u32,
    pub name: String,
    pub language: String,
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("TTS engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("TTS engine produced no audio")]
    EmptyOutput,

    #[error("synthesis timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("invalid synthesis parameters: {0}")]
    InvalidParameters(String),
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Short engine name for logs and health output.
    fn name(&self) -> &'static str;

    async fn voices(&self) -> Result<Vec<Voice>, SynthesisError>;

    /// Synthesize `request` into a WAV file at `output`.
    ///
    /// On error the engine may leave a partial file behind; the caller owns
    /// `output` and cleans it up.
    async fn synthesize(&self, request: &SynthesisRequest, output: &Path) -> Result<(), SynthesisError>;
}

/// Make sure the engine actually wrote something. Returns the file size.
pub async fn verify_output(output: &Path) -> Result<u64, SynthesisError> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        _ => Err(SynthesisError::EmptyOutput),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str, rate: f64, volume: f64) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            voice_id: 0,
            rate,
            volume,
        }
    }

    #[test]
    fn test_check_accepts_sane_request() {
        assert!(request("hello", 200.0, 0.9).check().is_ok());
    }

    #[test]
    fn test_check_rejects_bad_parameters() {
        assert!(matches!(
            request("   ", 200.0, 0.9).check(),
            Err(SynthesisError::InvalidParameters(_))
        ));
        assert!(request("hi", f64::NAN, 0.9).check().is_err());
        assert!(request("hi", 0.0, 0.9).check().is_err());
        assert!(request("hi", 200.0, f64::INFINITY).check().is_err());
        assert!(request("hi", 200.0, -0.1).check().is_err());
    }

    #[tokio::test]
    async fn test_verify_output() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.wav");
        let full = dir.path().join("full.wav");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"RIFF....").unwrap();

        assert!(matches!(verify_output(&empty).await, Err(SynthesisError::EmptyOutput)));
        assert!(matches!(
            verify_output(&dir.path().join("missing.wav")).await,
            Err(SynthesisError::EmptyOutput)
        ));
        assert_eq!(verify_output(&full).await.unwrap(), 8);
    }

    #[test]
    fn test_timeout_message() {
        let err = SynthesisError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "synthesis timed out after 30s");
    }
}
