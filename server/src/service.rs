//! Request orchestration: cache lookup, synthesis on a miss, cache insert.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use tts_core::synth::verify_output;
use tts_core::{AudioCache, Fingerprint, StorageError, SynthesisError, SynthesisRequest, Synthesizer};

use crate::error::ApiError;
use crate::metrics::SpeechMetrics;

/// Audio produced for one request.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub fingerprint: Fingerprint,
    pub bytes: Vec<u8>,
    /// Served from the cache without calling the engine.
    pub cached: bool,
}

pub struct SpeechService {
    cache: Arc<AudioCache>,
    synth: Arc<dyn Synthesizer>,
    synthesis_timeout: Duration,
    metrics: SpeechMetrics,
}

impl SpeechService {
    pub fn new(
        cache: Arc<AudioCache>,
        synth: Arc<dyn Synthesizer>,
        synthesis_timeout: Duration,
        metrics: SpeechMetrics,
    ) -> Self {
        Self {
            cache,
            synth,
            synthesis_timeout,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }

    pub fn synthesizer(&self) -> &Arc<dyn Synthesizer> {
        &self.synth
    }

    /// Audio for `request`, from the cache when possible.
    pub async fn speak(&self, request: &SynthesisRequest) -> Result<SpeechAudio, ApiError> {
        let fingerprint = Fingerprint::of(request);

        if let Some(bytes) = self.cached_audio(&fingerprint).await? {
            debug!("Cache hit for {fingerprint}");
            self.metrics.record_hit(bytes.len());
            return Ok(SpeechAudio {
                fingerprint,
                bytes,
                cached: true,
            });
        }

        info!(
            "Cache miss for {fingerprint}, synthesizing {} chars with {}",
            request.text.chars().count(),
            self.synth.name()
        );
        let start = Instant::now();
        match self.synthesize(fingerprint, request).await {
            Ok((bytes, evicted)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                info!("Synthesized {fingerprint} in {elapsed}ms ({} bytes)", bytes.len());
                self.metrics.record_synthesis(elapsed, bytes.len(), evicted);
                Ok(SpeechAudio {
                    fingerprint,
                    bytes,
                    cached: false,
                })
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }

    /// Bytes of the cached artifact for `fingerprint`, if there is one.
    ///
    /// An artifact that disappears between lookup and read is treated as a
    /// miss and its entry dropped.
    pub async fn cached_audio(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>, ApiError> {
        let Some(path) = self.cache.lookup(fingerprint) else {
            return Ok(None);
        };

        match self.cache.store().read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::Missing(_)) => {
                if self.cache.invalidate(fingerprint, &path) {
                    warn!("Artifact for {fingerprint} vanished before it could be read");
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn synthesize(
        &self,
        fingerprint: Fingerprint,
        request: &SynthesisRequest,
    ) -> Result<(Vec<u8>, usize), ApiError> {
        // Removed on any early return below.
        let pending = self.cache.store().reserve(&fingerprint);

        let outcome = tokio::time::timeout(
            self.synthesis_timeout,
            self.synth.synthesize(request, pending.path()),
        )
        .await
        .unwrap_or(Err(SynthesisError::Timeout(self.synthesis_timeout)));
        if let Err(e) = outcome {
            error!("Synthesis of {fingerprint} failed: {e}");
            return Err(e.into());
        }

        verify_output(pending.path()).await?;
        let bytes = self.cache.store().read(pending.path()).await?;

        let evicted = self.cache.insert(fingerprint, pending.commit());
        Ok((bytes, evicted.len()))
    }
}
