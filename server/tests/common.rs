//! Common utilities for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, Response},
    Router,
};
use tempfile::TempDir;
use tower::ServiceExt;
use tts_core::{wav, ArtifactStore, AudioCache, SynthesisError, SynthesisRequest, Synthesizer, Voice};
use tts_server::{build_router, AppState, ServerConfig};

pub const TEST_API_KEY: &str = "test-api-key";
pub const SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FakeMode {
    Ok,
    Unavailable,
    Slow(Duration),
    Silent,
}

/// Deterministic engine: writes a short tone whose length follows the text.
pub struct FakeSynth {
    pub calls: AtomicUsize,
    mode: FakeMode,
}

impl FakeSynth {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            mode,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn voices(&self) -> Result<Vec<Voice>, SynthesisError> {
        Ok(vec![
            Voice {
                id: 0,
                name: "Fake English".to_string(),
                language: "en".to_string(),
            },
            Voice {
                id: 1,
                name: "Fake Portuguese".to_string(),
                language: "pt-br".to_string(),
            },
        ])
    }

    async fn synthesize(&self, request: &SynthesisRequest, output: &Path) -> Result<(), SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        request.check()?;

        match self.mode {
            FakeMode::Unavailable => {
                tokio::fs::write(output, b"RIFF").await.ok();
                return Err(SynthesisError::EngineUnavailable("fake engine is down".to_string()));
            }
            FakeMode::Slow(delay) => tokio::time::sleep(delay).await,
            FakeMode::Silent => return Ok(()),
            FakeMode::Ok => {}
        }

        let len = 160 * request.text.chars().count();
        let samples: Vec<f32> = (0..len)
            .map(|i| (i as f32 * 0.05).sin() * request.volume as f32)
            .collect();
        wav::write_wav_file(output, &samples, SAMPLE_RATE)
            .map_err(|e| SynthesisError::EngineUnavailable(e.to_string()))
    }
}

pub struct TestApp {
    pub router: Router,
    pub synth: Arc<FakeSynth>,
    pub cache: Arc<AudioCache>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(with_peer(request)).await.unwrap()
    }

    pub fn artifact_count(&self) -> usize {
        std::fs::read_dir(self.dir.path()).unwrap().count()
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        api_key: TEST_API_KEY.to_string(),
        cache_capacity: 4,
        max_text_length: 100,
        max_input_length: 1000,
        rate_limit_per_minute: 1000,
        synthesis_timeout_secs: 5,
        ..ServerConfig::default()
    }
}

/// Create a test app instance
pub fn create_test_app() -> TestApp {
    create_test_app_with(test_config(), FakeMode::Ok)
}

pub fn create_test_app_with(config: ServerConfig, mode: FakeMode) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
    let cache = Arc::new(AudioCache::new(config.cache_capacity, store));
    let synth = Arc::new(FakeSynth::new(mode));

    let state = AppState::new(config, cache.clone(), synth.clone());
    let router = build_router(state).unwrap();

    TestApp {
        router,
        synth,
        cache,
        dir,
    }
}

/// Attach a peer address the way `into_make_service_with_connect_info` does,
/// unless the test already set one.
pub fn with_peer(mut request: Request<Body>) -> Request<Body> {
    if request.extensions().get::<ConnectInfo<SocketAddr>>().is_none() {
        let peer = SocketAddr::from(([127, 0, 0, 1], 40_000));
        request.extensions_mut().insert(ConnectInfo(peer));
    }
    request
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", TEST_API_KEY)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", TEST_API_KEY)
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
