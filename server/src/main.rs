use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::{info, warn};
use tts_core::{ArtifactStore, AudioCache, EspeakSynthesizer, Synthesizer};

use tts_server::auth::key_prefix;
use tts_server::{build_router, AppState, EngineKind, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech synthesis server...");

    let config = ServerConfig::from_env();
    config.validate()?;

    let synth = create_synthesizer(&config)?;
    let store = Arc::new(ArtifactStore::open(&config.cache_dir)?);
    let cache = Arc::new(AudioCache::new(config.cache_capacity, store));

    info!("Engine: {}", synth.name());
    info!("API key configured: {}", key_prefix(&config.api_key));
    info!(
        "Cache: {} entries max in {}",
        config.cache_capacity,
        config.cache_dir.display()
    );
    info!(
        "Text limits: {} chars synthesized, {} chars accepted",
        config.max_text_length, config.max_input_length
    );
    info!(
        "Timeouts: request={}s, synthesis={}s",
        config.request_timeout_secs, config.synthesis_timeout_secs
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let state = AppState::new(config, cache.clone(), synth);
    let app = build_router(state)?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = cache.clear();
    info!("Shutdown complete, {} cached artifact(s) removed", report.removed);
    Ok(())
}

fn create_synthesizer(config: &ServerConfig) -> anyhow::Result<Arc<dyn Synthesizer>> {
    match config.engine {
        EngineKind::Espeak => Ok(Arc::new(EspeakSynthesizer::new(&config.espeak_bin))),
        #[cfg(feature = "piper")]
        EngineKind::Piper => {
            let synth = tts_core::PiperSynthesizer::from_map_file(&config.piper_model_map)?;
            Ok(Arc::new(synth))
        }
        #[cfg(not(feature = "piper"))]
        EngineKind::Piper => anyhow::bail!(
            "TTS_ENGINE=piper requires building with the `piper` feature"
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
