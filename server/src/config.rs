// Server configuration, read from the environment

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tts_core::FINGERPRINT_TEXT_LIMIT;

/// Which synthesis engine backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Espeak,
    Piper,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "espeak" | "espeak-ng" => Ok(EngineKind::Espeak),
            "piper" => Ok(EngineKind::Piper),
            other => Err(format!("unknown TTS engine '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub api_key: String,
    pub cache_capacity: usize,
    pub max_text_length: usize,
    pub max_input_length: usize,
    pub default_voice_id: u32,
    pub default_rate: f64,
    pub default_volume: f64,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub cache_dir: PathBuf,
    pub engine: EngineKind,
    pub espeak_bin: PathBuf,
    pub piper_model_map: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 10000,
            api_key: String::new(),
            cache_capacity: 50,
            max_text_length: 8000,
            max_input_length: 50_000,
            default_voice_id: 0,
            default_rate: 200.0,
            default_volume: 0.9,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            synthesis_timeout_secs: 30,
            cors_allowed_origins: None,
            cache_dir: std::env::temp_dir().join("tts-artifacts"),
            engine: EngineKind::Espeak,
            espeak_bin: PathBuf::from("espeak-ng"),
            piper_model_map: PathBuf::from("models/map.json"),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        Self {
            port: env_parse("PORT", defaults.port),
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            cache_capacity: env_parse("MAX_CACHE_SIZE", defaults.cache_capacity),
            max_text_length: env_parse("MAX_TEXT_LENGTH", defaults.max_text_length),
            max_input_length: env_parse("MAX_INPUT_LENGTH", defaults.max_input_length),
            default_voice_id: env_parse("DEFAULT_VOICE_ID", defaults.default_voice_id),
            default_rate: env_parse("DEFAULT_RATE", defaults.default_rate),
            default_volume: env_parse("DEFAULT_VOLUME", defaults.default_volume),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            synthesis_timeout_secs: env_parse("SYNTHESIS_TIMEOUT_SECS", defaults.synthesis_timeout_secs),
            cors_allowed_origins,
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            engine: env_parse("TTS_ENGINE", defaults.engine),
            espeak_bin: std::env::var("ESPEAK_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.espeak_bin),
            piper_model_map: std::env::var("PIPER_MODEL_MAP")
                .map(PathBuf::from)
                .unwrap_or(defaults.piper_model_map),
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("API_KEY must be set");
        }
        if self.cache_capacity == 0 {
            anyhow::bail!("MAX_CACHE_SIZE must be at least 1");
        }
        if self.max_text_length == 0 || self.max_text_length > FINGERPRINT_TEXT_LIMIT {
            anyhow::bail!("MAX_TEXT_LENGTH must be between 1 and {FINGERPRINT_TEXT_LIMIT}");
        }
        if self.max_input_length < self.max_text_length {
            anyhow::bail!("MAX_INPUT_LENGTH must not be below MAX_TEXT_LENGTH");
        }
        if self.rate_limit_per_minute == 0 {
            anyhow::bail!("RATE_LIMIT_PER_MINUTE must be at least 1");
        }
        if self.synthesis_timeout_secs == 0 {
            anyhow::bail!("SYNTHESIS_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}
