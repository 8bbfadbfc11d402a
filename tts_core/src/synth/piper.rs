//! In-process Piper voices (feature `piper`).
//!
//! Voices come from a JSON map of `language key -> config path` (or
//! `{ "config": ..., "default_speaker": ... }`). Voice ids are the positions
//! of the keys in sorted order.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info};

use super::{verify_output, SynthesisError, SynthesisRequest, Synthesizer, Voice};
use crate::wav;

/// Rate at which Piper voices speak unmodified, in words per minute.
const NATURAL_RATE_WPM: f64 = 200.0;

// Cached synthesizer and sample rate
#[derive(Clone)]
struct LoadedVoice {
    synth: Arc<Mutex<PiperSpeechSynthesizer>>,
    sample_rate: u32,
}

type VoiceCache = Arc<Mutex<HashMap<PathBuf, LoadedVoice>>>;

pub struct PiperSynthesizer {
    voices: Vec<(Voice, PathBuf)>,
    loaded: VoiceCache,
}

impl PiperSynthesizer {
    /// Load the voice map (e.g. `models/map.json`).
    pub fn from_map_file<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "voice map is not valid JSON")?;
        let obj = json
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("voice map must be a JSON object"))?;

        let mut keys: Vec<&String> = obj.keys().collect();
        keys.sort();

        let mut voices = Vec::with_capacity(keys.len());
        for (i, lang) in keys.into_iter().enumerate() {
            let config = match &obj[lang] {
                serde_json::Value::String(path) => path.clone(),
                serde_json::Value::Object(o) => o
                    .get("config")
                    .and_then(|x| x.as_str())
                    .ok_or_else(|| anyhow::anyhow!("missing 'config' for key {}", lang))?
                    .to_string(),
                _ => {
                    return Err(anyhow::anyhow!(
                        "invalid entry for key {} (expected string or object)",
                        lang
                    ))
                }
            };
            voices.push((
                Voice {
                    id: i as u32,
                    name: lang.clone(),
                    language: lang.clone(),
                },
                PathBuf::from(config),
            ));
        }

        info!("Loaded {} Piper voice(s)", voices.len());
        Ok(Self {
            voices,
            loaded: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn config_for(&self, voice_id: u32) -> Result<PathBuf, SynthesisError> {
        self.voices
            .iter()
            .find(|(v, _)| v.id == voice_id)
            .or_else(|| self.voices.first())
            .map(|(_, cfg)| cfg.clone())
            .ok_or_else(|| SynthesisError::EngineUnavailable("no Piper voices configured".into()))
    }
}

/// Read sample rate from model config JSON
fn read_sample_rate(cfg_path: &Path) -> anyhow::Result<u32> {
    let text = fs::read_to_string(cfg_path)
        .with_context(|| format!("Failed to read config file: {}", cfg_path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

    let sample_rate = json
        .get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

    Ok(sample_rate as u32)
}

/// Get or create a cached synthesizer for a config path
fn load_voice(cache: &VoiceCache, cfg_path: &Path) -> anyhow::Result<LoadedVoice> {
    {
        let loaded = cache
            .lock()
            .map_err(|_| anyhow::anyhow!("Piper voice cache lock poisoned"))?;
        if let Some(voice) = loaded.get(cfg_path) {
            return Ok(voice.clone());
        }
    }

    let sample_rate = read_sample_rate(cfg_path)?;
    let model = piper_rs::from_config_path(cfg_path)
        .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
    let synth = PiperSpeechSynthesizer::new(model)?;
    debug!("Loaded Piper model {}", cfg_path.display());

    let voice = LoadedVoice {
        synth: Arc::new(Mutex::new(synth)),
        sample_rate,
    };
    cache
        .lock()
        .map_err(|_| anyhow::anyhow!("Piper voice cache lock poisoned"))?
        .insert(cfg_path.to_path_buf(), voice.clone());
    Ok(voice)
}

fn synthesize_blocking(
    cache: &VoiceCache,
    cfg_path: &Path,
    request: &SynthesisRequest,
    output: &Path,
) -> anyhow::Result<()> {
    let voice = load_voice(cache, cfg_path)?;
    let synth = voice
        .synth
        .lock()
        .map_err(|_| anyhow::anyhow!("Synthesizer lock poisoned"))?;

    let iter: PiperSpeechStreamParallel = synth
        .synthesize_parallel(request.text.clone(), None)
        .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

    let mut samples: Vec<f32> = Vec::new();
    for part in iter {
        samples.extend(part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?.into_vec());
    }
    drop(synth);

    wav::apply_gain(&mut samples, request.volume as f32);
    let samples = wav::time_scale(&samples, (request.rate / NATURAL_RATE_WPM) as f32);
    wav::write_wav_file(output, &samples, voice.sample_rate)
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    fn name(&self) -> &'static str {
        "piper"
    }

    async fn voices(&self) -> Result<Vec<Voice>, SynthesisError> {
        Ok(self.voices.iter().map(|(v, _)| v.clone()).collect())
    }

    async fn synthesize(&self, request: &SynthesisRequest, output: &Path) -> Result<(), SynthesisError> {
        request.check()?;
        let cfg_path = self.config_for(request.voice_id)?;

        let cache = Arc::clone(&self.loaded);
        let request_owned = request.clone();
        let output_owned = output.to_path_buf();
        tokio::task::spawn_blocking(move || {
            synthesize_blocking(&cache, &cfg_path, &request_owned, &output_owned)
        })
        .await
        .map_err(|e| SynthesisError::EngineUnavailable(format!("Task join error: {e}")))?
        .map_err(|e| SynthesisError::EngineUnavailable(format!("{e:#}")))?;

        verify_output(output).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_file_voices_sorted_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("map.json");
        fs::write(
            &map,
            r#"{
                "en_US": "models/en_US/en_US-lessac-medium.onnx.json",
                "de_DE": { "config": "models/de_DE/de_DE-mls-medium.onnx.json", "default_speaker": 3 }
            }"#,
        )
        .unwrap();

        let synth = PiperSynthesizer::from_map_file(&map).unwrap();
        assert_eq!(synth.voices[0].0.language, "de_DE");
        assert_eq!(synth.voices[1].0.id, 1);
        assert_eq!(
            synth.config_for(1).unwrap(),
            PathBuf::from("models/en_US/en_US-lessac-medium.onnx.json")
        );
        // unknown ids fall back to the first voice
        assert_eq!(synth.config_for(99).unwrap(), synth.voices[0].1);
    }

    #[test]
    fn test_map_file_rejects_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("map.json");
        fs::write(&map, r#"{ "en_US": 42 }"#).unwrap();
        assert!(PiperSynthesizer::from_map_file(&map).is_err());
    }
}
