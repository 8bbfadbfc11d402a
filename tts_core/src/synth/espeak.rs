//! espeak-ng driven through its command line.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{verify_output, SynthesisError, SynthesisRequest, Synthesizer, Voice};

pub struct EspeakSynthesizer {
    bin: PathBuf,
    voices: OnceCell<Vec<Voice>>,
}

impl EspeakSynthesizer {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            voices: OnceCell::new(),
        }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    async fn load_voices(&self) -> Result<Vec<Voice>, SynthesisError> {
        let output = Command::new(&self.bin)
            .arg("--voices")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(SynthesisError::EngineUnavailable(format!(
                "{} --voices failed: {}",
                self.bin.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
        debug!("espeak-ng reports {} voices", voices.len());
        Ok(voices)
    }

    /// espeak voice selector for `voice_id`, `None` for the engine default.
    async fn selector_for(&self, voice_id: u32) -> Option<String> {
        match self.voices().await {
            Ok(voices) => voices
                .into_iter()
                .find(|v| v.id == voice_id)
                .map(|v| v.language),
            Err(e) => {
                warn!("Could not list espeak voices, using default voice: {e}");
                None
            }
        }
    }

    fn spawn_error(&self, e: io::Error) -> SynthesisError {
        if e.kind() == io::ErrorKind::NotFound {
            SynthesisError::EngineUnavailable(format!("{} not found", self.bin.display()))
        } else {
            SynthesisError::EngineUnavailable(format!("failed to run {}: {e}", self.bin.display()))
        }
    }
}

#[async_trait]
impl Synthesizer for EspeakSynthesizer {
    fn name(&self) -> &'static str {
        "espeak-ng"
    }

    async fn voices(&self) -> Result<Vec<Voice>, SynthesisError> {
        self.voices
            .get_or_try_init(|| self.load_voices())
            .await
            .cloned()
    }

    async fn synthesize(&self, request: &SynthesisRequest, output: &Path) -> Result<(), SynthesisError> {
        request.check()?;

        let wpm = request.rate.round().clamp(80.0, 450.0) as i32;
        let amplitude = (request.volume * 100.0).round().clamp(0.0, 200.0) as i32;

        let mut cmd = Command::new(&self.bin);
        if let Some(voice) = self.selector_for(request.voice_id).await {
            cmd.arg("-v").arg(voice);
        }
        cmd.arg("-s").arg(wpm.to_string());
        cmd.arg("-a").arg(amplitude.to_string());
        cmd.arg("-w").arg(output);
        cmd.arg("--stdin");
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        // a timed-out request drops this future; take the engine down with it
        cmd.kill_on_drop(true);

        debug!(command = ?cmd, "Running espeak-ng");
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.text.as_bytes())
                .await
                .map_err(|e| SynthesisError::EngineUnavailable(format!("espeak-ng stdin: {e}")))?;
        }

        let result = child
            .wait_with_output()
            .await
            .map_err(|e| SynthesisError::EngineUnavailable(format!("espeak-ng: {e}")))?;
        if !result.status.success() {
            return Err(SynthesisError::EngineUnavailable(format!(
                "espeak-ng exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        verify_output(output).await?;
        Ok(())
    }
}

/// Parse `espeak-ng --voices` output. Voice ids follow listing order.
fn parse_voice_list(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            Some((cols[1].to_string(), cols[3].replace('_', " ")))
        })
        .enumerate()
        .map(|(i, (language, name))| Voice {
            id: i as u32,
            name,
            language,
        })
        .collect()
}
