//! On-device speech-to-text through an external engine binary
//!
//! The engine takes a WAV path as its only argument and prints timing
//! information, a `---` separator line, then the transcript.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;

use super::Transcriber;
use crate::error::ServiceFailure;
use crate::{Error, Result};

/// Engine looked up on `PATH` when no binary is configured
const DEFAULT_BINARY: &str = "FluidSTT";

/// Longest stderr excerpt kept in an error
const STDERR_LIMIT: usize = 256;

/// Runs the local engine once per utterance
#[derive(Debug)]
pub struct LocalTranscriber {
    binary: PathBuf,
}

impl LocalTranscriber {
    /// Find the engine binary, or `None` if it isn't installed
    #[must_use]
    pub fn locate(configured: Option<&Path>) -> Option<Self> {
        let binary = match configured {
            Some(path) => path.is_file().then(|| path.to_path_buf())?,
            None => which::which(DEFAULT_BINARY).ok()?,
        };
        tracing::debug!(binary = %binary.display(), "local stt engine found");
        Some(Self { binary })
    }

    async fn run(&self, wav: &[u8]) -> std::result::Result<String, ServiceFailure> {
        let io = |e: std::io::Error| ServiceFailure::Process(e.to_string());

        // The engine only reads from a path
        let file = tempfile::Builder::new()
            .prefix("beacon-voice-")
            .suffix(".wav")
            .tempfile()
            .map_err(io)?
            .into_temp_path();
        tokio::fs::write(&file, wav).await.map_err(io)?;

        let started = Instant::now();
        let output = tokio::process::Command::new(&self.binary)
            .arg(&*file)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ServiceFailure::Process(format!("{}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_LIMIT).collect();
            return Err(ServiceFailure::Process(format!("{}: {excerpt}", output.status)));
        }

        tracing::debug!(elapsed = ?started.elapsed(), "local stt finished");
        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl Transcriber for LocalTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting local transcription");
        let transcript = self.run(&wav).await.map_err(Error::Transcription)?;
        if transcript.is_empty() {
            return Err(Error::Transcription(ServiceFailure::EmptyResult));
        }

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Transcript lines follow `---`; without one the last line is the transcript
fn parse_output(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
    match lines.iter().position(|line| *line == "---") {
        Some(separator) => lines[separator + 1..]
            .iter()
            .filter(|line| !line.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" "),
        None => lines
            .iter()
            .rev()
            .find(|line| !line.is_empty())
            .map(|line| (*line).to_string())
            .unwrap_or_default(),
    }
}
