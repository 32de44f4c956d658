// worker/src/transcoder.rs
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error, info, trace};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::args::EncodeInvocation;
use crate::engine::{EncodingEngine, ProgressListener};
use crate::error::EngineError;

pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// Encoding engine backed by an ffmpeg child process.
///
/// Progress comes from `-progress pipe:1` on stdout; stderr is drained
/// concurrently and becomes the failure message when ffmpeg exits non-zero.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: String,
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_PATH)
    }
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// Runs `ffmpeg -version` to confirm the binary is usable.
    pub async fn check_available(&self) -> Result<(), EngineError> {
        let status = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::failed(
                format!("{} -version exited with {}", self.ffmpeg_path, status),
                status.code(),
            ))
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == ErrorKind::NotFound {
            EngineError::NotFound(self.ffmpeg_path.clone())
        } else {
            EngineError::Io(e)
        }
    }
}

#[async_trait]
impl EncodingEngine for FfmpegEngine {
    async fn encode(
        &mut self,
        invocation: &EncodeInvocation,
        progress: Option<ProgressListener<'_>>,
    ) -> Result<(), EngineError> {
        if !invocation.input.exists() {
            error!("Input file not found: {:?}", invocation.input);
            return Err(EngineError::FileNotFound(invocation.input.clone()));
        }

        if let Some(parent_dir) = invocation.output.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                tokio::fs::create_dir_all(parent_dir).await?;
                info!("Created output directory: {:?}", parent_dir);
            }
        }

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-nostats", "-v", "error", "-progress", "pipe:1"]);
        cmd.args(invocation.to_ffmpeg_args());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!("Executing FFMPEG command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::failed("ffmpeg stdout was not captured", None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::failed("ffmpeg stderr was not captured", None))?;

        let total_us = invocation
            .duration_hint_sec
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d * 1_000_000.0);

        let read_progress = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let (Some(listener), Some(total)) = (progress, total_us) {
                    if let Some(fraction) = parse_progress_line(&line, total) {
                        listener(fraction);
                    }
                }
            }
            Ok::<(), std::io::Error>(())
        };

        let read_stderr = async {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Some(line) = lines.next_line().await? {
                debug!("[ffmpeg] {}", line);
                collected.push(line);
            }
            Ok::<Vec<String>, std::io::Error>(collected)
        };

        let (progress_res, stderr_res, status) = tokio::join!(read_progress, read_stderr, child.wait());
        let status = status?;
        progress_res?;
        let stderr_lines = stderr_res?;

        if status.success() {
            if let Some(listener) = progress {
                listener(1.0);
            }
            info!("Transcoding successful: {:?} -> {:?}", invocation.input, invocation.output);
            Ok(())
        } else {
            let message = if stderr_lines.is_empty() {
                format!("ffmpeg command failed with status: {}", status)
            } else {
                stderr_lines.join("\n")
            };
            error!("ffmpeg failed ({}): {}", status, message);
            Err(EngineError::failed(message, status.code()))
        }
    }

    async fn output_size(&self, output: &Path) -> Result<u64, EngineError> {
        match tokio::fs::metadata(output).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(EngineError::FileNotFound(output.to_path_buf())),
            Err(e) => Err(EngineError::Io(e)),
        }
    }
}

/// Completion fraction from one `-progress` line, if the line carries one.
///
/// ffmpeg reports both `out_time_us` and `out_time_ms` in microseconds.
pub fn parse_progress_line(line: &str, total_us: f64) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => {
            let us = value.trim().parse::<f64>().ok()?;
            if total_us <= 0.0 || !us.is_finite() {
                return None;
            }
            Some((us / total_us).clamp(0.0, 1.0))
        }
        "progress" if value.trim() == "end" => Some(1.0),
        _ => None,
    }
}
