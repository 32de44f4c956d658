use std::path::Path;
use std::process::Stdio;

use log::{debug, warn};
use tokio::process::Command;

use crate::bitrate::estimate_duration_from_size;

pub const DEFAULT_FFPROBE_PATH: &str = "ffprobe";

/// Container duration in seconds, or `None` when ffprobe cannot tell.
pub async fn probe_duration(ffprobe_path: &str, input: &Path) -> Option<f64> {
    let output = Command::new(ffprobe_path)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(input.as_os_str())
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let parsed = parse_duration_output(&String::from_utf8_lossy(&out.stdout));
            debug!("ffprobe duration for {:?}: {:?}", input, parsed);
            parsed
        }
        Ok(out) => {
            warn!(
                "ffprobe exited with {} for {:?}: {}",
                out.status,
                input,
                String::from_utf8_lossy(&out.stderr).trim()
            );
            None
        }
        Err(e) => {
            warn!("Failed to execute ffprobe ({}): {}", ffprobe_path, e);
            None
        }
    }
}

pub fn parse_duration_output(stdout: &str) -> Option<f64> {
    let value: f64 = stdout.lines().next()?.trim().parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Picks a strictly positive duration: explicit value, then probed, then a size-based guess.
pub fn resolve_duration(explicit: Option<f64>, probed: Option<f64>, file_size: u64) -> f64 {
    explicit
        .filter(|d| d.is_finite() && *d > 0.0)
        .or(probed)
        .unwrap_or_else(|| estimate_duration_from_size(file_size))
}
