//! Video bitrate budgeting.
//!
//! Audio is copied through untouched, so its size can only be estimated and
//! subtracted from the byte budget; whatever remains is spent on video.

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Assumed audio rate when the real one is unknown.
pub const DEFAULT_AUDIO_KBPS: f64 = 128.0;

pub const MIN_BITRATE_KBPS: f64 = 100.0;
pub const MAX_BITRATE_KBPS: f64 = 50_000.0;

/// Average rate assumed when a duration has to be guessed from file size (~5 Mbps).
const FALLBACK_BYTES_PER_SEC: f64 = 625.0 * 1024.0;
const MIN_FALLBACK_DURATION_SEC: f64 = 10.0;

/// Bytes a 128 kbps audio track occupies over `duration_sec`.
pub fn estimate_audio_bytes(duration_sec: f64) -> f64 {
    DEFAULT_AUDIO_KBPS * 1000.0 * duration_sec / 8.0
}

/// Video bitrate in kbps that fills `target_size_mb` minus the audio estimate.
///
/// Always within [`MIN_BITRATE_KBPS`, `MAX_BITRATE_KBPS`]. When audio alone eats the
/// whole budget the floor is returned and the caller is expected to warn.
pub fn calculate_target_bitrate(target_size_mb: f64, duration_sec: f64, estimated_audio_bytes: f64) -> f64 {
    let target_bytes = target_size_mb * BYTES_PER_MB;
    let video_budget_bytes = target_bytes - estimated_audio_bytes;

    if video_budget_bytes <= 0.0 {
        return MIN_BITRATE_KBPS;
    }

    let bitrate = (video_budget_bytes * 8.0) / (duration_sec * 1000.0);
    clamp_bitrate(bitrate)
}

pub fn clamp_bitrate(kbps: f64) -> f64 {
    if kbps.is_nan() {
        return MIN_BITRATE_KBPS;
    }
    kbps.clamp(MIN_BITRATE_KBPS, MAX_BITRATE_KBPS)
}

/// Rough duration for a source whose container metadata could not be read.
pub fn estimate_duration_from_size(file_size: u64) -> f64 {
    (file_size as f64 / FALLBACK_BYTES_PER_SEC).max(MIN_FALLBACK_DURATION_SEC)
}
