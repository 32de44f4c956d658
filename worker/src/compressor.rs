//! Iterative size-targeted compression.
//!
//! A run either normalizes a source that already fits (one constant-quality
//! encode) or walks a bounded number of bitrate-targeted passes, decaying the
//! bitrate and stepping down the resolution ladder until the output fits the
//! byte budget or the preset's passes run out. Missing the budget is reported
//! as a warning on an otherwise successful result.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info, warn};

use crate::args::{build_encode_parameters, build_normalize_parameters};
use crate::bitrate::{calculate_target_bitrate, estimate_audio_bytes, BYTES_PER_MB, MIN_BITRATE_KBPS};
use crate::engine::{EncodingEngine, ProgressListener};
use crate::error::{CompressError, CompressResult, EngineError, FailureKind};
use crate::ladder::{get_scale_height, label_for_height, ASSUMED_SOURCE_HEIGHT, MAX_SCALE_STEPS};
use crate::options::Preset;

/// Overall percentage where encoding starts; everything below is setup.
pub const PROGRESS_START: f64 = 15.0;
/// Width of the encoding window, ending at 85%.
pub const PROGRESS_SPAN: f64 = 70.0;

/// Multiplicative bitrate decay between passes.
pub const BITRATE_DECAY: f64 = 0.8;
/// Below this the next pass downscales instead of starving the encoder.
pub const DOWNSCALE_THRESHOLD_KBPS: f64 = 500.0;
/// Audio estimate at this share of the budget means the target is out of reach.
pub const AUDIO_UNREACHABLE_RATIO: f64 = 0.95;

pub const AUDIO_INCOMPATIBLE_WARNING: &str =
    "The audio format in this video isn't compatible with MP4. Audio couldn't be preserved.";

/// Immutable input of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub source_size: u64,
    pub target_bytes: u64,
    pub duration_sec: f64,
    pub preset: Preset,
}

impl CompressionRequest {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        source_size: u64,
        target_bytes: u64,
        duration_sec: f64,
        preset: Preset,
    ) -> CompressResult<Self> {
        if !duration_sec.is_finite() || duration_sec <= 0.0 {
            return Err(CompressError::InvalidRequest(format!(
                "duration must be positive, got {}",
                duration_sec
            )));
        }
        if target_bytes == 0 {
            return Err(CompressError::InvalidRequest("target size must be positive".to_string()));
        }
        Ok(Self {
            input: input.into(),
            output: output.into(),
            source_size,
            target_bytes,
            duration_sec,
            preset,
        })
    }

    pub fn target_size_mb(&self) -> f64 {
        self.target_bytes as f64 / BYTES_PER_MB
    }

    pub fn fits_budget(&self) -> bool {
        self.source_size <= self.target_bytes
    }
}

/// Terminal value of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionResult {
    /// Why the target was not met, if it was not.
    pub warning: Option<String>,
    /// Size of the last artifact written, when one was measured.
    pub output_size: Option<u64>,
    /// Engine invocations performed.
    pub passes: u32,
}

/// Parameters of a single refinement pass.
///
/// The size measured after the pass is not stored here; `pass_loop` keeps it
/// in `last_size` and compares it against the budget before calling [`next`].
///
/// [`next`]: PassAttempt::next
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassAttempt {
    pub attempt: u32,
    /// Clamped to the estimator's range.
    pub bitrate_kbps: f64,
    /// Rungs descended on the ladder; never decreases within a run.
    pub scale_step: u32,
}

impl PassAttempt {
    pub fn first(initial_bitrate_kbps: f64) -> Self {
        Self {
            attempt: 1,
            bitrate_kbps: initial_bitrate_kbps,
            scale_step: 0,
        }
    }

    /// Parameters for the pass after this one overshot the budget.
    pub fn next(&self, initial_bitrate_kbps: f64) -> Self {
        let mut bitrate = self.bitrate_kbps * BITRATE_DECAY;
        let mut scale_step = self.scale_step;

        if bitrate < DOWNSCALE_THRESHOLD_KBPS && scale_step < MAX_SCALE_STEPS {
            scale_step += 1;
            bitrate = initial_bitrate_kbps;
        }

        Self {
            attempt: self.attempt + 1,
            bitrate_kbps: bitrate.max(MIN_BITRATE_KBPS),
            scale_step,
        }
    }

    pub fn scale_height(&self) -> Option<u32> {
        get_scale_height(ASSUMED_SOURCE_HEIGHT, self.scale_step)
    }
}

/// Receives `(text, percent)` updates during a run.
pub trait ProgressSink: Send + Sync {
    fn report(&self, text: &str, percent: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, f64) + Send + Sync,
{
    fn report(&self, text: &str, percent: f64) {
        self(text, percent)
    }
}

/// Never lets reported percentages go backwards within a run.
struct MonotonicProgress<'a> {
    sink: &'a dyn ProgressSink,
    last: Mutex<f64>,
}

impl<'a> MonotonicProgress<'a> {
    fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            last: Mutex::new(0.0),
        }
    }

    fn report(&self, text: &str, percent: f64) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let percent = if percent.is_nan() { *last } else { percent.max(*last) };
        *last = percent;
        self.sink.report(text, percent);
    }
}

/// Drives size-targeted runs against an exclusively owned engine.
///
/// Only one run may be in flight; a second `compress` call while the engine
/// is held fails with [`CompressError::Busy`].
pub struct Compressor<E> {
    engine: tokio::sync::Mutex<E>,
}

impl<E: EncodingEngine> Compressor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: tokio::sync::Mutex::new(engine),
        }
    }

    pub fn into_engine(self) -> E {
        self.engine.into_inner()
    }

    pub fn is_busy(&self) -> bool {
        self.engine.try_lock().is_err()
    }

    pub async fn compress(
        &self,
        request: CompressionRequest,
        sink: &dyn ProgressSink,
    ) -> CompressResult<CompressionResult> {
        let mut engine = self.engine.try_lock().map_err(|_| CompressError::Busy)?;
        let progress = MonotonicProgress::new(sink);

        if request.fits_budget() {
            direct_check(&mut *engine, &request, &progress).await
        } else {
            pass_loop(&mut *engine, &request, &progress).await
        }
    }
}

/// Maps a pass-local fraction into the overall encoding window.
fn window_percent(pass_index: u32, max_passes: u32, fraction: f64) -> f64 {
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    let overall = (pass_index as f64 + fraction) / max_passes as f64;
    PROGRESS_START + overall * PROGRESS_SPAN
}

async fn direct_check<E: EncodingEngine + ?Sized>(
    engine: &mut E,
    request: &CompressionRequest,
    progress: &MonotonicProgress<'_>,
) -> CompressResult<CompressionResult> {
    let preset = request.preset.config();
    info!(
        "Source ({}) already fits {}; normalizing at CRF {}",
        format_bytes(request.source_size),
        format_bytes(request.target_bytes),
        preset.crf_base
    );

    let label = "Encoding...";
    progress.report(label, PROGRESS_START);

    let invocation = build_normalize_parameters(&request.input, &request.output, request.preset)
        .with_duration_hint(request.duration_sec);

    let on_progress = |fraction: f64| progress.report(label, window_percent(0, 1, fraction));
    let listener: ProgressListener<'_> = &on_progress;
    if let Err(e) = engine.encode(&invocation, Some(listener)).await {
        return recover_engine_failure(e, 1);
    }

    let size = engine.output_size(&request.output).await?;
    info!("Normalized output is {}", format_bytes(size));
    Ok(CompressionResult {
        warning: None,
        output_size: Some(size),
        passes: 1,
    })
}

async fn pass_loop<E: EncodingEngine + ?Sized>(
    engine: &mut E,
    request: &CompressionRequest,
    progress: &MonotonicProgress<'_>,
) -> CompressResult<CompressionResult> {
    let max_passes = request.preset.config().max_passes;
    let target_mb = request.target_size_mb();

    let audio_bytes = estimate_audio_bytes(request.duration_sec);
    let mut warning = None;
    if audio_bytes >= request.target_bytes as f64 * AUDIO_UNREACHABLE_RATIO {
        warn!(
            "Estimated audio ({}) alone nearly fills the {} budget",
            format_bytes(audio_bytes as u64),
            format_bytes(request.target_bytes)
        );
        warning = Some(audio_budget_warning(target_mb));
    }

    let initial_bitrate = calculate_target_bitrate(target_mb, request.duration_sec, audio_bytes);
    let mut pass = PassAttempt::first(initial_bitrate);

    let last_size = loop {
        let label = format!("Pass {}/{}...", pass.attempt, max_passes);
        let index = pass.attempt - 1;
        progress.report(&label, window_percent(index, max_passes, 0.0));

        let scale_height = pass.scale_height();
        info!(
            "{} bitrate {:.0}k, scale {}",
            label,
            pass.bitrate_kbps,
            scale_height.and_then(label_for_height).unwrap_or("source")
        );

        let invocation = build_encode_parameters(
            &request.input,
            &request.output,
            request.preset,
            pass.bitrate_kbps,
            scale_height,
        )
        .with_duration_hint(request.duration_sec);

        let on_progress = |fraction: f64| progress.report(&label, window_percent(index, max_passes, fraction));
        let listener: ProgressListener<'_> = &on_progress;
        if let Err(e) = engine.encode(&invocation, Some(listener)).await {
            return recover_engine_failure(e, pass.attempt);
        }

        let size = engine.output_size(&request.output).await?;
        debug!("{} produced {}", label, format_bytes(size));

        if size <= request.target_bytes {
            info!("Reached target in {} pass(es): {}", pass.attempt, format_bytes(size));
            return Ok(CompressionResult {
                warning,
                output_size: Some(size),
                passes: pass.attempt,
            });
        }

        if pass.attempt >= max_passes {
            break size;
        }
        pass = pass.next(initial_bitrate);
    };

    warn!(
        "Passes exhausted at {} against a {} target",
        format_bytes(last_size),
        format_bytes(request.target_bytes)
    );
    let warning = warning.unwrap_or_else(|| exhaustion_warning(last_size, target_mb));
    Ok(CompressionResult {
        warning: Some(warning),
        output_size: Some(last_size),
        passes: max_passes,
    })
}

fn recover_engine_failure(e: EngineError, passes: u32) -> CompressResult<CompressionResult> {
    match e.kind() {
        FailureKind::AudioIncompatible => {
            warn!("Audio stream could not be copied into MP4: {}", e);
            Ok(CompressionResult {
                warning: Some(AUDIO_INCOMPATIBLE_WARNING.to_string()),
                output_size: None,
                passes,
            })
        }
        FailureKind::EngineFailure => {
            error!("Encoding pass {} failed: {}", passes, e);
            Err(e.into())
        }
    }
}

fn audio_budget_warning(target_mb: f64) -> String {
    format!(
        "Couldn't hit {}MB because the audio track alone is too large (audio is kept unchanged). Output is as small as possible.",
        target_mb
    )
}

fn exhaustion_warning(output_size: u64, target_mb: f64) -> String {
    format!(
        "Output is {} - couldn't reach {}MB target. This is as small as it can get while maintaining watchable quality.",
        format_bytes(output_size),
        target_mb
    )
}

/// Human-readable size with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}

/// `<stem>_compressed.mp4`; a leading dot is part of the name, not an extension.
pub fn get_output_file_name(original_name: &str) -> String {
    let base = match original_name.rfind('.') {
        Some(idx) if idx > 0 => &original_name[..idx],
        _ => original_name,
    };
    format!("{}_compressed.mp4", base)
}

/// Output path next to `dir` for an input named `original`.
pub fn output_path_for(dir: &Path, original: &Path) -> PathBuf {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    dir.join(get_output_file_name(&name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_only_step_is_eighty_percent() {
        let first = PassAttempt::first(1620.0);
        let second = first.next(1620.0);
        let third = second.next(1620.0);
        assert_eq!(second.scale_step, 0);
        assert!((second.bitrate_kbps - 1296.0).abs() < 1e-9);
        assert!((third.bitrate_kbps - 1036.8).abs() < 1e-9);
        assert_eq!(third.attempt, 3);
    }

    #[test]
    fn low_bitrate_steps_down_and_resets() {
        let pass = PassAttempt {
            attempt: 2,
            bitrate_kbps: 600.0,
            scale_step: 0,
        };
        let next = pass.next(600.0);
        assert_eq!(next.scale_step, 1);
        assert_eq!(next.bitrate_kbps, 600.0);
        assert_eq!(next.scale_height(), Some(720));
    }

    #[test]
    fn scale_steps_cap_then_bitrate_floors() {
        let pass = PassAttempt {
            attempt: 5,
            bitrate_kbps: 110.0,
            scale_step: MAX_SCALE_STEPS,
        };
        let next = pass.next(110.0);
        assert_eq!(next.scale_step, MAX_SCALE_STEPS);
        assert_eq!(next.bitrate_kbps, MIN_BITRATE_KBPS);
    }

    #[test]
    fn request_validation() {
        assert!(CompressionRequest::new("a", "b", 1, 1, 0.0, Preset::Fast).is_err());
        assert!(CompressionRequest::new("a", "b", 1, 1, f64::INFINITY, Preset::Fast).is_err());
        assert!(CompressionRequest::new("a", "b", 1, 0, 5.0, Preset::Fast).is_err());
        let req = CompressionRequest::new("a", "b", 1, 25 * 1024 * 1024, 5.0, Preset::Fast).unwrap();
        assert_eq!(req.target_size_mb(), 25.0);
        assert!(req.fits_budget());
    }

    #[test]
    fn progress_window() {
        assert_eq!(window_percent(0, 3, 0.0), 15.0);
        assert_eq!(window_percent(2, 2, 0.0), 85.0);
        assert_eq!(window_percent(1, 2, 1.0), 85.0);
        assert_eq!(window_percent(0, 1, 0.5), 50.0);
        assert_eq!(window_percent(0, 1, 7.0), 85.0);
    }

    #[test]
    fn monotonic_progress_never_regresses() {
        let seen = Mutex::new(Vec::new());
        let sink = |_: &str, p: f64| seen.lock().unwrap().push(p);
        let progress = MonotonicProgress::new(&sink);
        progress.report("a", 20.0);
        progress.report("b", 10.0);
        progress.report("c", f64::NAN);
        progress.report("d", 30.0);
        assert_eq!(*seen.lock().unwrap(), vec![20.0, 20.0, 20.0, 30.0]);
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(27_000_000), "25.7 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn output_names() {
        assert_eq!(get_output_file_name("holiday.mov"), "holiday_compressed.mp4");
        assert_eq!(get_output_file_name("a.b.webm"), "a.b_compressed.mp4");
        assert_eq!(get_output_file_name(".hidden"), ".hidden_compressed.mp4");
        assert_eq!(get_output_file_name("noext"), "noext_compressed.mp4");
        assert_eq!(
            output_path_for(Path::new("/tmp/out"), Path::new("/in/clip.mkv")),
            PathBuf::from("/tmp/out/clip_compressed.mp4")
        );
    }

    #[test]
    fn warning_texts_name_the_target() {
        assert!(audio_budget_warning(1.0).starts_with("Couldn't hit 1MB"));
        let w = exhaustion_warning(2 * 1024 * 1024, 1.0);
        assert!(w.starts_with("Output is 2.0 MB - couldn't reach 1MB target."));
    }
}
