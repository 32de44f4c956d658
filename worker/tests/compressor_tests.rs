//! Controller behaviour against a scripted engine.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use smolvids::args::{EncodeInvocation, RateControl};
use smolvids::compressor::{CompressionRequest, Compressor, AUDIO_INCOMPATIBLE_WARNING};
use smolvids::engine::{EncodingEngine, ProgressListener};
use smolvids::error::{CompressError, EngineError};
use smolvids::options::Preset;

const MB: u64 = 1024 * 1024;

enum Outcome {
    Size(u64),
    Fail(&'static str),
}

#[derive(Default)]
struct ScriptedEngine {
    outcomes: VecDeque<Outcome>,
    calls: Vec<EncodeInvocation>,
    last_size: Option<u64>,
}

impl ScriptedEngine {
    fn new(outcomes: Vec<Outcome>) -> Self {
        Self {
            outcomes: outcomes.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EncodingEngine for ScriptedEngine {
    async fn encode(
        &mut self,
        invocation: &EncodeInvocation,
        progress: Option<ProgressListener<'_>>,
    ) -> Result<(), EngineError> {
        self.calls.push(invocation.clone());
        if let Some(listener) = progress {
            for fraction in [0.0, 0.5, 1.0] {
                listener(fraction);
            }
        }
        match self.outcomes.pop_front() {
            Some(Outcome::Size(size)) => {
                self.last_size = Some(size);
                Ok(())
            }
            Some(Outcome::Fail(message)) => Err(EngineError::failed(message, Some(1))),
            None => Err(EngineError::failed("script exhausted", None)),
        }
    }

    async fn output_size(&self, output: &Path) -> Result<u64, EngineError> {
        self.last_size
            .ok_or_else(|| EngineError::FileNotFound(output.to_path_buf()))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, f64)>>,
}

impl RecordingSink {
    fn sink(&self) -> impl Fn(&str, f64) + Send + Sync + '_ {
        move |text: &str, percent: f64| self.events.lock().unwrap().push((text.to_string(), percent))
    }

    fn events(&self) -> Vec<(String, f64)> {
        self.events.lock().unwrap().clone()
    }
}

fn request(source: u64, target: u64, duration: f64, preset: Preset) -> CompressionRequest {
    CompressionRequest::new("in.mov", "out/in_compressed.mp4", source, target, duration, preset).unwrap()
}

fn bitrate_of(inv: &EncodeInvocation) -> u64 {
    match inv.rate {
        RateControl::Bitrate { bitrate_kbps, .. } => bitrate_kbps,
        RateControl::Quality { .. } => panic!("expected a bitrate pass"),
    }
}

#[tokio::test]
async fn small_source_is_normalized_once() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![Outcome::Size(9 * MB)]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    let result = compressor
        .compress(request(10 * MB, 25 * MB, 120.0, Preset::Balanced), &sink)
        .await
        .unwrap();

    assert_eq!(result.warning, None);
    assert_eq!(result.passes, 1);
    assert_eq!(result.output_size, Some(9 * MB));

    let engine = compressor.into_engine();
    assert_eq!(engine.calls.len(), 1);
    assert_eq!(engine.calls[0].rate, RateControl::Quality { crf: 23 });
    assert_eq!(engine.calls[0].scale_height, None);
}

#[tokio::test]
async fn small_source_with_incompatible_audio_warns() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![Outcome::Fail(
        "Could not write header: audio codec not supported in container",
    )]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    let result = compressor
        .compress(request(MB, 25 * MB, 30.0, Preset::Fast), &sink)
        .await
        .unwrap();

    assert_eq!(result.warning.as_deref(), Some(AUDIO_INCOMPATIBLE_WARNING));
    assert_eq!(result.output_size, None);
    assert_eq!(compressor.into_engine().calls.len(), 1);
}

#[tokio::test]
async fn other_engine_failures_propagate() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![Outcome::Fail(
        "Invalid data found when processing input",
    )]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    let err = compressor
        .compress(request(100 * MB, 25 * MB, 120.0, Preset::Balanced), &sink)
        .await
        .unwrap_err();

    assert!(matches!(err, CompressError::Engine(EngineError::Failed { .. })));
    assert_eq!(compressor.into_engine().calls.len(), 1);
}

#[tokio::test]
async fn second_pass_decays_bitrate_and_succeeds() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![
        Outcome::Size(30 * MB),
        Outcome::Size(24 * MB),
    ]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    let result = compressor
        .compress(request(200 * MB, 25 * MB, 120.0, Preset::Balanced), &sink)
        .await
        .unwrap();

    assert_eq!(result.warning, None);
    assert_eq!(result.passes, 2);
    assert_eq!(result.output_size, Some(24 * MB));

    let engine = compressor.into_engine();
    assert_eq!(engine.calls.len(), 2);
    assert_eq!(bitrate_of(&engine.calls[0]), 1620);
    // 1619.63 * 0.8
    assert_eq!(bitrate_of(&engine.calls[1]), 1296);
    assert!(engine.calls.iter().all(|c| c.scale_height.is_none()));
}

#[tokio::test]
async fn exhausted_passes_report_achieved_size() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![
        Outcome::Size(40 * MB),
        Outcome::Size(35 * MB),
        Outcome::Size(30 * MB),
    ]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    let result = compressor
        .compress(request(200 * MB, 25 * MB, 120.0, Preset::Balanced), &sink)
        .await
        .unwrap();

    assert_eq!(
        result.warning.as_deref(),
        Some(
            "Output is 30.0 MB - couldn't reach 25MB target. This is as small as it can get while maintaining watchable quality."
        )
    );
    assert_eq!(result.passes, 3);

    let engine = compressor.into_engine();
    let bitrates: Vec<u64> = engine.calls.iter().map(bitrate_of).collect();
    // 1619.63, then two 20% decays: 1295.70, 1036.56
    assert_eq!(bitrates, vec![1620, 1296, 1037]);
}

#[tokio::test]
async fn invocations_are_bounded_by_preset() {
    for (preset, max_passes) in [(Preset::Fast, 2), (Preset::Balanced, 3), (Preset::Smallest, 4)] {
        let outcomes = (0..6).map(|_| Outcome::Size(50 * MB)).collect();
        let compressor = Compressor::new(ScriptedEngine::new(outcomes));
        let recorder = RecordingSink::default();
        let sink = recorder.sink();

        let result = compressor
            .compress(request(200 * MB, 25 * MB, 120.0, preset), &sink)
            .await
            .unwrap();

        assert!(result.warning.is_some());
        assert_eq!(result.passes, max_passes);
        assert_eq!(compressor.into_engine().calls.len(), max_passes as usize);
    }
}

#[tokio::test]
async fn low_bitrate_downscales_one_rung_per_pass() {
    // ~550 kbps over 10 s once 160_000 audio bytes are set aside.
    let target = 160_000 + 687_500;
    let outcomes = (0..4).map(|_| Outcome::Size(2 * MB)).collect();
    let compressor = Compressor::new(ScriptedEngine::new(outcomes));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    compressor
        .compress(request(50 * MB, target, 10.0, Preset::Smallest), &sink)
        .await
        .unwrap();

    let engine = compressor.into_engine();
    let heights: Vec<Option<u32>> = engine.calls.iter().map(|c| c.scale_height).collect();
    assert_eq!(heights, vec![None, Some(720), Some(480), Some(360)]);
    // Each downscale resets to the initial estimate.
    assert!(engine.calls.iter().all(|c| bitrate_of(c) == 550));
}

#[tokio::test]
async fn audio_heavy_target_warns_even_when_output_fits() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![Outcome::Size(MB / 2)]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    // 600 s of 128 kbps audio is 9.6 MB, far over a 1 MB budget.
    let result = compressor
        .compress(request(20 * MB, MB, 600.0, Preset::Balanced), &sink)
        .await
        .unwrap();

    let warning = result.warning.unwrap();
    assert!(warning.starts_with("Couldn't hit 1MB because the audio track alone is too large"));
    assert_eq!(result.passes, 1);
    assert_eq!(bitrate_of(&compressor.into_engine().calls[0]), 100);
}

#[tokio::test]
async fn audio_incompatibility_mid_loop_stops_immediately() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![
        Outcome::Size(30 * MB),
        Outcome::Fail("Audio stream incompatible with mp4 muxer"),
        Outcome::Size(10 * MB),
    ]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    let result = compressor
        .compress(request(200 * MB, 25 * MB, 120.0, Preset::Smallest), &sink)
        .await
        .unwrap();

    assert_eq!(result.warning.as_deref(), Some(AUDIO_INCOMPATIBLE_WARNING));
    assert_eq!(result.passes, 2);
    assert_eq!(compressor.into_engine().calls.len(), 2);
}

#[tokio::test]
async fn progress_is_ordered_and_inside_the_encoding_window() {
    let compressor = Compressor::new(ScriptedEngine::new(vec![
        Outcome::Size(40 * MB),
        Outcome::Size(35 * MB),
        Outcome::Size(30 * MB),
    ]));
    let recorder = RecordingSink::default();
    let sink = recorder.sink();

    compressor
        .compress(request(200 * MB, 25 * MB, 120.0, Preset::Balanced), &sink)
        .await
        .unwrap();

    let events = recorder.events();
    assert!(!events.is_empty());
    assert!(events.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(events.iter().all(|(_, p)| (15.0..=85.0).contains(p)));
    assert_eq!(events.first().unwrap(), &("Pass 1/3...".to_string(), 15.0));
    assert_eq!(events.last().unwrap(), &("Pass 3/3...".to_string(), 85.0));
    assert!(events.iter().any(|(t, _)| t == "Pass 2/3..."));
}

struct GatedEngine {
    gate: Arc<Notify>,
    calls: usize,
}

#[async_trait]
impl EncodingEngine for GatedEngine {
    async fn encode(
        &mut self,
        _invocation: &EncodeInvocation,
        _progress: Option<ProgressListener<'_>>,
    ) -> Result<(), EngineError> {
        self.calls += 1;
        self.gate.notified().await;
        Ok(())
    }

    async fn output_size(&self, _output: &Path) -> Result<u64, EngineError> {
        Ok(MB)
    }
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let gate = Arc::new(Notify::new());
    let compressor = Compressor::new(GatedEngine {
        gate: gate.clone(),
        calls: 0,
    });
    let recorder = RecordingSink::default();
    let sink = recorder.sink();
    let req = request(MB, 25 * MB, 60.0, Preset::Fast);

    let first = compressor.compress(req.clone(), &sink);
    let second = async {
        tokio::task::yield_now().await;
        assert!(compressor.is_busy());
        let rejected = compressor.compress(req.clone(), &sink).await;
        gate.notify_one();
        rejected
    };

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().warning, None);
    assert!(matches!(second, Err(CompressError::Busy)));
    assert!(!compressor.is_busy());
    assert_eq!(compressor.into_engine().calls, 1);
}
