//! Encoder invocation descriptors and their ffmpeg argv rendering.

use std::path::{Path, PathBuf};

use crate::options::Preset;

/// The single supported output codec.
pub const VIDEO_CODEC: &str = "libx264";
/// Progressive-download MP4 layout.
pub const CONTAINER_FLAGS: &str = "+faststart";
/// Audio is stream-copied, never re-encoded.
pub const AUDIO_CODEC: &str = "copy";

const MAXRATE_FACTOR: f64 = 1.5;
const BUFSIZE_FACTOR: f64 = 2.0;

/// How the video stream's size is steered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateControl {
    /// Average bitrate with peak and buffer bounds, all in kbps.
    Bitrate {
        bitrate_kbps: u64,
        maxrate_kbps: u64,
        bufsize_kbps: u64,
    },
    /// Constant quality, no size targeting.
    Quality { crf: u8 },
}

/// Everything an engine needs for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeInvocation {
    pub input: PathBuf,
    pub output: PathBuf,
    pub codec: &'static str,
    pub speed: &'static str,
    pub rate: RateControl,
    pub audio_codec: &'static str,
    pub movflags: &'static str,
    pub scale_height: Option<u32>,
    pub overwrite: bool,
    /// Expected media duration, for engines that derive completion from timestamps.
    pub duration_hint_sec: Option<f64>,
}

/// Bitrate-targeted invocation for one refinement pass.
pub fn build_encode_parameters(
    input: &Path,
    output: &Path,
    preset: Preset,
    target_bitrate_kbps: f64,
    scale_height: Option<u32>,
) -> EncodeInvocation {
    let rate = RateControl::Bitrate {
        bitrate_kbps: target_bitrate_kbps.round() as u64,
        maxrate_kbps: (target_bitrate_kbps * MAXRATE_FACTOR).round() as u64,
        bufsize_kbps: (target_bitrate_kbps * BUFSIZE_FACTOR).round() as u64,
    };
    invocation(input, output, preset, rate, scale_height)
}

/// Constant-quality invocation that only normalizes codec and container.
pub fn build_normalize_parameters(input: &Path, output: &Path, preset: Preset) -> EncodeInvocation {
    let rate = RateControl::Quality {
        crf: preset.config().crf_base,
    };
    invocation(input, output, preset, rate, None)
}

fn invocation(
    input: &Path,
    output: &Path,
    preset: Preset,
    rate: RateControl,
    scale_height: Option<u32>,
) -> EncodeInvocation {
    EncodeInvocation {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        codec: VIDEO_CODEC,
        speed: preset.config().ffmpeg_preset,
        rate,
        audio_codec: AUDIO_CODEC,
        movflags: CONTAINER_FLAGS,
        scale_height,
        overwrite: true,
        duration_hint_sec: None,
    }
}

impl EncodeInvocation {
    pub fn with_duration_hint(mut self, duration_sec: f64) -> Self {
        self.duration_hint_sec = Some(duration_sec);
        self
    }

    /// Scale filter keeping aspect ratio; width rounds to an even value.
    pub fn scale_filter(&self) -> Option<String> {
        self.scale_height.map(|h| format!("scale=-2:{}", h))
    }

    /// ffmpeg arguments for this invocation, excluding the binary name.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());

        args.push("-c:v".to_string());
        args.push(self.codec.to_string());
        args.push("-preset".to_string());
        args.push(self.speed.to_string());

        match self.rate {
            RateControl::Bitrate {
                bitrate_kbps,
                maxrate_kbps,
                bufsize_kbps,
            } => {
                args.push("-b:v".to_string());
                args.push(format!("{}k", bitrate_kbps));
                args.push("-maxrate".to_string());
                args.push(format!("{}k", maxrate_kbps));
                args.push("-bufsize".to_string());
                args.push(format!("{}k", bufsize_kbps));
            }
            RateControl::Quality { crf } => {
                args.push("-crf".to_string());
                args.push(crf.to_string());
            }
        }

        args.push("-c:a".to_string());
        args.push(self.audio_codec.to_string());

        args.push("-movflags".to_string());
        args.push(self.movflags.to_string());

        if let Some(filter) = self.scale_filter() {
            args.push("-vf".to_string());
            args.push(filter);
        }

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push(self.output.to_string_lossy().into_owned());

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn bitrate_pass_arguments() {
        let inv = build_encode_parameters(Path::new("in.mov"), Path::new("out.mp4"), Preset::Balanced, 1619.6, None);
        assert_eq!(
            inv.rate,
            RateControl::Bitrate {
                bitrate_kbps: 1620,
                maxrate_kbps: 2429,
                bufsize_kbps: 3239,
            }
        );

        let args = inv.to_ffmpeg_args();
        assert!(has_pair(&args, "-i", "in.mov"));
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-preset", "medium"));
        assert!(has_pair(&args, "-b:v", "1620k"));
        assert!(has_pair(&args, "-maxrate", "2429k"));
        assert!(has_pair(&args, "-bufsize", "3239k"));
        assert!(has_pair(&args, "-c:a", "copy"));
        assert!(has_pair(&args, "-movflags", "+faststart"));
        assert!(!args.contains(&"-vf".to_string()));
        assert!(!args.contains(&"-crf".to_string()));
        assert_eq!(&args[args.len() - 2..], ["-y", "out.mp4"]);
    }

    #[test]
    fn scale_filter_is_added_when_requested() {
        let inv = build_encode_parameters(Path::new("a.mp4"), Path::new("b.mp4"), Preset::Fast, 400.0, Some(720));
        let args = inv.to_ffmpeg_args();
        assert!(has_pair(&args, "-vf", "scale=-2:720"));
        assert!(has_pair(&args, "-preset", "veryfast"));
    }

    #[test]
    fn normalize_pass_uses_crf() {
        let inv = build_normalize_parameters(Path::new("a.webm"), Path::new("b.mp4"), Preset::Smallest);
        let args = inv.to_ffmpeg_args();
        assert!(has_pair(&args, "-crf", "18"));
        assert!(has_pair(&args, "-preset", "slow"));
        assert!(!args.contains(&"-b:v".to_string()));
        assert!(args.contains(&"-y".to_string()));
    }
}
