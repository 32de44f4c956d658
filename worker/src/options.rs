use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named quality/speed trade-off chosen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Fast,
    #[default]
    Balanced,
    Smallest,
}

/// Encoder settings a preset expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetConfig {
    /// x264 `-preset` speed label.
    pub ffmpeg_preset: &'static str,
    /// CRF used when the source already fits and only needs normalizing.
    pub crf_base: u8,
    /// Upper bound on engine invocations in the refinement loop (>= 1).
    pub max_passes: u32,
}

const FAST: PresetConfig = PresetConfig {
    ffmpeg_preset: "veryfast",
    crf_base: 28,
    max_passes: 2,
};

const BALANCED: PresetConfig = PresetConfig {
    ffmpeg_preset: "medium",
    crf_base: 23,
    max_passes: 3,
};

const SMALLEST: PresetConfig = PresetConfig {
    ffmpeg_preset: "slow",
    crf_base: 18,
    max_passes: 4,
};

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Fast, Preset::Balanced, Preset::Smallest];

    // Lookup is total: every variant has a row.
    pub fn config(self) -> &'static PresetConfig {
        match self {
            Preset::Fast => &FAST,
            Preset::Balanced => &BALANCED,
            Preset::Smallest => &SMALLEST,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Fast => "fast",
            Preset::Balanced => "balanced",
            Preset::Smallest => "smallest",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Preset::Fast),
            "balanced" => Ok(Preset::Balanced),
            "smallest" => Ok(Preset::Smallest),
            other => Err(format!("Unknown preset '{}'", other)),
        }
    }
}

/// Per-job knobs carried in the queue payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionOptions {
    pub target_size_mb: f64,
    #[serde(default)]
    pub preset: Preset,
    /// Seconds; probed from the source when absent.
    #[serde(default)]
    pub duration_sec: Option<f64>,
}

impl CompressionOptions {
    pub fn target_bytes(&self) -> u64 {
        (self.target_size_mb * 1024.0 * 1024.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_passes_per_preset() {
        assert_eq!(Preset::Fast.config().max_passes, 2);
        assert_eq!(Preset::Balanced.config().max_passes, 3);
        assert_eq!(Preset::Smallest.config().max_passes, 4);
        for preset in Preset::ALL {
            assert!(preset.config().max_passes >= 1);
        }
    }

    #[test]
    fn preset_speed_and_crf() {
        assert_eq!(Preset::Fast.config().ffmpeg_preset, "veryfast");
        assert_eq!(Preset::Balanced.config().crf_base, 23);
        assert_eq!(Preset::Smallest.config().ffmpeg_preset, "slow");
    }

    #[test]
    fn parses_preset_names() {
        assert_eq!("Balanced".parse::<Preset>(), Ok(Preset::Balanced));
        assert_eq!(" smallest ".parse::<Preset>(), Ok(Preset::Smallest));
        assert!("ultra".parse::<Preset>().is_err());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: CompressionOptions = serde_json::from_str(r#"{"target_size_mb": 8}"#).unwrap();
        assert_eq!(opts.preset, Preset::Balanced);
        assert_eq!(opts.duration_sec, None);
        assert_eq!(opts.target_bytes(), 8 * 1024 * 1024);

        let opts: CompressionOptions =
            serde_json::from_str(r#"{"target_size_mb": 25, "preset": "fast", "duration_sec": 12.5}"#).unwrap();
        assert_eq!(opts.preset, Preset::Fast);
        assert_eq!(opts.duration_sec, Some(12.5));
    }
}
