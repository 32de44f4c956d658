use std::path::PathBuf;
use std::time::Duration;

use crate::probe::DEFAULT_FFPROBE_PATH;
use crate::transcoder::DEFAULT_FFMPEG_PATH;

pub const VALKEY_URL_ENV_VAR: &str = "VALKEY_URL";
pub const MINIO_ENDPOINT_URL_ENV_VAR: &str = "MINIO_ENDPOINT_URL";
// MinIO ignores regions but the SDK requires one.
pub const MINIO_REGION_ENV_VAR: &str = "MINIO_AWS_REGION";
pub const FFMPEG_PATH_ENV_VAR: &str = "SMOLVIDS_FFMPEG_PATH";
pub const FFPROBE_PATH_ENV_VAR: &str = "SMOLVIDS_FFPROBE_PATH";
pub const WORK_DIR_ENV_VAR: &str = "SMOLVIDS_WORK_DIR";
pub const PRESIGN_EXPIRY_ENV_VAR: &str = "SMOLVIDS_PRESIGN_EXPIRY_SECS";

const DEFAULT_VALKEY_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_MINIO_ENDPOINT_URL: &str = "http://localhost:9000";
const DEFAULT_MINIO_REGION: &str = "us-east-1";
const DEFAULT_WORK_DIR: &str = "temp_work";
const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 3600;

/// Worker settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub valkey_url: String,
    pub minio_endpoint_url: String,
    pub minio_region: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Per-job scratch directories are created under this path.
    pub work_dir: PathBuf,
    pub presign_expiry: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let presign_secs = lookup(PRESIGN_EXPIRY_ENV_VAR)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_PRESIGN_EXPIRY_SECS);

        WorkerConfig {
            valkey_url: get(VALKEY_URL_ENV_VAR, DEFAULT_VALKEY_URL),
            minio_endpoint_url: get(MINIO_ENDPOINT_URL_ENV_VAR, DEFAULT_MINIO_ENDPOINT_URL),
            minio_region: get(MINIO_REGION_ENV_VAR, DEFAULT_MINIO_REGION),
            ffmpeg_path: get(FFMPEG_PATH_ENV_VAR, DEFAULT_FFMPEG_PATH),
            ffprobe_path: get(FFPROBE_PATH_ENV_VAR, DEFAULT_FFPROBE_PATH),
            work_dir: PathBuf::from(get(WORK_DIR_ENV_VAR, DEFAULT_WORK_DIR)),
            presign_expiry: Duration::from_secs(presign_secs),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset() {
        let config = WorkerConfig::default();
        assert_eq!(config.valkey_url, "redis://127.0.0.1:6379");
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.ffprobe_path, "ffprobe");
        assert_eq!(config.work_dir, PathBuf::from("temp_work"));
        assert_eq!(config.presign_expiry, Duration::from_secs(3600));
    }

    #[test]
    fn overrides_are_read() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (VALKEY_URL_ENV_VAR, "redis://valkey:6379"),
            (FFMPEG_PATH_ENV_VAR, "/opt/ffmpeg/bin/ffmpeg"),
            (WORK_DIR_ENV_VAR, "/scratch"),
            (PRESIGN_EXPIRY_ENV_VAR, "600"),
            (MINIO_REGION_ENV_VAR, "  "),
        ]);
        let config = WorkerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.valkey_url, "redis://valkey:6379");
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.work_dir, PathBuf::from("/scratch"));
        assert_eq!(config.presign_expiry, Duration::from_secs(600));
        assert_eq!(config.minio_region, "us-east-1");
    }
}
