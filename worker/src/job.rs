use std::collections::HashMap;
use std::path::Path;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, FromRedisValue};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::compressor::{get_output_file_name, CompressionResult};
use crate::error::JobError;
use crate::options::CompressionOptions;

pub const COMPRESSION_JOB_STREAM_KEY: &str = "compression_jobs";
pub const JOB_CONSUMER_GROUP: &str = "compression_workers_group";
pub const COMPRESSION_RESULT_STREAM_KEY: &str = "compression_results";

/// What a caller sees when a job fails; details stay in the worker log.
pub const GENERIC_FAILURE_MESSAGE: &str = "could not process this input";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobPayload {
    pub job_id: String,
    pub input_bucket: String,
    pub input_object_key: String,
    pub output_bucket: String,
    /// Defaults to `<input stem>_compressed.mp4` beside the input key.
    pub output_object_key: Option<String>,
    pub options: CompressionOptions,
}

impl JobPayload {
    pub fn input_file_name(&self) -> String {
        Path::new(&self.input_object_key)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "input".to_string())
    }

    pub fn resolved_output_key(&self) -> String {
        if let Some(key) = self.output_object_key.as_ref().filter(|k| !k.is_empty()) {
            return key.clone();
        }
        let name = get_output_file_name(&self.input_file_name());
        match self.input_object_key.rfind('/') {
            Some(idx) => format!("{}/{}", &self.input_object_key[..idx], name),
            None => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub message_id: String, // Valkey message ID
    pub payload: JobPayload,
}

fn field<T: FromRedisValue>(fields: &HashMap<String, redis::Value>, name: &str) -> Result<T, JobError> {
    let value = fields
        .get(name)
        .ok_or_else(|| JobError::Parse(format!("Missing {} field", name)))?;
    redis::from_redis_value(value).map_err(|e| JobError::Parse(format!("Failed to parse {}: {}", name, e)))
}

fn optional_field(fields: &HashMap<String, redis::Value>, name: &str) -> Result<Option<String>, JobError> {
    match fields.get(name) {
        Some(_) => field::<String>(fields, name).map(|v| Some(v).filter(|s| !s.is_empty())),
        None => Ok(None),
    }
}

/// Job ids name scratch directories, so they must be a single plain path component.
pub fn validate_job_id(job_id: &str) -> Result<(), JobError> {
    let trimmed = job_id.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || job_id.contains(['/', '\\', '\0'])
    {
        return Err(JobError::Parse(format!("Invalid job_id {:?}", job_id)));
    }
    Ok(())
}

/// Per-job scratch directory under `work_dir`, removed when the handle drops.
pub fn create_scratch_dir(work_dir: &Path, job_id: &str) -> Result<TempDir, JobError> {
    validate_job_id(job_id)?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("{}-", job_id))
        .tempdir_in(work_dir)?;
    Ok(dir)
}

pub fn parse_job_from_map(message_id: String, fields: HashMap<String, redis::Value>) -> Result<Job, JobError> {
    let options_json: String = field(&fields, "options_json")?;
    let options: CompressionOptions = serde_json::from_str(&options_json)
        .map_err(|e| JobError::Parse(format!("Failed to deserialize CompressionOptions from JSON: {}", e)))?;

    if !options.target_size_mb.is_finite() || options.target_size_mb <= 0.0 {
        return Err(JobError::Parse(format!(
            "target_size_mb must be positive, got {}",
            options.target_size_mb
        )));
    }

    let job_id: String = field(&fields, "job_id")?;
    validate_job_id(&job_id)?;

    Ok(Job {
        message_id,
        payload: JobPayload {
            job_id,
            input_bucket: field(&fields, "input_bucket")?,
            input_object_key: field(&fields, "input_object_key")?,
            output_bucket: field(&fields, "output_bucket")?,
            output_object_key: optional_field(&fields, "output_object_key")?,
            options,
        },
    })
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Terminal record published for every processed job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    pub warning: Option<String>,
    pub output_size: Option<u64>,
    pub output_object_key: Option<String>,
    pub download_url: Option<String>,
    pub error: Option<String>,
}

impl JobReport {
    pub fn completed(job_id: &str, result: &CompressionResult) -> Self {
        JobReport {
            job_id: job_id.to_string(),
            status: JobStatus::Completed,
            warning: result.warning.clone(),
            output_size: result.output_size,
            output_object_key: None,
            download_url: None,
            error: None,
        }
    }

    pub fn failed(job_id: &str) -> Self {
        JobReport {
            job_id: job_id.to_string(),
            status: JobStatus::Failed,
            warning: None,
            output_size: None,
            output_object_key: None,
            download_url: None,
            error: Some(GENERIC_FAILURE_MESSAGE.to_string()),
        }
    }

    /// Flat field list for XADD; absent values are omitted.
    pub fn to_stream_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("job_id", self.job_id.clone()),
            ("status", self.status.as_str().to_string()),
        ];
        if let Some(w) = &self.warning {
            fields.push(("warning", w.clone()));
        }
        if let Some(size) = self.output_size {
            fields.push(("output_size", size.to_string()));
        }
        if let Some(key) = &self.output_object_key {
            fields.push(("output_object_key", key.clone()));
        }
        if let Some(url) = &self.download_url {
            fields.push(("download_url", url.clone()));
        }
        if let Some(e) = &self.error {
            fields.push(("error", e.clone()));
        }
        fields
    }
}

pub async fn publish_report(con: &mut MultiplexedConnection, report: &JobReport) -> Result<String, JobError> {
    let fields = report.to_stream_fields();
    let id: String = con
        .xadd(COMPRESSION_RESULT_STREAM_KEY, "*", fields.as_slice())
        .await?;
    Ok(id)
}
