// worker/src/main.rs
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use tokio::signal;
use tokio::time::sleep;
use uuid::Uuid;

use smolvids::compressor::{output_path_for, CompressionRequest, Compressor};
use smolvids::config::WorkerConfig;
use smolvids::error::JobError;
use smolvids::job::{
    create_scratch_dir, parse_job_from_map, publish_report, Job, JobReport, COMPRESSION_JOB_STREAM_KEY, JOB_CONSUMER_GROUP,
};
use smolvids::probe::{probe_duration, resolve_duration};
use smolvids::s3::{download_file, new_s3_client, presign_download, upload_file};
use smolvids::transcoder::FfmpegEngine;
use smolvids::{consumer_name, ensure_consumer_group_exists, get_consumer_hostname};

const WORKER_LOOP_DELAY_MS: u64 = 1000;
const STREAM_BLOCK_TIMEOUT_MS: usize = 5000;

struct Worker {
    config: WorkerConfig,
    s3_client: aws_sdk_s3::Client,
    compressor: Compressor<FfmpegEngine>,
}

impl Worker {
    async fn process_single_job(&self, job: &Job) -> Result<JobReport, JobError> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let job_dir = create_scratch_dir(&self.config.work_dir, &job.payload.job_id)?;

        let result = self.compress_in(job_dir.path(), job).await;

        debug!("[Job {}] Cleaning up {:?}", job.payload.job_id, job_dir.path());
        if let Err(e) = job_dir.close() {
            warn!("[Job {}] Failed to remove scratch dir: {}", job.payload.job_id, e);
        }
        result
    }

    async fn compress_in(&self, job_dir: &Path, job: &Job) -> Result<JobReport, JobError> {
        let payload = &job.payload;
        let job_id = payload.job_id.as_str();
        info!(
            "[Job {}] Processing. Input: s3://{}/{}, target {}MB, preset {}",
            job_id, payload.input_bucket, payload.input_object_key, payload.options.target_size_mb, payload.options.preset
        );

        let input_name = payload.input_file_name();
        let local_input: PathBuf = job_dir.join(&input_name);
        let local_output = output_path_for(job_dir, Path::new(&input_name));

        let source_size = download_file(&self.s3_client, &payload.input_bucket, &payload.input_object_key, &local_input)
            .await
            .map_err(JobError::Download)?;

        let probed = match payload.options.duration_sec {
            Some(d) if d.is_finite() && d > 0.0 => None,
            _ => probe_duration(&self.config.ffprobe_path, &local_input).await,
        };
        let duration = resolve_duration(payload.options.duration_sec, probed, source_size);
        debug!("[Job {}] Using duration {:.1}s", job_id, duration);

        let request = CompressionRequest::new(
            local_input.clone(),
            local_output.clone(),
            source_size,
            payload.options.target_bytes(),
            duration,
            payload.options.preset,
        )?;

        let sink = |text: &str, percent: f64| info!("[Job {}] {} ({:.0}%)", job_id, text, percent);
        let result = self.compressor.compress(request, &sink).await?;

        let mut report = JobReport::completed(job_id, &result);
        if let Some(warning) = &result.warning {
            warn!("[Job {}] {}", job_id, warning);
        }

        if result.output_size.is_some() && local_output.exists() {
            let output_key = payload.resolved_output_key();
            upload_file(&self.s3_client, &payload.output_bucket, &output_key, &local_output)
                .await
                .map_err(JobError::Upload)?;

            match presign_download(&self.s3_client, &payload.output_bucket, &output_key, self.config.presign_expiry).await {
                Ok(url) => report.download_url = Some(url),
                Err(e) => warn!("[Job {}] {}", job_id, e),
            }
            report.output_object_key = Some(output_key);
        }

        info!("[Job {}] Finished in {} pass(es).", job_id, result.passes);
        Ok(report)
    }

    async fn jobs_processing_loop(&self, mut valkey_con: MultiplexedConnection, consumer_name: &str) {
        info!(
            "Worker '{}' processing jobs from stream '{}', group '{}'",
            consumer_name, COMPRESSION_JOB_STREAM_KEY, JOB_CONSUMER_GROUP
        );

        loop {
            let read_opts = StreamReadOptions::default()
                .group(JOB_CONSUMER_GROUP, consumer_name)
                .count(1)
                .block(STREAM_BLOCK_TIMEOUT_MS);

            let result: RedisResult<Option<StreamReadReply>> = valkey_con
                .xread_options(&[COMPRESSION_JOB_STREAM_KEY], &[">"], &read_opts)
                .await;

            match result {
                Ok(Some(reply)) => {
                    for stream_key_entry in reply.keys {
                        for message_entry in stream_key_entry.ids {
                            self.handle_message(&mut valkey_con, message_entry.id, message_entry.map).await;
                        }
                    }
                }
                Ok(None) => {
                    debug!("No messages received for consumer '{}' within timeout, re-checking.", consumer_name);
                }
                Err(e) => {
                    error!(
                        "Error reading from Valkey stream '{}': {}. Retrying after delay.",
                        COMPRESSION_JOB_STREAM_KEY, e
                    );
                    sleep(Duration::from_millis(WORKER_LOOP_DELAY_MS)).await;
                }
            }
        }
    }

    async fn handle_message(
        &self,
        valkey_con: &mut MultiplexedConnection,
        message_id: String,
        fields: HashMap<String, redis::Value>,
    ) {
        let job = match parse_job_from_map(message_id.clone(), fields) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to parse job (Valkey ID: {}): {}. Skipping.", message_id, e);
                return;
            }
        };
        let job_id = job.payload.job_id.clone();

        match self.process_single_job(&job).await {
            Ok(report) => {
                if let Err(e) = publish_report(valkey_con, &report).await {
                    error!("[Job {}] Failed to publish result: {}", job_id, e);
                }
                match valkey_con
                    .xack::<_, _, _, i64>(COMPRESSION_JOB_STREAM_KEY, JOB_CONSUMER_GROUP, &[&job.message_id])
                    .await
                {
                    Ok(acked) if acked > 0 => info!("[Job {}] ACKed Valkey message_id: {}", job_id, job.message_id),
                    Ok(_) => warn!("[Job {}] ACK for Valkey message_id {} returned 0.", job_id, job.message_id),
                    Err(e) => error!("[Job {}] Failed to ACK Valkey message_id {}: {}", job_id, job.message_id, e),
                }
            }
            Err(e) => {
                // Left un-ACKed in the pending list for retry or inspection.
                error!("[Job {}] Failed to process: {}. Valkey message {} will NOT be ACKed.", job_id, e, job.message_id);
                if let Err(e) = publish_report(valkey_con, &JobReport::failed(&job_id)).await {
                    error!("[Job {}] Failed to publish failure: {}", job_id, e);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WorkerConfig::from_env();
    let consumer_name = consumer_name(&get_consumer_hostname(), &Uuid::new_v4().to_string());
    info!("Starting worker with consumer name: {}", consumer_name);
    debug!("Worker config: {:?}", config);

    let engine = FfmpegEngine::new(config.ffmpeg_path.clone());
    if let Err(e) = engine.check_available().await {
        error!("ffmpeg is not usable at '{}': {}", engine.ffmpeg_path(), e);
        return Err(e.into());
    }

    let s3_client = new_s3_client(&config).await;
    info!("S3 client initialized.");

    info!("Connecting to Valkey at: {}", config.valkey_url);
    let valkey_client = redis::Client::open(config.valkey_url.as_str())?;
    let mut valkey_con_for_group_check = valkey_client.get_multiplexed_async_connection().await.map_err(|e| {
        error!("Failed to connect to Valkey: {}", e);
        e
    })?;
    info!("Successfully connected to Valkey.");

    if let Err(e) =
        ensure_consumer_group_exists(&mut valkey_con_for_group_check, COMPRESSION_JOB_STREAM_KEY, JOB_CONSUMER_GROUP)
            .await
    {
        error!("Could not ensure consumer group exists: {}. Exiting.", e);
        return Err(e.into());
    }

    let valkey_con_for_loop = valkey_client.get_multiplexed_async_connection().await?;

    let worker = Worker {
        config,
        s3_client,
        compressor: Compressor::new(engine),
    };

    tokio::select! {
        _ = worker.jobs_processing_loop(valkey_con_for_loop, &consumer_name) => {
            error!("Job processing loop exited unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("CTRL-C received, shutting down worker '{}'.", consumer_name);
        }
    }

    info!("Worker {} finished.", consumer_name);
    Ok(())
}
