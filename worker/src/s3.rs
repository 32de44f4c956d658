use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use log::{debug, error, info};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

use crate::config::WorkerConfig;

/// S3 client for a MinIO-style endpoint.
pub async fn new_s3_client(config: &WorkerConfig) -> Client {
    // Credentials come from the standard AWS environment variables or profile.
    let sdk_config = aws_config::load_from_env().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .region(aws_sdk_s3::config::Region::new(config.minio_region.clone()))
        .endpoint_url(&config.minio_endpoint_url)
        // MinIO buckets are addressed by path, not virtual host.
        .force_path_style(true)
        .build();

    info!("Creating S3 client with endpoint: {}", config.minio_endpoint_url);
    Client::from_conf(s3_config)
}

/// Streams an object to `download_path` and returns the bytes written.
pub async fn download_file(
    client: &Client,
    bucket: &str,
    key: &str,
    download_path: &Path,
) -> Result<u64, String> {
    info!("S3: Downloading s3://{}/{} to {:?}", bucket, key, download_path);

    let mut resp = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            let err_msg = format!("S3: Failed to get object s3://{}/{}: {}", bucket, key, e);
            error!("{}", err_msg);
            err_msg
        })?;

    if let Some(parent_dir) = download_path.parent() {
        if !parent_dir.exists() {
            tokio::fs::create_dir_all(parent_dir)
                .await
                .map_err(|e| format!("Failed to create download directory {:?}: {}", parent_dir, e))?;
        }
    }

    let mut file = TokioFile::create(download_path)
        .await
        .map_err(|e| format!("Failed to create file {:?}: {}", download_path, e))?;

    let mut bytes_written: u64 = 0;
    while let Some(chunk) = resp
        .body
        .try_next()
        .await
        .map_err(|e| format!("Error reading S3 object body stream for s3://{}/{}: {}", bucket, key, e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Failed to write to file {:?}: {}", download_path, e))?;
        bytes_written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| format!("Failed to flush file {:?}: {}", download_path, e))?;

    debug!("S3: Downloaded {} bytes from s3://{}/{} to {:?}", bytes_written, bucket, key, download_path);
    Ok(bytes_written)
}

pub async fn upload_file(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_path: &Path,
) -> Result<(), String> {
    info!("S3: Uploading {:?} to s3://{}/{}", upload_path, bucket, key);

    if !upload_path.exists() {
        return Err(format!("File to upload does not exist: {:?}", upload_path));
    }

    let body = ByteStream::from_path(upload_path)
        .await
        .map_err(|e| format!("S3: Failed to create ByteStream from path {:?}: {}", upload_path, e))?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .content_type("video/mp4")
        .body(body)
        .send()
        .await
        .map_err(|e| {
            let err_msg = format!("S3: Failed to upload {:?} to s3://{}/{}: {}", upload_path, bucket, key, e);
            error!("{}", err_msg);
            err_msg
        })?;

    info!("S3: Uploaded {:?} to s3://{}/{}", upload_path, bucket, key);
    Ok(())
}

/// Time-limited GET URL handed back to the caller for the compressed output.
pub async fn presign_download(
    client: &Client,
    bucket: &str,
    key: &str,
    expires_in: Duration,
) -> Result<String, String> {
    let presigning = PresigningConfig::expires_in(expires_in)
        .map_err(|e| format!("Invalid presign expiry {:?}: {}", expires_in, e))?;

    let request = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .presigned(presigning)
        .await
        .map_err(|e| format!("S3: Could not presign s3://{}/{}: {}", bucket, key, e))?;

    debug!("S3: Presigned URL for s3://{}/{} valid for {:?}", bucket, key, expires_in);
    Ok(request.uri().to_string())
}
