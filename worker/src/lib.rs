use log::{error, info};
use redis::{aio::MultiplexedConnection, AsyncCommands, RedisError, RedisResult};

pub mod args;
pub mod bitrate;
pub mod compressor;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod ladder;
pub mod options;
pub mod probe;
pub mod s3;
pub mod transcoder;

// Helper to get hostname or a default
pub fn get_consumer_hostname() -> String {
    hostname::get()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

pub fn consumer_name(hostname: &str, id: &str) -> String {
    format!("smolvids-{}-{}", hostname, id)
}

pub async fn ensure_consumer_group_exists(
    con: &mut MultiplexedConnection,
    stream_key: &str,
    group_name: &str,
) -> RedisResult<()> {
    // Start a new group at "0" so jobs queued before the first worker are not skipped.
    let result: Result<(), RedisError> = con
        .xgroup_create_mkstream(stream_key, group_name, "0")
        .await;

    match result {
        Ok(()) => {
            info!(
                "Consumer group '{}' created for stream '{}'",
                group_name, stream_key
            );
            Ok(())
        }
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            info!(
                "Consumer group '{}' already exists for stream '{}'",
                group_name, stream_key
            );
            Ok(())
        }
        Err(e) => {
            error!(
                "Failed to create consumer group '{}' for stream '{}': {}",
                group_name, stream_key, e
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_names_are_prefixed() {
        assert_eq!(consumer_name("box", "42"), "smolvids-box-42");
        assert!(!get_consumer_hostname().is_empty());
    }
}
