//! Environment-sourced configuration. Not CLI flags — a thin CLI
//! collaborator may still set these env vars before invoking the core.

use crate::error::{ChunkSwarmError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const CHUNK_SIZE_DEFAULT: usize = 512 * 1024;
pub const MAX_FRAME_BODY: usize = 1024 * 1024;
pub const PARALLELISM_DEFAULT: usize = 8;
pub const MAX_PARALLELISM: usize = 64;
pub const MAX_INFLIGHT_SERVES: usize = 64;

pub const KEEPALIVE_INTERVAL_DEFAULT: Duration = Duration::from_secs(30);
pub const LIVENESS_TIMEOUT_DEFAULT: Duration = Duration::from_secs(90);
pub const REAP_INTERVAL_DEFAULT: Duration = Duration::from_secs(30);
pub const SERVE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(60);
pub const CHUNK_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);
pub const DISCOVERY_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);
pub const RETRY_BUDGET_PER_CHUNK_DEFAULT: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub tracker_addr: SocketAddr,
    pub seeder_bind: SocketAddr,
    pub download_dir: PathBuf,
    pub chunk_size: usize,
    pub parallelism: usize,
    pub keepalive_interval: Duration,
    pub liveness_timeout: Duration,
    pub reap_interval: Duration,
    pub serve_timeout: Duration,
    pub chunk_timeout: Duration,
    pub discovery_timeout: Duration,
    pub retry_budget_per_chunk: u32,
    pub max_inflight_serves: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tracker_addr: "127.0.0.1:5000".parse().unwrap(),
            seeder_bind: "0.0.0.0:0".parse().unwrap(),
            download_dir: PathBuf::from("downloads"),
            chunk_size: CHUNK_SIZE_DEFAULT,
            parallelism: PARALLELISM_DEFAULT,
            keepalive_interval: KEEPALIVE_INTERVAL_DEFAULT,
            liveness_timeout: LIVENESS_TIMEOUT_DEFAULT,
            reap_interval: REAP_INTERVAL_DEFAULT,
            serve_timeout: SERVE_TIMEOUT_DEFAULT,
            chunk_timeout: CHUNK_TIMEOUT_DEFAULT,
            discovery_timeout: DISCOVERY_TIMEOUT_DEFAULT,
            retry_budget_per_chunk: RETRY_BUDGET_PER_CHUNK_DEFAULT,
            max_inflight_serves: MAX_INFLIGHT_SERVES,
        }
    }
}

impl Config {
    /// Reads overrides from the environment, falling back to the defaults
    /// above for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("TRACKER_ADDR") {
            config.tracker_addr = parse_addr("TRACKER_ADDR", &v)?;
        }
        if let Ok(v) = std::env::var("SEEDER_BIND") {
            config.seeder_bind = parse_addr("SEEDER_BIND", &v)?;
        }
        if let Ok(v) = std::env::var("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHUNK_SIZE") {
            let chunk_size = parse_usize("CHUNK_SIZE", &v)?;
            if chunk_size == 0 {
                return Err(ChunkSwarmError::Config(
                    "CHUNK_SIZE must be greater than 0".into(),
                ));
            }
            config.chunk_size = chunk_size;
        }
        if let Ok(v) = std::env::var("PARALLELISM") {
            let parallelism = parse_usize("PARALLELISM", &v)?;
            if parallelism == 0 || parallelism > MAX_PARALLELISM {
                return Err(ChunkSwarmError::Config(format!(
                    "PARALLELISM must be between 1 and {MAX_PARALLELISM}, got {parallelism}"
                )));
            }
            config.parallelism = parallelism;
        }
        if let Ok(v) = std::env::var("KEEPALIVE_INTERVAL") {
            config.keepalive_interval = parse_seconds("KEEPALIVE_INTERVAL", &v)?;
        }
        if let Ok(v) = std::env::var("LIVENESS_TIMEOUT") {
            config.liveness_timeout = parse_seconds("LIVENESS_TIMEOUT", &v)?;
        }

        Ok(config)
    }
}

fn parse_addr(var: &str, raw: &str) -> Result<SocketAddr> {
    raw.parse()
        .map_err(|_| ChunkSwarmError::Config(format!("{var}={raw:?} is not a valid host:port")))
}

fn parse_usize(var: &str, raw: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| ChunkSwarmError::Config(format!("{var}={raw:?} is not a valid integer")))
}

fn parse_seconds(var: &str, raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .parse()
        .map_err(|_| ChunkSwarmError::Config(format!("{var}={raw:?} is not a valid integer")))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 512 * 1024);
        assert_eq!(config.parallelism, 8);
        assert_eq!(config.liveness_timeout, Duration::from_secs(90));
    }

    #[test]
    fn rejects_out_of_range_parallelism() {
        std::env::set_var("PARALLELISM", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ChunkSwarmError::Config(_)));
        std::env::remove_var("PARALLELISM");
    }

    #[test]
    fn rejects_zero_chunk_size() {
        std::env::set_var("CHUNK_SIZE", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ChunkSwarmError::Config(_)));
        std::env::remove_var("CHUNK_SIZE");
    }
}
