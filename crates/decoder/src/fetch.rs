use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::DecodeError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Counters shared across workers; cheap to read from the render thread.
#[derive(Debug, Default)]
pub(crate) struct FetchStats {
    pub requests: AtomicU64,
    pub bytes_fetched: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub requests: u64,
    pub bytes_fetched: u64,
}

impl FetchStats {
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }

    fn record(&self, byte_count: usize) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched
            .fetch_add(byte_count as u64, Ordering::Relaxed);
    }
}

pub(crate) fn build_client() -> Result<reqwest::blocking::Client, DecodeError> {
    reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|error| DecodeError::Fetch(error.to_string()))
}

/// Fetches the raw source bytes. `http(s)://` goes over the wire;
/// `file://` and bare paths read the local filesystem so tests and offline
/// sources need no server.
pub(crate) fn fetch_source_bytes(
    client: &reqwest::blocking::Client,
    url: &str,
    stats: &FetchStats,
) -> Result<Vec<u8>, DecodeError> {
    let bytes = if let Some(path) = url.strip_prefix("file://") {
        std::fs::read(path).map_err(|error| DecodeError::Fetch(format!("{path}: {error}")))?
    } else if url.starts_with("http://") || url.starts_with("https://") {
        let response = client
            .get(url)
            .send()
            .map_err(|error| DecodeError::Fetch(error.to_string()))?;
        if !response.status().is_success() {
            return Err(DecodeError::Fetch(format!(
                "{url}: request failed with status {}",
                response.status()
            )));
        }
        response
            .bytes()
            .map_err(|error| DecodeError::Fetch(error.to_string()))?
            .to_vec()
    } else {
        std::fs::read(url).map_err(|error| DecodeError::Fetch(format!("{url}: {error}")))?
    };
    stats.record(bytes.len());
    Ok(bytes)
}
