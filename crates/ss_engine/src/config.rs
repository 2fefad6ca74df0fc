//! Engine configuration. Every timeout and size here has the protocol
//! default; callers override per deployment.

use std::time::Duration;

use ss_proto::transfer::{CLOUD_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, DIRECT_CHUNK_SIZE};

/// Bounded exponential backoff for blob-store I/O.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relay endpoints tried in order for publish; all of them feed
    /// subscriptions.
    pub relays: Vec<String>,

    /// Overall transfer TTL, measured from handshake publication.
    pub handshake_ttl: Duration,
    /// How long a sender idles in `WaitingForReceiver` before giving up
    /// (matches the PIN display idle timeout).
    pub receiver_wait_timeout: Duration,
    /// ICE gathering bound.
    pub ice_timeout: Duration,
    /// Data channel open bound (after signaling completes).
    pub channel_open_timeout: Duration,
    /// Per-chunk ACK bound on the cloud path.
    pub chunk_ack_timeout: Duration,

    pub direct_chunk_size: usize,
    pub cloud_chunk_size: usize,
    pub max_file_size: u64,

    /// Pause sending above this many buffered bytes on the data channel.
    pub backpressure_high_water: usize,
    /// Resume sending once the buffer drains below this.
    pub backpressure_low_water: usize,

    pub blob_retry: RetryPolicy,
    /// In-flight cloud chunks. The wire protocol acks one chunk at a time;
    /// keep at 1 unless every deployment has been upgraded.
    pub cloud_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            handshake_ttl: Duration::from_secs(60 * 60),
            receiver_wait_timeout: Duration::from_secs(5 * 60),
            ice_timeout: Duration::from_secs(10),
            channel_open_timeout: Duration::from_secs(10),
            chunk_ack_timeout: Duration::from_secs(30),
            direct_chunk_size: DIRECT_CHUNK_SIZE,
            cloud_chunk_size: CLOUD_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            backpressure_high_water: 1024 * 1024,
            backpressure_low_water: 256 * 1024,
            blob_retry: RetryPolicy::default(),
            cloud_window: 1,
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
