//! Constants used throughout the benchmark

/// Default number of timed probe exchanges
pub const DEFAULT_PROBE_COUNT: usize = 100_000;

/// Default width of each histogram bucket in nanoseconds
pub const DEFAULT_BUCKET_WIDTH_NS: u64 = 50_000;

/// Default number of histogram buckets
pub const DEFAULT_BUCKET_COUNT: usize = 256;

/// Default lowest stream of the outbound/inbound range
pub const DEFAULT_MIN_STREAM: u16 = 0;

/// Default highest stream of the outbound/inbound range
pub const DEFAULT_MAX_STREAM: u16 = 9;

/// Default time to wait for each correlated observation
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Connect timeout for socket transports
pub const CONNECT_TIMEOUT_MS: u64 = 2_000;

/// How long setup waits for both meters to see their channel become active
pub const ACTIVATION_TIMEOUT_MS: u64 = 2_000;

/// Largest payload a multi-stream frame may carry
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// Largest message the fragment reassembler will buffer per stream
pub const MAX_REASSEMBLED_SIZE: usize = 64 * 1024;

/// Progress bar tick interval in milliseconds
pub const PROGRESS_TICK_INTERVAL_MS: u64 = 100;

/// Live statistics update interval (round trips)
pub const LIVE_STATS_UPDATE_INTERVAL: usize = 500;
