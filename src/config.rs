use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_CONCURRENT_BLOBS: usize = 5;
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;
pub const MIN_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MONOLITHIC_THRESHOLD: u64 = 5 * 1024 * 1024;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_BACKOFF: Duration = Duration::from_millis(500);

/// A registry to talk to. One connection pool lives under each endpoint
/// for the lifetime of the client constructed from it.
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    base_url: String,
    pub request_timeout: Duration,
}

impl RegistryEndpoint {
    /// `base_url` is the registry root, e.g. `http://localhost:5000`.
    /// Trailing slashes are stripped so path joining stays predictable.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        RegistryEndpoint {
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Tunables for the blob fan-out of a single push.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Upper bound on blob uploads in flight within one push.
    pub max_concurrent_blobs: usize,
    /// Target PATCH chunk size; values below [`MIN_CHUNK_SIZE`] are raised
    /// to the floor at use.
    pub chunk_size: usize,
    /// Blobs strictly smaller than this go through the single-PUT path.
    pub monolithic_threshold: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        PushConfig {
            max_concurrent_blobs: DEFAULT_MAX_CONCURRENT_BLOBS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            monolithic_threshold: DEFAULT_MONOLITHIC_THRESHOLD,
        }
    }
}

impl PushConfig {
    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(MIN_CHUNK_SIZE)
    }
}

/// Retry policy applied to each idempotent protocol sub-step.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_backoff: DEFAULT_RETRY_BASE_BACKOFF,
        }
    }
}
