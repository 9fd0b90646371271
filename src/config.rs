use std::time::Duration;

use crate::error::{SplitgzError, SplitgzResult};

/// Default chunk size for compression (1MB)
pub const DEFAULT_PORTION_SIZE: usize = 1024 * 1024;

/// Default ceiling for any single operation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Longest accepted timeout (one year); larger values overflow `Instant`
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Advisory memory ceiling (not enforced)
pub const DEFAULT_MAX_MEMORY: u64 = 1000 * 1024 * 1024;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of transform threads
    pub workers: usize,
    /// Operation-wide deadline for inbound drain, worker completion and
    /// collector join
    pub timeout: Duration,
    /// Bytes in flight above which the producer logs a warning
    pub max_memory_bytes: u64,
    pub portion_size: usize,
    pub compression_level: u32,
    /// Treat manifest index/cursor mismatches as corruption
    pub strict_manifest: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workers: default_workers(),
            timeout: DEFAULT_TIMEOUT,
            max_memory_bytes: DEFAULT_MAX_MEMORY,
            portion_size: DEFAULT_PORTION_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            strict_manifest: false,
        }
    }
}

/// Twice the available hardware parallelism
pub fn default_workers() -> usize {
    (num_cpus::get() * 2).max(1)
}

impl PipelineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_portion_size(mut self, portion_size: usize) -> Self {
        self.portion_size = portion_size;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_strict_manifest(mut self, strict: bool) -> Self {
        self.strict_manifest = strict;
        self
    }

    pub fn validate(&self) -> SplitgzResult<()> {
        if self.workers == 0 {
            return Err(SplitgzError::out_of_range("worker count must be positive"));
        }
        if self.portion_size == 0 {
            return Err(SplitgzError::out_of_range("portion size must be positive"));
        }
        if self.compression_level > 9 {
            return Err(SplitgzError::out_of_range(format!(
                "compression level {} is not in 0..=9",
                self.compression_level
            )));
        }
        if self.timeout.is_zero() {
            return Err(SplitgzError::out_of_range("timeout must be positive"));
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(SplitgzError::out_of_range(format!(
                "timeout of {}s exceeds the {}s limit",
                self.timeout.as_secs(),
                MAX_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}
