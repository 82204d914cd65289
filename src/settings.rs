//! Process-level settings, read once from the environment.

use std::time::Duration;

/// Service tuning knobs. Zero/absent values fall back to CPU-derived
/// defaults, mirroring how the compression gate is meant to track the
/// machine it runs on.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Concurrent optimize permits. Default: CPU count.
    pub permits: usize,
    /// Queue cap before new optimize calls are rejected. Default: 2 x permits.
    pub queue_cap: usize,
    /// Per-call external tool timeout.
    pub tool_timeout: Duration,
    /// Estimation sample budget before the conservative fallback kicks in.
    pub sample_timeout: Duration,
    /// Maximum accepted payload size in bytes.
    pub max_file_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let permits = num_cpus::get().max(1);
        Self {
            permits,
            queue_cap: permits * 2,
            tool_timeout: Duration::from_secs(60),
            sample_timeout: Duration::from_secs(3),
            max_file_size: 32 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(v) = env_usize("SLIMG_PERMITS") {
            if v > 0 {
                settings.permits = v;
                settings.queue_cap = v * 2;
            }
        }
        if let Some(v) = env_usize("SLIMG_QUEUE_CAP") {
            if v > 0 {
                settings.queue_cap = v;
            }
        }
        if let Some(v) = env_usize("SLIMG_TOOL_TIMEOUT_SECS") {
            if v > 0 {
                settings.tool_timeout = Duration::from_secs(v as u64);
            }
        }
        if let Some(v) = env_usize("SLIMG_MAX_FILE_SIZE_MB") {
            if v > 0 {
                settings.max_file_size = v * 1024 * 1024;
            }
        }
        settings
    }

    pub fn check_file_size(&self, size: usize) -> crate::error::Result<()> {
        if size > self.max_file_size {
            return Err(crate::error::SlimgError::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
