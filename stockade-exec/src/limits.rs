//! Resource ceilings for child processes and the platform hook that
//! installs them.
//!
//! [`ResourceLimits`] is a validated, immutable record. The actual rlimit
//! syscalls live behind the [`ResourceLimiter`] trait so the executor works
//! on platforms without the POSIX rlimit family, just without enforcement.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A resource-limit field was given an unusable value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitsError {
    #[error("resource limit `{0}` must be greater than zero")]
    NonPositive(&'static str),
    #[error("wall-clock limit must be a positive, finite number of seconds")]
    InvalidWallClock,
}

/// Ceilings applied to one child process.
///
/// All fields are positive; construct through [`ResourceLimits::new`] or one
/// of the presets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    cpu_seconds: u64,
    memory_bytes: u64,
    max_file_bytes: u64,
    max_open_files: u64,
    max_processes: u64,
    wall_clock_seconds: f64,
}

impl ResourceLimits {
    pub fn new(
        cpu_seconds: u64,
        memory_bytes: u64,
        max_file_bytes: u64,
        max_open_files: u64,
        max_processes: u64,
        wall_clock_seconds: f64,
    ) -> Result<Self, LimitsError> {
        if cpu_seconds == 0 {
            return Err(LimitsError::NonPositive("cpu_seconds"));
        }
        if memory_bytes == 0 {
            return Err(LimitsError::NonPositive("memory_bytes"));
        }
        if max_file_bytes == 0 {
            return Err(LimitsError::NonPositive("max_file_bytes"));
        }
        if max_open_files == 0 {
            return Err(LimitsError::NonPositive("max_open_files"));
        }
        if max_processes == 0 {
            return Err(LimitsError::NonPositive("max_processes"));
        }
        if !wall_clock_seconds.is_finite() || wall_clock_seconds <= 0.0 {
            return Err(LimitsError::InvalidWallClock);
        }
        Ok(Self {
            cpu_seconds,
            memory_bytes,
            max_file_bytes,
            max_open_files,
            max_processes,
            wall_clock_seconds,
        })
    }

    /// Tight ceilings for untrusted, throwaway work.
    pub const fn minimal() -> Self {
        Self {
            cpu_seconds: 5,
            memory_bytes: 128 * 1024 * 1024,
            max_file_bytes: 5 * 1024 * 1024,
            max_open_files: 32,
            max_processes: 8,
            wall_clock_seconds: 10.0,
        }
    }

    /// The default ceilings for ordinary agent commands.
    pub const fn standard() -> Self {
        Self {
            cpu_seconds: 30,
            memory_bytes: 512 * 1024 * 1024,
            max_file_bytes: 50 * 1024 * 1024,
            max_open_files: 256,
            max_processes: 32,
            wall_clock_seconds: 60.0,
        }
    }

    /// Loose ceilings for builds and other heavyweight tooling.
    pub const fn generous() -> Self {
        Self {
            cpu_seconds: 300,
            memory_bytes: 4 * 1024 * 1024 * 1024,
            max_file_bytes: 1024 * 1024 * 1024,
            max_open_files: 1024,
            max_processes: 128,
            wall_clock_seconds: 600.0,
        }
    }

    pub const fn cpu_seconds(&self) -> u64 {
        self.cpu_seconds
    }

    pub const fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub const fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub const fn max_open_files(&self) -> u64 {
        self.max_open_files
    }

    pub const fn max_processes(&self) -> u64 {
        self.max_processes
    }

    pub const fn wall_clock_seconds(&self) -> f64 {
        self.wall_clock_seconds
    }

    /// The wall-clock ceiling as a [`Duration`].
    pub fn wall_clock(&self) -> Duration {
        Duration::from_secs_f64(self.wall_clock_seconds)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::standard()
    }
}

/// Installs resource ceilings into the current process.
///
/// [`ResourceLimiter::apply`] runs inside the child between fork and exec,
/// so implementations must stay async-signal-safe: raw syscalls only, no
/// allocation, no locks.
pub trait ResourceLimiter: Send + Sync + std::fmt::Debug {
    /// Whether this limiter actually enforces anything.
    fn supported(&self) -> bool;

    fn apply(&self, limits: &ResourceLimits) -> io::Result<()>;
}

/// rlimit-based enforcement for Unix targets.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixResourceLimiter;

#[cfg(unix)]
impl ResourceLimiter for PosixResourceLimiter {
    fn supported(&self) -> bool {
        true
    }

    fn apply(&self, limits: &ResourceLimits) -> io::Result<()> {
        use nix::sys::resource::{Resource, setrlimit};

        let pairs = [
            (Resource::RLIMIT_CPU, limits.cpu_seconds()),
            (Resource::RLIMIT_AS, limits.memory_bytes()),
            (Resource::RLIMIT_FSIZE, limits.max_file_bytes()),
            (Resource::RLIMIT_NOFILE, limits.max_open_files()),
            (Resource::RLIMIT_NPROC, limits.max_processes()),
            // No core dumps from sandboxed children.
            (Resource::RLIMIT_CORE, 0),
        ];
        for (resource, value) in pairs {
            setrlimit(resource, value, value).map_err(io::Error::from)?;
        }
        Ok(())
    }
}

/// Fallback for platforms without the rlimit family. Applies nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResourceLimiter;

impl ResourceLimiter for NoopResourceLimiter {
    fn supported(&self) -> bool {
        false
    }

    fn apply(&self, _limits: &ResourceLimits) -> io::Result<()> {
        Ok(())
    }
}

/// The limiter for the current platform. Logs a degradation warning once
/// when falling back to the no-op implementation.
pub fn platform_limiter() -> Arc<dyn ResourceLimiter> {
    #[cfg(unix)]
    {
        Arc::new(PosixResourceLimiter)
    }
    #[cfg(not(unix))]
    {
        use std::sync::Once;
        use tracing::warn;

        static DEGRADED: Once = Once::new();
        DEGRADED.call_once(|| {
            warn!("POSIX resource limits are unavailable on this platform; children run unconstrained");
        });
        Arc::new(NoopResourceLimiter)
    }
}
