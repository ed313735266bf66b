//! Harness configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default maximum number of pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default number of idle connections kept open.
pub const DEFAULT_MIN_IDLE: u32 = 5;

/// Default warm-up iterations per trial.
pub const DEFAULT_WARMUP_ITERATIONS: u32 = 3;

/// Default warm-up iteration length in milliseconds.
pub const DEFAULT_WARMUP_TIME_MS: u64 = 1_000;

/// Default measured iterations per trial.
pub const DEFAULT_MEASUREMENT_ITERATIONS: u32 = 5;

/// Default measured iteration length in milliseconds.
pub const DEFAULT_MEASUREMENT_TIME_MS: u64 = 2_000;

/// Default number of forked worker processes.
pub const DEFAULT_FORKS: u32 = 1;

/// Default seed for fixture generation.
pub const DEFAULT_SEED: u64 = 12345;

/// Configuration of the shared connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Database file. `None` places the file in a fresh temporary directory.
    pub database_path: Option<PathBuf>,

    /// Schema script overriding the embedded one.
    pub schema_path: Option<PathBuf>,

    /// Upper bound on open connections.
    pub max_connections: u32,

    /// Connections kept open while idle.
    pub min_idle: u32,

    /// How long to wait for a free connection before failing.
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// Create a pool configuration on a temporary database.
    pub fn new() -> Self {
        Self {
            database_path: None,
            schema_path: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_idle: DEFAULT_MIN_IDLE,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Use a database file at the given path.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Load the schema from a file instead of the embedded script.
    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    /// Set the maximum pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the idle baseline.
    pub fn with_min_idle(mut self, min: u32) -> Self {
        self.min_idle = min;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Check pool bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.min_idle > self.max_connections {
            return Err(Error::Config(format!(
                "min_idle ({}) exceeds max_connections ({})",
                self.min_idle, self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Measurement settings applied uniformly to every backend in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialConfig {
    pub warmup_iterations: u32,
    pub warmup_time: Duration,
    pub measurement_iterations: u32,
    pub measurement_time: Duration,
    /// Worker processes per run. 0 runs in-process.
    pub forks: u32,
    /// Always 1: concurrency is not the variable under study.
    pub threads: u32,
    pub seed: u64,
    /// Overrides the user count of trial-scoped (read) datasets. Mutation
    /// datasets keep their sizes.
    pub users_override: Option<usize>,
}

impl TrialConfig {
    pub fn new() -> Self {
        Self {
            warmup_iterations: DEFAULT_WARMUP_ITERATIONS,
            warmup_time: Duration::from_millis(DEFAULT_WARMUP_TIME_MS),
            measurement_iterations: DEFAULT_MEASUREMENT_ITERATIONS,
            measurement_time: Duration::from_millis(DEFAULT_MEASUREMENT_TIME_MS),
            forks: DEFAULT_FORKS,
            threads: 1,
            seed: DEFAULT_SEED,
            users_override: None,
        }
    }

    /// Set warm-up iteration count and length.
    pub fn with_warmup(mut self, iterations: u32, time: Duration) -> Self {
        self.warmup_iterations = iterations;
        self.warmup_time = time;
        self
    }

    /// Set measured iteration count and length.
    pub fn with_measurement(mut self, iterations: u32, time: Duration) -> Self {
        self.measurement_iterations = iterations;
        self.measurement_time = time;
        self
    }

    /// Set the number of forked workers.
    pub fn with_forks(mut self, forks: u32) -> Self {
        self.forks = forks;
        self
    }

    /// Set the thread count. Anything but 1 fails validation.
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    /// Set the fixture seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Override the user count of trial-scoped datasets.
    pub fn with_users(mut self, users: usize) -> Self {
        self.users_override = Some(users);
        self
    }

    /// Check that the configuration can produce comparable measurements.
    pub fn validate(&self) -> Result<()> {
        if self.threads != 1 {
            return Err(Error::Config(format!(
                "threads must be 1, got {}",
                self.threads
            )));
        }
        if self.measurement_iterations == 0 {
            return Err(Error::Config(
                "at least one measurement iteration is required".into(),
            ));
        }
        if self.measurement_time.is_zero() {
            return Err(Error::Config("measurement time must be positive".into()));
        }
        if self.users_override == Some(0) {
            return Err(Error::Config("users override must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone, Default)]
pub struct BenchConfig {
    pub pool: PoolConfig,
    pub trial: TrialConfig,
}

impl BenchConfig {
    pub fn new(pool: PoolConfig, trial: TrialConfig) -> Self {
        Self { pool, trial }
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.trial.validate()
    }
}
