//! Command-line arguments.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use querybench::config::{
    DEFAULT_FORKS, DEFAULT_MAX_CONNECTIONS, DEFAULT_MEASUREMENT_ITERATIONS,
    DEFAULT_MEASUREMENT_TIME_MS, DEFAULT_MIN_IDLE, DEFAULT_SEED, DEFAULT_WARMUP_ITERATIONS,
    DEFAULT_WARMUP_TIME_MS,
};
use querybench::{BackendKind, BenchConfig, PoolConfig, TrialConfig};

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Throughput comparison of sea-orm, sea-query and sqlx.
#[derive(Parser, Debug)]
#[command(name = "querybench")]
#[command(version, about = "Data-access library throughput comparison", long_about = None)]
pub struct Args {
    /// Run only scenarios whose name contains this text.
    pub filter: Option<String>,

    /// Backends to compare (repeatable). Defaults to all.
    #[arg(short, long = "backend")]
    pub backends: Vec<BackendKind>,

    /// List scenarios and exit.
    #[arg(long)]
    pub list: bool,

    /// Warm-up iterations per trial.
    #[arg(long, default_value_t = DEFAULT_WARMUP_ITERATIONS)]
    pub warmup_iterations: u32,

    /// Length of each warm-up iteration in milliseconds.
    #[arg(long, default_value_t = DEFAULT_WARMUP_TIME_MS)]
    pub warmup_ms: u64,

    /// Measured iterations per trial.
    #[arg(short = 'i', long, default_value_t = DEFAULT_MEASUREMENT_ITERATIONS)]
    pub iterations: u32,

    /// Length of each measured iteration in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MEASUREMENT_TIME_MS)]
    pub measurement_ms: u64,

    /// Worker processes (0 = run in this process).
    #[arg(short, long, default_value_t = DEFAULT_FORKS)]
    pub forks: u32,

    /// Worker threads. Only 1 is supported.
    #[arg(short, long, default_value_t = 1)]
    pub threads: u32,

    /// Seed for fixture identities and inserted rows.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Override the user count of read scenarios.
    #[arg(long)]
    pub users: Option<usize>,

    /// Database file. Defaults to a temporary file per process.
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Schema script replacing the bundled one.
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Maximum pooled connections.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// Connections kept open when idle.
    #[arg(long, default_value_t = DEFAULT_MIN_IDLE)]
    pub min_idle: u32,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Run in-process and write JSON reports to stdout.
    #[arg(long, hide = true)]
    pub fork_worker: bool,
}

impl Args {
    /// Backends selected on the command line, all of them when none are.
    pub fn selected_backends(&self) -> Vec<BackendKind> {
        if self.backends.is_empty() {
            BackendKind::ALL.to_vec()
        } else {
            let mut kinds: Vec<BackendKind> = Vec::with_capacity(self.backends.len());
            for kind in &self.backends {
                if !kinds.contains(kind) {
                    kinds.push(*kind);
                }
            }
            kinds
        }
    }

    /// Convert command-line arguments to harness configuration.
    pub fn into_config(self) -> BenchConfig {
        let mut pool = PoolConfig::new()
            .with_max_connections(self.max_connections)
            .with_min_idle(self.min_idle);
        if let Some(path) = self.database {
            pool = pool.with_database_path(path);
        }
        if let Some(path) = self.schema {
            pool = pool.with_schema_path(path);
        }

        let mut trial = TrialConfig::new()
            .with_warmup(self.warmup_iterations, Duration::from_millis(self.warmup_ms))
            .with_measurement(self.iterations, Duration::from_millis(self.measurement_ms))
            .with_forks(self.forks)
            .with_threads(self.threads)
            .with_seed(self.seed);
        if let Some(users) = self.users {
            trial = trial.with_users(users);
        }

        BenchConfig::new(pool, trial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["querybench"]).unwrap();
        assert!(args.filter.is_none());
        assert_eq!(args.selected_backends(), BackendKind::ALL.to_vec());
        assert_eq!(args.format, OutputFormat::Table);

        let config = args.into_config();
        assert_eq!(config.trial, TrialConfig::new());
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.pool.min_idle, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "querybench",
            "insert/",
            "--backend",
            "sea-orm",
            "-b",
            "sqlx-session",
            "-i",
            "2",
            "--measurement-ms",
            "100",
            "--forks",
            "0",
            "--users",
            "50",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.filter.as_deref(), Some("insert/"));
        assert_eq!(
            args.selected_backends(),
            vec![BackendKind::SeaOrm, BackendKind::SqlxSession]
        );
        assert_eq!(args.format, OutputFormat::Json);

        let config = args.into_config();
        assert_eq!(config.trial.measurement_iterations, 2);
        assert_eq!(config.trial.measurement_time, Duration::from_millis(100));
        assert_eq!(config.trial.forks, 0);
        assert_eq!(config.trial.users_override, Some(50));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Args::try_parse_from(["querybench", "--backend", "diesel"]).is_err());
    }

    #[test]
    fn test_repeated_backends_run_once() {
        let args = Args::try_parse_from([
            "querybench",
            "-b",
            "sea-orm",
            "-b",
            "sea-query",
            "-b",
            "sea-orm",
        ])
        .unwrap();
        assert_eq!(
            args.selected_backends(),
            vec![BackendKind::SeaOrm, BackendKind::SeaQuery]
        );
    }

    #[test]
    fn test_threads_fail_validation() {
        let args = Args::try_parse_from(["querybench", "--threads", "4"]).unwrap();
        assert!(args.into_config().validate().is_err());
    }

    #[test]
    fn test_zero_users_fail_validation() {
        let args = Args::try_parse_from(["querybench", "--users", "0"]).unwrap();
        assert!(args.into_config().validate().is_err());
    }
}
