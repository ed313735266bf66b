//! Forked worker processes.
//!
//! Each fork re-runs this executable with the same arguments plus
//! `--fork-worker`. Workers run in-process and print their reports as JSON on
//! stdout; logs go to stderr, which is inherited.

use std::process::{Command, Stdio};

use querybench::report::merge_reports;
use querybench::{Error, Result, ScenarioReport};

/// Flag marking a worker invocation.
pub const WORKER_FLAG: &str = "--fork-worker";

/// Run `forks` workers one after another and merge their reports.
pub fn run_forks(forks: u32) -> Result<Vec<ScenarioReport>> {
    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != WORKER_FLAG)
        .collect();

    let mut merged = Vec::new();
    for fork in 1..=forks {
        tracing::info!(fork, forks, "starting fork");
        let output = Command::new(&exe)
            .args(&args)
            .arg(WORKER_FLAG)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()?;

        if !output.status.success() {
            return Err(Error::Fork(format!(
                "fork {} exited with {}",
                fork, output.status
            )));
        }

        let reports = parse_worker_output(&output.stdout).map_err(|e| {
            Error::Fork(format!("fork {} produced unreadable output: {}", fork, e))
        })?;
        merge_reports(&mut merged, reports);
    }

    Ok(merged)
}

/// Decode a worker's stdout.
pub fn parse_worker_output(stdout: &[u8]) -> Result<Vec<ScenarioReport>> {
    Ok(serde_json::from_slice(stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_output() {
        let reports = vec![ScenarioReport::new("query/count")];
        let stdout = serde_json::to_vec(&reports).unwrap();
        assert_eq!(parse_worker_output(&stdout).unwrap(), reports);
        assert!(parse_worker_output(b"not json").is_err());
    }
}
