//! Measurement samples and their aggregation into reports.

use std::time::Duration;

use comfy_table::{Cell, CellAlignment, Table};
use serde::{Deserialize, Serialize};

use crate::backends::BackendKind;
use crate::error::Result;

/// Throughput unit of every score.
pub const UNITS: &str = "ops/s";

/// One measured iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSample {
    pub iteration: u32,
    /// Operations completed inside the window.
    pub operations: u64,
    pub elapsed: Duration,
    /// Set when an operation failed; the sample is then excluded.
    pub error: Option<String>,
}

impl IterationSample {
    pub fn completed(iteration: u32, operations: u64, elapsed: Duration) -> Self {
        Self {
            iteration,
            operations,
            elapsed,
            error: None,
        }
    }

    pub fn failed(iteration: u32, operations: u64, elapsed: Duration, error: String) -> Self {
        Self {
            iteration,
            operations,
            elapsed,
            error: Some(error),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none() && !self.elapsed.is_zero()
    }

    /// Operations per second, for valid samples.
    pub fn throughput(&self) -> Option<f64> {
        if self.is_valid() {
            Some(self.operations as f64 / self.elapsed.as_secs_f64())
        } else {
            None
        }
    }
}

/// Aggregate of one backend's samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Mean throughput over valid samples.
    pub score: Option<f64>,
    /// Sample standard deviation; needs two valid samples.
    pub error: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub valid: usize,
    pub failed: usize,
}

impl Summary {
    pub fn of(samples: &[IterationSample]) -> Self {
        let values: Vec<f64> = samples.iter().filter_map(IterationSample::throughput).collect();
        let failed = samples.len() - values.len();
        if values.is_empty() {
            return Self {
                score: None,
                error: None,
                min: None,
                max: None,
                valid: 0,
                failed,
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let error = (values.len() > 1).then(|| {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        });

        Self {
            score: Some(mean),
            error,
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            valid: values.len(),
            failed,
        }
    }
}

/// Samples of one backend for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResult {
    pub backend: BackendKind,
    pub samples: Vec<IterationSample>,
}

impl BackendResult {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            samples: Vec::new(),
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.samples)
    }
}

/// Results of one scenario across backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub results: Vec<BackendResult>,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            results: Vec::new(),
        }
    }

    pub fn result(&self, backend: BackendKind) -> Option<&BackendResult> {
        self.results.iter().find(|r| r.backend == backend)
    }

    /// Append another run's samples, backend by backend.
    pub fn merge(&mut self, other: ScenarioReport) {
        for result in other.results {
            match self.results.iter_mut().find(|r| r.backend == result.backend) {
                Some(existing) => existing.samples.extend(result.samples),
                None => self.results.push(result),
            }
        }
    }
}

/// Merge reports by scenario name, keeping first-seen order.
pub fn merge_reports(into: &mut Vec<ScenarioReport>, reports: Vec<ScenarioReport>) {
    for report in reports {
        match into.iter_mut().find(|r| r.scenario == report.scenario) {
            Some(existing) => existing.merge(report),
            None => into.push(report),
        }
    }
}

fn format_number(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_default()
}

/// Render reports as a table, one row per scenario and backend.
pub fn render_table(reports: &[ScenarioReport]) -> String {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Benchmark"),
        Cell::new("Backend"),
        Cell::new("Cnt"),
        Cell::new("Score"),
        Cell::new("Error"),
        Cell::new("Units"),
    ]);

    for report in reports {
        for result in &report.results {
            let summary = result.summary();
            let count = if summary.failed > 0 {
                format!("{} ({} failed)", summary.valid, summary.failed)
            } else {
                summary.valid.to_string()
            };
            let error = summary
                .error
                .map(|e| format!("± {:.3}", e))
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(&report.scenario),
                Cell::new(result.backend),
                Cell::new(count).set_alignment(CellAlignment::Right),
                Cell::new(format_number(summary.score)).set_alignment(CellAlignment::Right),
                Cell::new(error).set_alignment(CellAlignment::Right),
                Cell::new(UNITS),
            ]);
        }
    }

    table.to_string()
}

/// Render reports as pretty JSON, summaries included.
pub fn to_json(reports: &[ScenarioReport]) -> Result<String> {
    let value: Vec<_> = reports
        .iter()
        .map(|report| {
            let results: Vec<_> = report
                .results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "backend": r.backend,
                        "summary": r.summary(),
                        "samples": r.samples,
                    })
                })
                .collect();
            serde_json::json!({
                "scenario": report.scenario,
                "units": UNITS,
                "results": results,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&value)?)
}
