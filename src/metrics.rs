//! Prometheus metrics for benchmark runs
//!
//! Metrics live in the default registry; `gather_text()` renders them in the
//! text exposition format (printed by the CLI with `--metrics`).

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Run Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finalized runs by model and terminal status.
    ///
    /// Labels:
    /// - model: Generator model name
    /// - status: Terminal status (e.g., "SUCCESS", "FAILED_RETRIES")
    pub static ref RUNS: CounterVec = register_counter_vec!(
        "cadbench_runs_total",
        "Finalized benchmark runs by model and status",
        &["model", "status"]
    ).expect("failed to register RUNS metric");

    /// Test attempts by engine and outcome.
    ///
    /// Labels:
    /// - engine: "CadScript" or "FreeCAD"
    /// - outcome: "SUCCESS" or the failure status
    pub static ref ATTEMPTS: CounterVec = register_counter_vec!(
        "cadbench_attempts_total",
        "Test attempts by engine and outcome",
        &["engine", "outcome"]
    ).expect("failed to register ATTEMPTS metric");

    /// Generator calls that returned no usable code.
    pub static ref EMPTY_GENERATIONS: Counter = register_counter!(
        "cadbench_empty_generations_total",
        "Generator calls that returned no code"
    ).expect("failed to register EMPTY_GENERATIONS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Timing Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Duration of a single generator call.
    ///
    /// Labels:
    /// - model: Generator model name
    pub static ref GENERATION_DURATION: HistogramVec = register_histogram_vec!(
        "cadbench_generation_duration_seconds",
        "Duration of one code generation call",
        &["model"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register GENERATION_DURATION metric");

    /// Duration of an engine run.
    ///
    /// Labels:
    /// - engine: "CadScript" or "FreeCAD"
    /// - mode: "test" or "final"
    pub static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "cadbench_execution_duration_seconds",
        "Duration of one engine run",
        &["engine", "mode"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]
    ).expect("failed to register EXECUTION_DURATION metric");

    /// Attempts consumed per finalized run.
    pub static ref ATTEMPTS_PER_RUN: Histogram = register_histogram!(
        "cadbench_attempts_per_run",
        "Attempts consumed per finalized run",
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 10.0]
    ).expect("failed to register ATTEMPTS_PER_RUN metric");
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
