//! Run records - one accumulating outcome per (model, task) benchmark run
//!
//! A `RunRecord` starts in `RunStatus::Pending`, is mutated by the orchestrator
//! across attempts and receives exactly one terminal status before it is handed
//! to the persistence layer. Serialized field names match the columns of the
//! benchmark spreadsheet.

use serde::{Deserialize, Serialize};

use crate::geometry::GeometryStats;

/// Outcome of a run (terminal) or of a single attempt (recoverable variants)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Success,
    ExecError,
    NoResultVar,
    EmptyGeometry,
    AnalysisFail,
    Timeout,
    ApiError,
    GenerationFail,
    FailedRetries,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Success => "SUCCESS",
            RunStatus::ExecError => "EXEC_ERROR",
            RunStatus::NoResultVar => "NO_RESULT_VAR",
            RunStatus::EmptyGeometry => "EMPTY_GEOMETRY",
            RunStatus::AnalysisFail => "ANALYSIS_FAIL",
            RunStatus::Timeout => "TIMEOUT",
            RunStatus::ApiError => "API_ERROR",
            RunStatus::GenerationFail => "GENERATION_FAIL",
            RunStatus::FailedRetries => "FAILED_RETRIES",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated outcome and metrics of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "Project_Name")]
    pub project_name: String,
    #[serde(rename = "Prompt")]
    pub prompt: String,
    #[serde(rename = "Status")]
    pub status: RunStatus,
    /// Name of the engine that executed the accepted (or last) attempt
    #[serde(rename = "Library")]
    pub engine: Option<String>,
    #[serde(rename = "Gen_Time_s")]
    pub generation_time_s: f64,
    #[serde(rename = "Exec_Time_s")]
    pub execution_time_s: f64,
    #[serde(rename = "Volume_mm3")]
    pub volume_mm3: f64,
    #[serde(rename = "Faces_Count")]
    pub faces_count: usize,
    #[serde(rename = "Error_Log")]
    pub error_log: String,
    #[serde(rename = "Code_Lines")]
    pub code_lines: usize,
    #[serde(rename = "Attempts")]
    pub attempts: usize,
    #[serde(rename = "Trace_Id")]
    pub trace_id: String,
}

impl RunRecord {
    /// Create a pending record for a (model, project, prompt) triple
    pub fn new(
        model: impl Into<String>,
        project_name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            model: model.into(),
            project_name: project_name.into(),
            prompt: prompt.into(),
            status: RunStatus::Pending,
            engine: None,
            generation_time_s: 0.0,
            execution_time_s: 0.0,
            volume_mm3: 0.0,
            faces_count: 0,
            error_log: String::new(),
            code_lines: 0,
            attempts: 0,
            trace_id: uuid::Uuid::now_v7().to_string(),
        }
    }

    pub fn reset_timing(&mut self) {
        self.generation_time_s = 0.0;
        self.execution_time_s = 0.0;
    }

    /// Mark the run successful and store the validated geometry metrics
    pub fn mark_success(&mut self, stats: GeometryStats) {
        self.status = RunStatus::Success;
        self.volume_mm3 = round2(stats.volume);
        self.faces_count = stats.face_count;
        self.error_log.clear();
    }

    /// Mark the run failed with a terminal status; geometry metrics are cleared
    pub fn mark_failure(&mut self, status: RunStatus, error: impl Into<String>) {
        debug_assert!(status != RunStatus::Success && status.is_terminal());
        self.status = status;
        self.volume_mm3 = 0.0;
        self.faces_count = 0;
        self.error_log = error.into();
    }

    pub fn set_generation_time(&mut self, secs: f64) {
        self.generation_time_s = round2(secs);
    }

    pub fn set_execution_time(&mut self, secs: f64) {
        self.execution_time_s = round2(secs);
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
