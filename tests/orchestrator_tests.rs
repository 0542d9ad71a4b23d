//! Integration tests for the request orchestrator
//!
//! A scripted generator stands in for the model server, and records go to an
//! in-memory sink, so the retry loop runs end to end against the embedded engine.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use cadbench::config::{BenchConfig, ModelSpec};
use cadbench::generator::{CodeGenerator, GenerationRequest, GeneratorError};
use cadbench::orchestrator::{OrchestratorError, RequestOrchestrator};
use cadbench::record::RunStatus;
use cadbench::store::MemorySink;

#[derive(Clone, Copy)]
enum Reply {
    Code(&'static str),
    Empty,
    TransportFailure,
}

/// What the orchestrator sent on one call
#[derive(Debug, Clone)]
struct SeenRequest {
    prompt: String,
    model: String,
    prior_error: Option<String>,
    prior_code: Option<String>,
    attempt: usize,
}

struct ScriptedGenerator {
    replies: Vec<Reply>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedGenerator {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Option<String>, GeneratorError> {
        let mut seen = self.seen.lock().unwrap();
        let reply = self.replies[seen.len().min(self.replies.len() - 1)];
        seen.push(SeenRequest {
            prompt: request.prompt.to_string(),
            model: request.model.to_string(),
            prior_error: request.prior_error.map(str::to_string),
            prior_code: request.prior_code.map(str::to_string),
            attempt: request.attempt,
        });
        match reply {
            Reply::Code(code) => Ok(Some(code.to_string())),
            Reply::Empty => Ok(None),
            Reply::TransportFailure => Err(GeneratorError::Http {
                status: 503,
                body: "model server unavailable".to_string(),
            }),
        }
    }
}

fn temp_output() -> PathBuf {
    std::env::temp_dir().join(format!("cadbench-orch-{}", uuid::Uuid::now_v7()))
}

fn orchestrator(
    replies: Vec<Reply>,
    output_dir: &PathBuf,
) -> RequestOrchestrator<ScriptedGenerator, MemorySink> {
    let config = BenchConfig {
        output_dir: output_dir.clone(),
        ..BenchConfig::default()
    };
    RequestOrchestrator::new(ScriptedGenerator::new(replies), MemorySink::new(), &config)
}

fn model() -> ModelSpec {
    ModelSpec::new("stub-model", "stub-model:latest")
}

const ZERO_VOLUME: &str = "result = box(10, 0, 10)";
const CUBE: &str = "result = box(10, 10, 10)";

#[tokio::test]
async fn test_zero_volume_exhausts_attempts() {
    let out = temp_output();
    let orch = orchestrator(vec![Reply::Code(ZERO_VOLUME)], &out);

    let outcome = orch.run(&model(), "plate", "a flat plate").await.unwrap();

    assert_eq!(orch.generator().seen().len(), 3);
    assert_eq!(outcome.record.status, RunStatus::FailedRetries);
    assert_eq!(outcome.record.error_log, "geometry volume is zero");
    assert_eq!(outcome.record.attempts, 3);
    assert_eq!(outcome.record.volume_mm3, 0.0);
    assert_eq!(outcome.record.faces_count, 0);
    assert!(outcome.project_dir.is_none());
    assert!(!out.join("stub-model").exists());

    let persisted = orch.sink().records();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].status, RunStatus::FailedRetries);
}

#[tokio::test]
async fn test_success_on_second_attempt_after_correction() {
    let out = temp_output();
    let orch = orchestrator(vec![Reply::Code(ZERO_VOLUME), Reply::Code(CUBE)], &out);

    let outcome = orch.run(&model(), "cube", "a 10mm cube").await.unwrap();
    let record = &outcome.record;

    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.volume_mm3, 1000.0);
    assert_eq!(record.faces_count, 6);
    assert_eq!(record.engine.as_deref(), Some("CadScript"));
    assert_eq!(record.code_lines, 1);
    assert!(record.error_log.is_empty());

    let seen = orch.generator().seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].prompt, "a 10mm cube");
    assert_eq!(seen[0].model, "stub-model:latest");
    assert!(seen[0].prior_error.is_none());
    assert!(seen[1].prompt.contains(ZERO_VOLUME));
    assert!(seen[1].prompt.contains("geometry volume is zero"));
    assert_eq!(seen[1].prior_code.as_deref(), Some(ZERO_VOLUME));
    assert_eq!(seen[1].prior_error.as_deref(), Some("geometry volume is zero"));
    assert_eq!(seen[1].attempt, 2);

    let dir = outcome.project_dir.expect("accepted run has a project dir");
    assert_eq!(dir.path, out.join("stub-model").join("cube_v1"));
    assert!(dir.path.join("cube.cad").is_file());
    assert!(dir.path.join("cube.stl").is_file());

    std::fs::remove_dir_all(out).ok();
}

#[tokio::test]
async fn test_repeated_project_gets_next_version() {
    let out = temp_output();
    let orch = orchestrator(vec![Reply::Code(CUBE)], &out);

    orch.run(&model(), "cube", "a cube").await.unwrap();
    let second = orch.run(&model(), "cube", "a cube").await.unwrap();

    assert_eq!(second.project_dir.unwrap().version, 2);
    assert_eq!(orch.sink().records().len(), 2);
    std::fs::remove_dir_all(out).ok();
}

#[tokio::test]
async fn test_transport_failure_is_fatal_and_persisted() {
    let out = temp_output();
    let orch = orchestrator(vec![Reply::TransportFailure], &out);

    let err = orch.run(&model(), "cube", "a cube").await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Generator { .. }));
    assert_eq!(err.record().status, RunStatus::ApiError);
    assert!(err.record().error_log.contains("503"));
    assert_eq!(orch.generator().seen().len(), 1);

    let persisted = orch.sink().records();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].status, RunStatus::ApiError);
}

#[tokio::test]
async fn test_transport_failure_after_failed_attempt_stops_retrying() {
    let out = temp_output();
    let orch = orchestrator(vec![Reply::Code(ZERO_VOLUME), Reply::TransportFailure], &out);

    let err = orch.run(&model(), "cube", "a cube").await.unwrap_err();

    assert_eq!(err.record().status, RunStatus::ApiError);
    assert_eq!(err.record().attempts, 2);
    assert_eq!(orch.generator().seen().len(), 2);
}

#[tokio::test]
async fn test_empty_generations_end_in_generation_fail() {
    let out = temp_output();
    let orch = orchestrator(vec![Reply::Empty], &out);

    let outcome = orch.run(&model(), "cube", "a cube").await.unwrap();

    assert_eq!(outcome.record.status, RunStatus::GenerationFail);
    assert_eq!(outcome.record.attempts, 3);
    assert!(outcome.record.engine.is_none());
    let seen = orch.generator().seen();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|request| request.prior_error.is_none()));
}

#[tokio::test]
async fn test_correction_refers_to_last_attempt_with_code() {
    let out = temp_output();
    let missing_result = "shape = box(10, 10, 10)";
    let orch = orchestrator(
        vec![Reply::Code(missing_result), Reply::Empty, Reply::Code(CUBE)],
        &out,
    );

    let outcome = orch.run(&model(), "cube", "a cube").await.unwrap();

    assert_eq!(outcome.record.status, RunStatus::Success);
    assert_eq!(outcome.record.attempts, 3);
    let seen = orch.generator().seen();
    assert_eq!(seen[2].prior_code.as_deref(), Some(missing_result));
    assert!(seen[2]
        .prior_error
        .as_deref()
        .unwrap()
        .contains("missing 'result' binding"));
    std::fs::remove_dir_all(out).ok();
}

#[tokio::test]
async fn test_last_error_wins_after_mixed_failures() {
    let out = temp_output();
    let orch = orchestrator(
        vec![
            Reply::Code("result = box(10, 10)"),
            Reply::Code("shape = box(1, 1, 1)"),
            Reply::Code(ZERO_VOLUME),
        ],
        &out,
    );

    let outcome = orch.run(&model(), "cube", "a cube").await.unwrap();

    assert_eq!(outcome.record.status, RunStatus::FailedRetries);
    assert_eq!(outcome.record.error_log, "geometry volume is zero");
}

#[tokio::test]
async fn test_overflowing_volume_is_retried_not_accepted() {
    let out = temp_output();
    let huge = "x = 1000000000000000000000000000000\nd = x * x * x * x\nresult = box(d, d, d)";
    let orch = orchestrator(vec![Reply::Code(huge), Reply::Code(CUBE)], &out);

    let outcome = orch.run(&model(), "cube", "a cube").await.unwrap();

    assert_eq!(outcome.record.status, RunStatus::Success);
    assert_eq!(outcome.record.attempts, 2);
    assert_eq!(outcome.record.volume_mm3, 1000.0);
    let seen = orch.generator().seen();
    assert_eq!(seen[1].prior_error.as_deref(), Some("geometry volume is zero"));
    std::fs::remove_dir_all(out).ok();
}
