//! Request orchestrator - the generate → select engine → test → retry loop
//!
//! One run takes a (model, project, prompt) triple through at most
//! `max_attempts` attempts. Each attempt asks the generator for code, picks an
//! engine by inspecting the text, and test-runs it. The first passing attempt
//! is saved to a fresh versioned directory and run once more for real, which
//! exports the geometry and fills in the metrics. Failed attempts feed their
//! code and error into the next prompt.
//!
//! Attempts are strictly sequential: each corrective prompt depends on the
//! previous attempt's error.

use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};

use crate::config::{BenchConfig, ModelSpec};
use crate::engine::{
    select_engine, truncate_head, EmbeddedEngine, EngineFailure, EngineKind, ExternalEngine,
};
use crate::generator::{compose_corrective_prompt, CodeGenerator, GenerationRequest, GeneratorError};
use crate::geometry::GeometryStats;
use crate::metrics::{
    ATTEMPTS, ATTEMPTS_PER_RUN, EMPTY_GENERATIONS, EXECUTION_DURATION, GENERATION_DURATION, RUNS,
};
use crate::record::{RunRecord, RunStatus};
use crate::store::{OutputError, OutputStore, ProjectDir, RecordSink};

/// Characters of an attempt error shown on the console
const CONSOLE_EXCERPT_CHARS: usize = 100;

/// An attempt that produced code; kept until the next one supersedes it
#[derive(Debug, Clone)]
pub struct Attempt {
    pub number: usize,
    pub code: String,
    pub engine: EngineKind,
    pub failure: EngineFailure,
}

/// Result of a run that reached a terminal status
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
    /// Directory of the accepted attempt, if any
    pub project_dir: Option<ProjectDir>,
}

/// Faults that end a run early
#[derive(Debug)]
pub enum OrchestratorError {
    /// Generator transport failure; the record was persisted as `API_ERROR`
    Generator {
        source: GeneratorError,
        record: Box<RunRecord>,
    },
    /// The accepted attempt could not be saved; the record was persisted as `EXEC_ERROR`
    Output {
        source: OutputError,
        record: Box<RunRecord>,
    },
}

impl OrchestratorError {
    pub fn record(&self) -> &RunRecord {
        match self {
            OrchestratorError::Generator { record, .. } => &**record,
            OrchestratorError::Output { record, .. } => &**record,
        }
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::Generator { source, .. } => write!(f, "Generator error: {}", source),
            OrchestratorError::Output { source, .. } => write!(f, "Output error: {}", source),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrchestratorError::Generator { source, .. } => Some(source),
            OrchestratorError::Output { source, .. } => Some(source),
        }
    }
}

pub struct RequestOrchestrator<G, S> {
    generator: G,
    sink: S,
    embedded: EmbeddedEngine,
    external: ExternalEngine,
    output: OutputStore,
    max_attempts: usize,
}

impl<G: CodeGenerator, S: RecordSink> RequestOrchestrator<G, S> {
    pub fn new(generator: G, sink: S, config: &BenchConfig) -> Self {
        let embedded = EmbeddedEngine::new(config.embedded.clone());
        Self {
            generator,
            sink,
            external: ExternalEngine::new(config.external.clone(), embedded.clone()),
            embedded,
            output: OutputStore::new(&config.output_dir),
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Drive one benchmark run to a terminal status and persist its record
    pub async fn run(
        &self,
        model: &ModelSpec,
        project: &str,
        prompt: &str,
    ) -> Result<RunOutcome, OrchestratorError> {
        let mut record = RunRecord::new(&model.name, project, prompt);
        let trace_id = record.trace_id.clone();

        let run_span = info_span!(
            "benchmark_run",
            trace_id = %trace_id,
            model = %model.name,
            project = %project
        );

        async {
            info!(max_attempts = self.max_attempts, "starting run");
            println!("[RUN] {} / {} (trace {})", model.name, project, trace_id);

            record.reset_timing();
            let started = Instant::now();
            let mut last: Option<Attempt> = None;

            for number in 1..=self.max_attempts {
                record.attempts = number;
                println!("[ATTEMPT] {}/{}", number, self.max_attempts);

                let corrective = last
                    .as_ref()
                    .map(|prior| compose_corrective_prompt(prompt, &prior.code, &prior.failure.message()));
                let prior_error = last.as_ref().map(|prior| prior.failure.message());
                let request = GenerationRequest {
                    prompt: corrective.as_deref().unwrap_or(prompt),
                    model: &model.id,
                    prior_error: prior_error.as_deref(),
                    prior_code: last.as_ref().map(|prior| prior.code.as_str()),
                    attempt: number,
                };

                let call_start = Instant::now();
                let generated = self
                    .generator
                    .generate(request)
                    .instrument(info_span!("generate", attempt = number))
                    .await;
                GENERATION_DURATION
                    .with_label_values(&[&model.name])
                    .observe(call_start.elapsed().as_secs_f64());

                let code = match generated {
                    Ok(Some(code)) if !code.trim().is_empty() => code,
                    Ok(_) => {
                        EMPTY_GENERATIONS.inc();
                        warn!(attempt = number, "generator returned no code");
                        println!("[ATTEMPT] Generator returned empty code, retrying");
                        continue;
                    }
                    Err(source) => {
                        crate::trace_log!(warn, trace_id, error = %source, "generator transport failure, aborting run");
                        println!("[RUN] API error: {}", source);
                        record.set_generation_time(started.elapsed().as_secs_f64());
                        record.mark_failure(RunStatus::ApiError, source.to_string());
                        self.finalize(&record).await;
                        return Err(OrchestratorError::Generator {
                            source,
                            record: Box::new(record),
                        });
                    }
                };

                let engine = select_engine(&code);
                record.engine = Some(engine.name().to_string());
                println!("[ATTEMPT] Code generated, testing with {}", engine);

                match self
                    .test_attempt(engine, &code)
                    .instrument(info_span!("test_attempt", attempt = number, engine = %engine))
                    .await
                {
                    Ok(()) => {
                        ATTEMPTS.with_label_values(&[engine.name(), RunStatus::Success.as_str()]).inc();
                        record.set_generation_time(started.elapsed().as_secs_f64());
                        info!(attempt = number, engine = %engine, "test passed");
                        println!("[ATTEMPT] Test passed, code accepted");
                        let project_dir = self.accept(&mut record, engine, &code).await?;
                        self.finalize(&record).await;
                        return Ok(RunOutcome {
                            record,
                            project_dir: Some(project_dir),
                        });
                    }
                    Err(failure) => {
                        ATTEMPTS.with_label_values(&[engine.name(), failure.status().as_str()]).inc();
                        warn!(attempt = number, status = %failure.status(), "test failed");
                        println!(
                            "[ATTEMPT] Test failed ({}): {}",
                            failure.status(),
                            truncate_head(&failure.message(), CONSOLE_EXCERPT_CHARS)
                        );
                        last = Some(Attempt {
                            number,
                            code,
                            engine,
                            failure,
                        });
                    }
                }
            }

            match &last {
                Some(attempt) => {
                    warn!(
                        last_attempt = attempt.number,
                        engine = %attempt.engine,
                        status = %attempt.failure.status(),
                        "attempt budget exhausted"
                    );
                    println!(
                        "[RUN] Max attempts reached, last failure from attempt {} ({})",
                        attempt.number, attempt.engine
                    );
                    record.mark_failure(RunStatus::FailedRetries, attempt.failure.message());
                }
                None => {
                    println!("[RUN] Generator never produced code");
                    record.mark_failure(
                        RunStatus::GenerationFail,
                        format!("generator returned no code in {} attempts", self.max_attempts),
                    );
                }
            }
            self.finalize(&record).await;
            Ok(RunOutcome {
                record,
                project_dir: None,
            })
        }
        .instrument(run_span)
        .await
    }

    /// Test-mode run: pass/fail only, nothing kept
    async fn test_attempt(&self, engine: EngineKind, code: &str) -> Result<(), EngineFailure> {
        let started = Instant::now();
        let result = match engine {
            EngineKind::Embedded => self.embedded.test(code),
            EngineKind::External => self.external.test(code).await,
        };
        EXECUTION_DURATION
            .with_label_values(&[engine.name(), "test"])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    /// Save the accepted code and run it for real; the record takes the final run's outcome
    async fn accept(
        &self,
        record: &mut RunRecord,
        engine: EngineKind,
        code: &str,
    ) -> Result<ProjectDir, OrchestratorError> {
        record.code_lines = code.lines().count();

        let saved = self
            .output
            .create_project_dir(&record.model, &record.project_name)
            .and_then(|dir| {
                self.output
                    .save_script(&dir, engine, &record.model, &record.prompt, code)
                    .map(|script| (dir, script))
            });
        let (dir, script_path) = match saved {
            Ok(saved) => saved,
            Err(source) => {
                warn!(error = %source, "cannot save accepted code");
                record.mark_failure(RunStatus::ExecError, source.to_string());
                self.finalize(record).await;
                return Err(OrchestratorError::Output {
                    source,
                    record: Box::new(record.clone()),
                });
            }
        };

        let export_path = dir.export_path();
        let started = Instant::now();
        let result: Result<GeometryStats, EngineFailure> = match engine {
            EngineKind::Embedded => self.embedded.execute(code, &export_path),
            EngineKind::External => self.external.execute(&script_path, &export_path).await,
        };
        let elapsed = started.elapsed().as_secs_f64();
        record.set_execution_time(elapsed);
        EXECUTION_DURATION
            .with_label_values(&[engine.name(), "final"])
            .observe(elapsed);

        match result {
            Ok(stats) => {
                info!(volume = stats.volume, faces = stats.face_count, dir = %dir.path.display(), "final run succeeded");
                println!(
                    "[RUN] Exported {} (volume {:.2} mm³, {} faces)",
                    export_path.display(),
                    stats.volume,
                    stats.face_count
                );
                record.mark_success(stats);
            }
            Err(failure) => {
                warn!(status = %failure.status(), "final run failed after a passing test");
                println!("[RUN] Final run failed: {}", failure);
                record.mark_failure(failure.status(), failure.message());
            }
        }
        Ok(dir)
    }

    /// Record metrics and hand the record to the sink; sink failures never end the run
    async fn finalize(&self, record: &RunRecord) {
        RUNS.with_label_values(&[&record.model, record.status.as_str()]).inc();
        ATTEMPTS_PER_RUN.observe(record.attempts as f64);

        if let Err(e) = self.sink.persist(record).await {
            warn!(error = %e, trace_id = %record.trace_id, "run record not persisted");
        }
        info!(status = %record.status, attempts = record.attempts, "run finished");
        println!("[RUN] Finished with status {}", record.status);
    }
}
