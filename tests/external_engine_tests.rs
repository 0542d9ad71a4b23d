//! Integration tests for the external engine
//!
//! `/bin/sh` scripts stand in for the FreeCAD command-line tool: the engine
//! runs `/bin/sh <stub> <wrapper.py>` with the export path in
//! `CADBENCH_EXPORT_PATH`, so each stub decides what the "modeler" does.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use cadbench::config::{BenchConfig, ModelSpec};
use cadbench::engine::external::ExternalEngine;
use cadbench::engine::{EmbeddedEngine, EngineFailure, ExternalToolConfig};
use cadbench::generator::{CodeGenerator, GenerationRequest, GeneratorError};
use cadbench::orchestrator::RequestOrchestrator;
use cadbench::record::RunStatus;
use cadbench::store::MemorySink;

const FREECAD_SOURCE: &str = "import FreeCAD, Part\ndoc = FreeCAD.newDocument()\ndoc.addObject(\"Part::Feature\", \"Box\").Shape = Part.makeBox(10, 20, 30)\n";

struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("cadbench-ext-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write a `/bin/sh` stub and an engine that runs it
    fn engine(&self, stub_body: &str, timeout_secs: u64) -> ExternalEngine {
        let stub = self.path("modeler.sh");
        std::fs::write(&stub, stub_body).unwrap();
        ExternalEngine::new(
            ExternalToolConfig {
                program: "/bin/sh".to_string(),
                args: vec![stub.to_string_lossy().into_owned()],
                timeout_secs,
                log_tail_chars: 300,
            },
            EmbeddedEngine::default(),
        )
    }

    /// A 10 x 20 x 30 box exported by the embedded engine
    fn box_fixture(&self) -> PathBuf {
        let path = self.path("fixture.stl");
        EmbeddedEngine::default()
            .execute("result = box(10, 20, 30)", &path)
            .unwrap();
        path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

fn copying_stub(fixture: &Path) -> String {
    format!(
        "cp \"{}\" \"$CADBENCH_EXPORT_PATH\"\necho \"FREECAD_SUCCESS: export completed.\"\n",
        fixture.display()
    )
}

#[tokio::test]
async fn test_success_reimports_exported_file() {
    let ws = Workspace::new();
    let engine = ws.engine(&copying_stub(&ws.box_fixture()), 10);

    assert_eq!(engine.test(FREECAD_SOURCE).await, Ok(()));

    let script = ws.path("part.py");
    std::fs::write(&script, FREECAD_SOURCE).unwrap();
    let export = ws.path("part.stl");
    let stats = engine.execute(&script, &export).await.unwrap();

    assert!((stats.volume - 6000.0).abs() < 1e-6);
    assert_eq!(stats.face_count, 6);
    assert!(export.is_file());
    assert!(ws.path("part_wrapper.py").is_file());
}

#[tokio::test]
async fn test_wrapper_carries_source_and_footer() {
    let ws = Workspace::new();
    let seen = ws.path("seen_wrapper.py");
    let stub = format!("cat \"$1\" > \"{}\"\n", seen.display());
    let engine = ws.engine(&stub, 10);

    let script = ws.path("part.py");
    std::fs::write(&script, FREECAD_SOURCE).unwrap();
    let result = engine.execute(&script, &ws.path("part.stl")).await;

    assert!(matches!(result, Err(EngineFailure::Exec(_))));
    let wrapper = std::fs::read_to_string(&seen).unwrap();
    assert!(wrapper.starts_with(FREECAD_SOURCE));
    assert!(wrapper.contains("Objects[-1]"));
    assert!(wrapper.contains("FREECAD_SUCCESS"));
}

#[tokio::test]
async fn test_sentinel_without_file_is_exec_error_with_log_tail() {
    let ws = Workspace::new();
    let stub = "i=0\nwhile [ $i -lt 100 ]; do echo \"traceback line $i\"; i=$((i+1)); done\necho FREECAD_SUCCESS\n";
    let engine = ws.engine(stub, 10);

    match engine.test(FREECAD_SOURCE).await {
        Err(EngineFailure::Exec(log)) => {
            assert!(log.chars().count() <= 300, "log tail too long: {}", log.len());
            assert!(log.ends_with("FREECAD_SUCCESS"));
            assert!(!log.contains("traceback line 0\n"));
        }
        other => panic!("expected exec error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_sentinel_is_exec_error() {
    let ws = Workspace::new();
    let stub = "echo \"FREECAD_ERROR: no valid object in the document.\"\nexit 1\n";
    let engine = ws.engine(stub, 10);

    match engine.test(FREECAD_SOURCE).await {
        Err(EngineFailure::Exec(log)) => assert!(log.contains("no valid object")),
        other => panic!("expected exec error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_flat_export_is_empty_geometry() {
    let ws = Workspace::new();
    let flat = ws.path("flat.stl");
    std::fs::write(
        &flat,
        "solid flat\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nvertex 0 1 0\nendloop\nendfacet\nendsolid flat\n",
    )
    .unwrap();
    let engine = ws.engine(&copying_stub(&flat), 10);

    assert_eq!(engine.test(FREECAD_SOURCE).await, Err(EngineFailure::EmptyGeometry));
}

#[tokio::test]
async fn test_unreadable_export_is_analysis_fail() {
    let ws = Workspace::new();
    let stub = "echo 'ISO-10303-21;' > \"$CADBENCH_EXPORT_PATH\"\necho FREECAD_SUCCESS\n";
    let engine = ws.engine(stub, 10);

    assert!(matches!(
        engine.test(FREECAD_SOURCE).await,
        Err(EngineFailure::AnalysisFail(_))
    ));
}

#[tokio::test]
async fn test_timeout_kills_the_modeler() {
    let ws = Workspace::new();
    let pid_file = ws.path("modeler.pid");
    let stub = format!("echo $$ > \"{}\"\nexec sleep 30\n", pid_file.display());
    let engine = ws.engine(&stub, 1);

    let started = Instant::now();
    let result = engine.test(FREECAD_SOURCE).await;

    assert_eq!(result, Err(EngineFailure::Timeout(Duration::from_secs(1))));
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
    assert!(!pid.is_empty());
    #[cfg(target_os = "linux")]
    assert!(!process_alive(&pid), "modeler process {} still running", pid);
}

/// Whether `pid` is still a live (non-zombie) process
#[cfg(target_os = "linux")]
fn process_alive(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.trim_start().chars().next())
            .map(|state| state != 'Z' && state != 'X')
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_background_descendant_does_not_outlive_the_run() {
    let ws = Workspace::new();
    let pid_file = ws.path("background.pid");
    let stub = format!(
        "sleep 15 &\necho $! > \"{}\"\necho FREECAD_SUCCESS\n",
        pid_file.display()
    );
    let engine = ws.engine(&stub, 1);

    let started = Instant::now();
    let result = engine.test(FREECAD_SOURCE).await;

    assert!(
        started.elapsed() < Duration::from_secs(5),
        "run took {:?}",
        started.elapsed()
    );
    match result {
        Err(EngineFailure::Exec(log)) => assert!(log.contains("FREECAD_SUCCESS")),
        Err(EngineFailure::Timeout(limit)) => assert_eq!(limit, Duration::from_secs(1)),
        other => panic!("expected exec error or timeout, got {:?}", other),
    }

    let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
    assert!(!pid.is_empty());
    #[cfg(target_os = "linux")]
    {
        let deadline = Instant::now() + Duration::from_secs(2);
        while process_alive(&pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!process_alive(&pid), "background process {} still running", pid);
    }
}

#[tokio::test]
async fn test_export_with_background_descendant_still_succeeds() {
    let ws = Workspace::new();
    let stub = format!("sleep 15 &\n{}", copying_stub(&ws.box_fixture()));
    let engine = ws.engine(&stub, 10);

    let started = Instant::now();
    assert_eq!(engine.test(FREECAD_SOURCE).await, Ok(()));
    assert!(started.elapsed() < Duration::from_secs(5));
}

struct OneShotGenerator(&'static str);

#[async_trait]
impl CodeGenerator for OneShotGenerator {
    async fn generate(&self, _request: GenerationRequest<'_>) -> Result<Option<String>, GeneratorError> {
        Ok(Some(self.0.to_string()))
    }
}

#[tokio::test]
async fn test_orchestrated_run_through_external_engine() {
    let ws = Workspace::new();
    let stub = ws.path("modeler.sh");
    std::fs::write(&stub, copying_stub(&ws.box_fixture())).unwrap();

    let config = BenchConfig {
        output_dir: ws.path("output"),
        external: ExternalToolConfig {
            program: "/bin/sh".to_string(),
            args: vec![stub.to_string_lossy().into_owned()],
            ..ExternalToolConfig::default()
        },
        ..BenchConfig::default()
    };
    let orch = RequestOrchestrator::new(OneShotGenerator(FREECAD_SOURCE), MemorySink::new(), &config);

    let outcome = orch
        .run(&ModelSpec::new("stub", "stub"), "block", "a 10x20x30 block")
        .await
        .unwrap();

    assert_eq!(outcome.record.status, RunStatus::Success);
    assert_eq!(outcome.record.engine.as_deref(), Some("FreeCAD"));
    assert_eq!(outcome.record.volume_mm3, 6000.0);
    assert_eq!(outcome.record.faces_count, 6);

    let dir = outcome.project_dir.unwrap();
    assert!(dir.path.join("block.py").is_file());
    assert!(dir.path.join("block.stl").is_file());
}
