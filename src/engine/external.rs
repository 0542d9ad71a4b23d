//! External engine - runs generated scripts through an out-of-process modeler
//!
//! The modeler (FreeCAD's headless `freecadcmd` by default) cannot be driven
//! in-process, so each run goes through a wrapper script on disk:
//!
//! ```text
//! script.py ─► script_wrapper.py (source + export footer)
//!          ─► freecadcmd script_wrapper.py      (own process group, hard timeout)
//!          ─► FREECAD_SUCCESS + export file   ─► Embedded import ─► validator
//! ```
//!
//! Only the sentinel strings and the existence of the export file decide the
//! outcome; the exit code is not inspected.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{truncate_tail, EmbeddedEngine, EngineFailure, ERROR_EXCERPT_CHARS};
use crate::geometry::{analyze_geometry, has_positive_volume, GeometryStats};

/// Printed by the footer once the export call returned
pub const SUCCESS_SENTINEL: &str = "FREECAD_SUCCESS";
/// Printed by the footer when there is nothing to export or the export raised
pub const ERROR_SENTINEL: &str = "FREECAD_ERROR";
/// Environment variable carrying the export destination into the wrapper
pub const EXPORT_PATH_ENV: &str = "CADBENCH_EXPORT_PATH";

const FOOTER: &str = r#"

# --- cadbench export footer ---
import os as _cb_os
import sys as _cb_sys
import FreeCAD as _cb_FreeCAD
import Mesh as _cb_Mesh

try:
    _cb_doc = _cb_FreeCAD.ActiveDocument
    if not _cb_doc or not _cb_doc.Objects:
        print("FREECAD_ERROR: no valid object in the document.")
        _cb_sys.exit(1)
    _cb_obj = _cb_doc.Objects[-1]
    _cb_Mesh.export([_cb_obj], _cb_os.environ["CADBENCH_EXPORT_PATH"])
    print("FREECAD_SUCCESS: export completed.")
except Exception as _cb_exc:
    print("FREECAD_ERROR: %s" % _cb_exc)
    _cb_sys.exit(1)
"#;

/// How to launch the external modeler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalToolConfig {
    /// Executable to run
    pub program: String,
    /// Arguments placed before the wrapper script path
    pub args: Vec<String>,
    /// Hard wall-clock limit for one run
    pub timeout_secs: u64,
    /// Characters of combined output kept as the error log
    pub log_tail_chars: usize,
}

impl Default for ExternalToolConfig {
    fn default() -> Self {
        Self {
            program: "freecadcmd".to_string(),
            args: Vec::new(),
            timeout_secs: 60,
            log_tail_chars: 300,
        }
    }
}

impl ExternalToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Source plus the export footer, as written to the wrapper script
pub fn wrap_source(source: &str) -> String {
    let mut wrapped = String::with_capacity(source.len() + FOOTER.len() + 1);
    wrapped.push_str(source);
    if !source.ends_with('\n') {
        wrapped.push('\n');
    }
    wrapped.push_str(FOOTER);
    wrapped
}

/// `<dir>/<stem>_wrapper.py` for a script at `<dir>/<stem>.py`
pub fn wrapper_path(script_path: &Path) -> PathBuf {
    let stem = script_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("script");
    script_path.with_file_name(format!("{}_wrapper.py", stem))
}

pub struct ExternalEngine {
    config: ExternalToolConfig,
    importer: EmbeddedEngine,
}

impl ExternalEngine {
    pub fn new(config: ExternalToolConfig, importer: EmbeddedEngine) -> Self {
        Self { config, importer }
    }

    /// Run the script at `script_path` and export its last object to `export_path`.
    ///
    /// Returns the combined output on success. Any other outcome is an
    /// `Exec` failure carrying the tail of the log, or `Timeout`.
    pub async fn run_script(
        &self,
        script_path: &Path,
        export_path: &Path,
    ) -> Result<String, EngineFailure> {
        let source = tokio::fs::read_to_string(script_path).await.map_err(|e| {
            EngineFailure::Exec(format!("cannot read {}: {}", script_path.display(), e))
        })?;
        let wrapper = wrapper_path(script_path);
        tokio::fs::write(&wrapper, wrap_source(&source))
            .await
            .map_err(|e| EngineFailure::Exec(format!("cannot write {}: {}", wrapper.display(), e)))?;

        let log = self.spawn_and_wait(&wrapper, export_path).await?;

        if log.contains(SUCCESS_SENTINEL) && export_path.exists() {
            Ok(log)
        } else {
            if log.contains(ERROR_SENTINEL) {
                debug!(script = %script_path.display(), "external modeler reported an error");
            }
            let tail = truncate_tail(log.trim_end(), self.config.log_tail_chars);
            Err(EngineFailure::Exec(if tail.is_empty() {
                "external modeler exited without output".to_string()
            } else {
                tail
            }))
        }
    }

    async fn spawn_and_wait(&self, wrapper: &Path, export_path: &Path) -> Result<String, EngineFailure> {
        let limit = self.config.timeout();
        let started = Instant::now();

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(wrapper)
            .env(EXPORT_PATH_ENV, export_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineFailure::Exec(format!("failed to launch '{}': {}", self.config.program, e))
            })?;

        let pid = child.id();
        let mut stdout = capture(child.stdout.take());
        let mut stderr = capture(child.stderr.take());

        // The limit covers the whole run: the modeler exiting and both pipes
        // reaching EOF. A leftover descendant holding a pipe open counts as
        // still running.
        let finished = tokio::time::timeout(limit, async {
            let status = child.wait().await?;
            if let Some(pid) = pid {
                kill_group(pid);
            }
            let mut log = join_capture(&mut stdout).await;
            log.push_str(&join_capture(&mut stderr).await);
            Ok::<_, std::io::Error>((status, log))
        })
        .await;

        match finished {
            Ok(Ok((status, log))) => {
                debug!(
                    pid = ?pid,
                    exit = ?status.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "external modeler finished"
                );
                Ok(log)
            }
            Ok(Err(e)) => {
                stdout.abort();
                stderr.abort();
                Err(EngineFailure::Exec(format!("failed to wait for external modeler: {}", e)))
            }
            Err(_) => {
                warn!(pid = ?pid, timeout_secs = limit.as_secs(), "external modeler timed out, killing process group");
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                if let Ok(None) = child.try_wait() {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "kill after timeout failed, waiting for exit");
                        if let Err(e) = child.wait().await {
                            warn!(error = %e, "failed to reap external modeler");
                        }
                    }
                }
                stdout.abort();
                stderr.abort();
                Err(EngineFailure::Timeout(limit))
            }
        }
    }

    /// Quick check in a throwaway directory: run, re-import, require volume > 0
    pub async fn test(&self, source: &str) -> Result<(), EngineFailure> {
        let dir = std::env::temp_dir().join(format!("cadbench-{}", uuid::Uuid::now_v7()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineFailure::Exec(format!("cannot create {}: {}", dir.display(), e)))?;

        let outcome = self.test_in(&dir, source).await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "failed to remove test directory");
        }
        outcome
    }

    async fn test_in(&self, dir: &Path, source: &str) -> Result<(), EngineFailure> {
        let script_path = dir.join("attempt.py");
        let export_path = dir.join("attempt.stl");
        tokio::fs::write(&script_path, source)
            .await
            .map_err(|e| EngineFailure::Exec(format!("cannot write {}: {}", script_path.display(), e)))?;

        self.run_script(&script_path, &export_path).await?;

        let artifact = self
            .importer
            .import(&export_path)
            .map_err(|e| EngineFailure::AnalysisFail(e.to_string()).truncated(ERROR_EXCERPT_CHARS))?;
        if has_positive_volume(&artifact) {
            Ok(())
        } else {
            Err(EngineFailure::EmptyGeometry)
        }
    }

    /// Final run of a saved script: export next to it and compute full metrics
    pub async fn execute(
        &self,
        script_path: &Path,
        export_path: &Path,
    ) -> Result<GeometryStats, EngineFailure> {
        self.run_script(script_path, export_path).await?;

        let artifact = self
            .importer
            .import(export_path)
            .map_err(|e| EngineFailure::AnalysisFail(e.to_string()).truncated(ERROR_EXCERPT_CHARS))?;
        let stats = analyze_geometry(&artifact);
        if stats.is_valid() {
            Ok(stats)
        } else {
            Err(EngineFailure::EmptyGeometry)
        }
    }
}

fn capture<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!(error = %e, "output capture ended early");
            }
        }
        buf
    })
}

/// SIGKILL every process left in the modeler's group
fn kill_group(pid: u32) {
    // SAFETY: the child leads its own process group (process_group(0)), so the
    // group id equals its pid and only the modeler and its descendants are
    // signalled.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

async fn join_capture(handle: &mut JoinHandle<Vec<u8>>) -> String {
    match handle.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_keeps_source_and_appends_footer() {
        let source = "import FreeCAD\ndoc = FreeCAD.newDocument()";
        let wrapped = wrap_source(source);
        assert!(wrapped.starts_with(source));
        assert!(wrapped.contains("doc = FreeCAD.newDocument()\n\n# --- cadbench export footer ---"));
        assert!(wrapped.contains("Objects[-1]"));
        assert!(wrapped.contains(SUCCESS_SENTINEL));
        assert!(wrapped.contains(ERROR_SENTINEL));
        assert!(wrapped.contains(EXPORT_PATH_ENV));
    }

    #[test]
    fn test_wrapper_path_sits_next_to_script() {
        assert_eq!(
            wrapper_path(Path::new("/out/model/part_v1/part.py")),
            PathBuf::from("/out/model/part_v1/part_wrapper.py")
        );
    }

    #[test]
    fn test_default_config() {
        let config = ExternalToolConfig::default();
        assert_eq!(config.program, "freecadcmd");
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.log_tail_chars, 300);
    }

    #[tokio::test]
    async fn test_missing_program_is_exec_error() {
        let engine = ExternalEngine::new(
            ExternalToolConfig {
                program: "/nonexistent/cadbench-modeler".to_string(),
                ..ExternalToolConfig::default()
            },
            EmbeddedEngine::default(),
        );
        match engine.test("import FreeCAD").await {
            Err(EngineFailure::Exec(message)) => assert!(message.contains("failed to launch")),
            other => panic!("expected exec error, got {:?}", other),
        }
    }
}
