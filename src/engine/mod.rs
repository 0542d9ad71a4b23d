//! Execution engines for generated CAD programs
//!
//! Two structurally different strategies turn source text into an artifact:
//!
//! ```text
//! source ─► select_engine ─┬─► Embedded  (in-process interpreter, fresh scope)
//!                          │        └─► Artifact ─► validator
//!                          └─► External  (FreeCAD subprocess + timeout)
//!                                   └─► STL on disk ─► Embedded import ─► validator
//! ```
//!
//! Every fault an engine can hit is translated into an `EngineFailure`; no raw
//! error crosses the engine boundary.

pub mod embedded;
pub mod external;
pub mod script;

use std::time::Duration;

use crate::record::RunStatus;

pub use embedded::{EmbeddedEngine, EmbeddedLimits, RESULT_BINDING};
pub use external::{ExternalEngine, ExternalToolConfig};

/// Identifier substrings that mark source written for the external modeler
const EXTERNAL_MARKERS: [&str; 2] = ["import FreeCAD", "import Part"];

/// Maximum length of an error excerpt carried between attempts
pub const ERROR_EXCERPT_CHARS: usize = 500;

/// Which execution strategy handles a piece of generated source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Embedded,
    External,
}

impl EngineKind {
    /// Name recorded in the run record
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Embedded => "CadScript",
            EngineKind::External => "FreeCAD",
        }
    }

    /// File extension of the saved script
    pub fn script_extension(&self) -> &'static str {
        match self {
            EngineKind::Embedded => "cad",
            EngineKind::External => "py",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify generated source by text inspection alone.
///
/// Marker substrings inside comments or strings still select the external
/// engine; no parsing is attempted.
pub fn select_engine(source: &str) -> EngineKind {
    if EXTERNAL_MARKERS.iter().any(|marker| source.contains(marker)) {
        EngineKind::External
    } else {
        EngineKind::Embedded
    }
}

/// Recoverable, per-attempt failure of an execution engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineFailure {
    /// Evaluation or the external process failed
    Exec(String),
    /// Program finished without binding `result`
    NoResultVar,
    /// Artifact has zero (or no) volume
    EmptyGeometry,
    /// External export succeeded but the file could not be re-imported
    AnalysisFail(String),
    /// External process exceeded its wall-clock budget and was killed
    Timeout(Duration),
}

impl EngineFailure {
    pub fn status(&self) -> RunStatus {
        match self {
            EngineFailure::Exec(_) => RunStatus::ExecError,
            EngineFailure::NoResultVar => RunStatus::NoResultVar,
            EngineFailure::EmptyGeometry => RunStatus::EmptyGeometry,
            EngineFailure::AnalysisFail(_) => RunStatus::AnalysisFail,
            EngineFailure::Timeout(_) => RunStatus::Timeout,
        }
    }

    /// Error text fed back to the generator and stored in the run record
    pub fn message(&self) -> String {
        match self {
            EngineFailure::Exec(msg) => msg.clone(),
            EngineFailure::NoResultVar => format!(
                "missing '{}' binding: assign the final shape to a variable named '{}'",
                RESULT_BINDING, RESULT_BINDING
            ),
            EngineFailure::EmptyGeometry => "geometry volume is zero".to_string(),
            EngineFailure::AnalysisFail(msg) => format!("analysis failed: {}", msg),
            EngineFailure::Timeout(limit) => format!(
                "TIMEOUT: external modeler did not finish within {}s",
                limit.as_secs()
            ),
        }
    }

    /// Same failure with its free-text part cut to `max_chars`
    pub fn truncated(self, max_chars: usize) -> Self {
        match self {
            EngineFailure::Exec(msg) => EngineFailure::Exec(truncate_head(&msg, max_chars)),
            EngineFailure::AnalysisFail(msg) => {
                EngineFailure::AnalysisFail(truncate_head(&msg, max_chars))
            }
            other => other,
        }
    }
}

impl std::fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status(), self.message())
    }
}

/// Keep the first `max_chars` characters
pub fn truncate_head(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Keep the last `max_chars` characters, where a process log's terminal error lives
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}
