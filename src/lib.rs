//! cadbench - benchmark harness for AI-generated CAD programs
//!
//! A code generator turns a natural-language task into a CAD program. The
//! harness picks an engine for it, runs it, checks that it produced real
//! geometry, and feeds failures back to the generator for a bounded number
//! of attempts.
//!
//! # Modules
//!
//! - `orchestrator` - the generate → select engine → test → retry loop
//! - `engine` - embedded interpreter and external FreeCAD subprocess engines
//! - `geometry` - artifact model, volume/face validator, STL interchange
//! - `generator` - code generator trait and the Ollama backend
//! - `store` - versioned output directories and the run ledger
//! - `record` - the per-run record and status taxonomy
//! - `config` - benchmark configuration
//! - `metrics` - Prometheus metrics
//! - `tracing` - logging setup
//!
//! # Quick Start
//!
//! ```ignore
//! use cadbench::{BenchConfig, JsonlLedger, OllamaGenerator, RequestOrchestrator};
//!
//! let config = BenchConfig::load(None)?;
//! let generator = OllamaGenerator::new(&config.generator.base_url);
//! let ledger = JsonlLedger::new(&config.output_dir, config.ledger.clone());
//! let orchestrator = RequestOrchestrator::new(generator, ledger, &config);
//! let outcome = orchestrator.run(&config.models[0], "bracket", "an L bracket").await?;
//! ```

pub mod config;
pub mod engine;
pub mod generator;
pub mod geometry;
pub mod metrics;
pub mod orchestrator;
pub mod record;
pub mod store;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use config::{BenchConfig, ModelSpec};
pub use engine::{select_engine, EngineFailure, EngineKind};
pub use generator::{CodeGenerator, GenerationRequest, GeneratorError, OllamaGenerator};
pub use geometry::{analyze_geometry, GeometryStats};
pub use orchestrator::{OrchestratorError, RequestOrchestrator, RunOutcome};
pub use record::{RunRecord, RunStatus};
pub use store::{JsonlLedger, OutputStore, RecordSink};
