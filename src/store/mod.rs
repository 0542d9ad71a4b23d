//! Persistence: versioned artifact directories and the run ledger

pub mod ledger;
pub mod output;

pub use ledger::{JsonlLedger, LedgerConfig, LedgerError, MemorySink, RecordSink, LEDGER_FILE};
pub use output::{OutputError, OutputStore, ProjectDir};
