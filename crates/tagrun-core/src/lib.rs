//! tagrun-core: tag-filtered discovery and execution of script test suites.
//!
//! A session resolves the host's tags by running a tags script, walks the
//! suite's `index` manifests (or asks a driver script for its test list),
//! and runs every selected script in its own interpreter process while
//! streaming both output pipes.

pub mod audit;
pub mod config;
pub mod discoverer;
pub mod driver;
pub mod error;
pub mod filter;
pub mod manifest;
pub mod obs;
pub mod orchestrator;
pub mod reporting;
pub mod session;
pub mod tags;
pub mod telemetry;
pub mod unit;
pub mod walker;

pub use audit::{AuditSink, FileAuditLog, MemoryAuditLog};
pub use config::{RunnerConfig, Strategy, CONFIG_FILE_NAME};
pub use discoverer::{
    build_discoverer, Discovery, DriverDiscoverer, IndexDiscoverer, TestDiscoverer,
};
pub use driver::{DriverRunner, ListedTest};
pub use error::{Result, RunnerError};
pub use filter::{evaluate, CompareOp, Comparison, TagExpr};
pub use manifest::{IndexEntry, MANIFEST_FILE_NAME};
pub use orchestrator::{
    CapturedOutput, ConsoleSink, ExecutionResult, OutputSink, OutputStream, ProcessRunner,
    ScriptRunner,
};
pub use reporting::{write_session_report_json, SessionReport, SessionSummaryArtifact};
pub use session::{Outcome, SessionOptions, SessionResult, SinkFactory, TestSession, UnitOutcome};
pub use tags::{TagResolver, TagSet};
pub use telemetry::init_tracing;
pub use unit::{SkipState, TestUnit};
pub use walker::IndexWalker;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
