//! # Arena Execution Service
//!
//! The sandboxed code-execution core behind the arena IDE's run button.
//! Takes a `(language, code, stdin)` triple, compiles or interprets it in an
//! isolated, resource-bounded child process, and returns captured output
//! plus a classified verdict.

mod config;
mod error;
mod normalize;
mod sandbox;
mod service;
mod toolchain;
mod types;
mod workspace;

pub use config::{LimitsConfig, ServiceConfig};
pub use error::Error;
pub use normalize::{normalize, Phase, RawOutcome, TRUNCATION_MARKER};
pub use sandbox::{network_isolation_available, ProcessRunner, Runner};
pub use service::ExecutionService;
pub use toolchain::{SourceName, SourceNaming, ToolchainProfile, ToolchainRegistry};
pub use types::{ExecutionRequest, ExecutionResult, Language, Verdict};
pub use workspace::{sweep_orphans, Workspace};

/// Result type for execution-core operations
pub type Result<T> = std::result::Result<T, Error>;
