use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Per-execution resource limits shared by every toolchain profile unless a
/// profile overrides them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Wall-clock limit for the compile phase, milliseconds
    pub compile_timeout_ms: u64,
    /// Wall-clock limit for the run phase, milliseconds
    pub run_timeout_ms: u64,
    /// Address-space / heap budget for the child, bytes
    pub memory_limit_bytes: u64,
    /// Cap applied independently to stdout and stderr, bytes
    pub max_output_bytes: usize,
    /// RLIMIT_FSIZE for files the child writes, bytes
    pub file_size_bytes: u64,
    /// RLIMIT_NPROC for the child
    pub max_processes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_timeout_ms: 10_000,
            run_timeout_ms: 5_000, // original backend used a 5 second cap
            memory_limit_bytes: 256 * 1024 * 1024, // 256MB
            max_output_bytes: 64 * 1024, // 64KB
            file_size_bytes: 32 * 1024 * 1024, // 32MB
            max_processes: 64,
        }
    }
}

impl LimitsConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }
}

/// Service-level knobs: admission control and pre-execution validation caps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Maximum number of concurrently running sandboxed executions
    pub max_concurrent: usize,
    /// How long a request may wait for an execution slot before SERVICE_BUSY
    pub queue_wait_ms: u64,
    /// Maximum accepted source size, bytes (rejected before any disk work)
    pub max_source_bytes: usize,
    /// Maximum accepted stdin size, bytes
    pub max_stdin_bytes: usize,
    /// Directory workspaces are created under. A service-owned subdirectory
    /// of the system temp dir by default, so the startup orphan sweep never
    /// reaches into another deployment's live workspaces.
    pub workspace_root: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            queue_wait_ms: 2_000,
            max_source_bytes: 64 * 1024,
            max_stdin_bytes: 64 * 1024,
            workspace_root: std::env::temp_dir().join("arena-exec"),
        }
    }
}

impl ServiceConfig {
    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.queue_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workspace_root_is_service_owned() {
        let root = ServiceConfig::default().workspace_root;
        assert!(root.ends_with("arena-exec"));
        assert!(root.starts_with(std::env::temp_dir()));
    }
}
