use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    config::{LimitsConfig, ServiceConfig},
    error::Error,
    normalize,
    sandbox::{ProcessRunner, Runner},
    toolchain::ToolchainRegistry,
    types::{ExecutionRequest, ExecutionResult},
};

/// Front door of the execution core: validates requests, applies admission
/// control, hands work to the sandbox runner and normalizes the outcome.
///
/// Cheap to clone; all shared state is read-only apart from the admission
/// semaphore.
#[derive(Clone)]
pub struct ExecutionService {
    registry: Arc<ToolchainRegistry>,
    runner: Arc<dyn Runner>,
    semaphore: Arc<Semaphore>,
    config: ServiceConfig,
}

impl ExecutionService {
    /// Service with the default toolchain registry and the rlimit-based
    /// process runner.
    pub fn new(config: ServiceConfig, limits: LimitsConfig) -> Self {
        let registry = ToolchainRegistry::with_defaults(&limits);
        let runner = ProcessRunner::new(
            config.workspace_root.clone(),
            limits.file_size_bytes,
            limits.max_processes,
        );
        Self::with_parts(config, registry, Arc::new(runner))
    }

    /// Service over a custom registry and runner. The seam tests and
    /// alternative isolation backends plug into.
    pub fn with_parts(
        config: ServiceConfig,
        registry: ToolchainRegistry,
        runner: Arc<dyn Runner>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            registry: Arc::new(registry),
            runner,
            semaphore,
            config,
        }
    }

    pub fn registry(&self) -> &ToolchainRegistry {
        &self.registry
    }

    /// Execution slots currently free under the admission limit. Surfaced
    /// through the server's health endpoint as a cheap load signal.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Execute one request end to end.
    ///
    /// Validation happens before any resource acquisition; the semaphore
    /// wait is bounded by the configured queue deadline and expires into
    /// [`Error::Busy`]. Unclassifiable runner faults are logged with a
    /// correlation id and surface as [`Error::Internal`] carrying only
    /// that id.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, Error> {
        let profile = self
            .registry
            .get(request.language)
            .ok_or_else(|| Error::UnsupportedLanguage(request.language.to_string()))?;

        if request.code.is_empty() {
            return Err(Error::Validation("source must not be empty".to_string()));
        }
        if request.code.len() > self.config.max_source_bytes {
            return Err(Error::Validation(format!(
                "source exceeds {} bytes",
                self.config.max_source_bytes
            )));
        }
        if request.stdin.len() > self.config.max_stdin_bytes {
            return Err(Error::Validation(format!(
                "stdin exceeds {} bytes",
                self.config.max_stdin_bytes
            )));
        }

        let _permit = time::timeout(self.config.queue_wait(), self.semaphore.acquire())
            .await
            .map_err(|_| Error::Busy(self.config.queue_wait_ms))?
            .map_err(|_| internal_error("admission semaphore closed"))?;

        debug!(language = %request.language, "starting execution");

        let raw = match self
            .runner
            .run(profile, &request.code, &request.stdin)
            .await
        {
            Ok(raw) => raw,
            Err(e @ Error::Internal { .. }) => return Err(e),
            Err(e) => {
                return Err(internal_error(&e.to_string()));
            }
        };

        let result = normalize::normalize(raw, profile);
        info!(
            language = %request.language,
            verdict = %result.verdict,
            duration_ms = result.duration_ms,
            "execution finished"
        );
        Ok(result)
    }
}

/// Log the real cause server-side, hand the client only a correlation id.
fn internal_error(cause: &str) -> Error {
    let correlation_id = Uuid::new_v4();
    error!(%correlation_id, "execution failed internally: {}", cause);
    Error::Internal { correlation_id }
}
