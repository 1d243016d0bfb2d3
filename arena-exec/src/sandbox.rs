use async_trait::async_trait;
use nix::sched::{unshare, CloneFlags};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setsid, Pid};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, warn};

use crate::{
    error::Error,
    normalize::{Phase, RawOutcome},
    toolchain::ToolchainProfile,
    workspace::Workspace,
};

const PROVISION_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// The sandbox runner seam. The isolation mechanism behind it (rlimits here,
/// containers or cgroups elsewhere) is pluggable; the limits themselves are
/// the contract.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Compile (if the profile has a compile step) and run `code` with
    /// `stdin` piped in, returning the captured outcome of the phase that
    /// finished last. Only unclassifiable faults are errors; compile
    /// failures, timeouts and kills come back as a [`RawOutcome`].
    async fn run(
        &self,
        profile: &ToolchainProfile,
        code: &str,
        stdin: &str,
    ) -> Result<RawOutcome, Error>;
}

/// Default runner: one child process group per request, rlimit-based
/// resource enforcement, streamed output capture with a hard byte cap.
pub struct ProcessRunner {
    workspace_root: PathBuf,
    file_size_bytes: u64,
    max_processes: u64,
}

impl ProcessRunner {
    pub fn new(workspace_root: PathBuf, file_size_bytes: u64, max_processes: u64) -> Self {
        if !network_isolation_available() {
            warn!(
                "kernel refuses unprivileged user+net namespaces; \
                 sandboxed children will keep host network access"
            );
        }
        Self {
            workspace_root,
            file_size_bytes,
            max_processes,
        }
    }

    async fn acquire_workspace(&self) -> Result<Workspace, Error> {
        match Workspace::create(&self.workspace_root).await {
            Ok(ws) => Ok(ws),
            // Transient provisioning failures get one retry with backoff;
            // everything after this point is terminal for the request.
            Err(e) => {
                warn!("workspace provisioning failed, retrying once: {}", e);
                time::sleep(PROVISION_RETRY_BACKOFF).await;
                Workspace::create(&self.workspace_root).await
            }
        }
    }

    async fn run_phase(
        &self,
        phase: Phase,
        argv: &[String],
        dir: &Path,
        stdin: &str,
        timeout: Duration,
        profile: &ToolchainProfile,
    ) -> Result<RawOutcome, Error> {
        let (cmd, args) = argv
            .split_first()
            .ok_or_else(|| Error::Sandbox("Empty command".to_string()))?;

        // Workspace-relative binaries (compiled artifacts) run as-is; system
        // commands are resolved on PATH up front so a missing toolchain is a
        // clean error, not a spawn failure.
        let cmd_path = if cmd.starts_with("./") {
            PathBuf::from(cmd)
        } else {
            which::which(cmd)
                .map_err(|_| Error::Sandbox(format!("Command not found: {}", cmd)))?
        };

        let mut command = Command::new(&cmd_path);
        command
            .args(args)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", dir)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let memory_limit = profile.enforce_address_space.then_some(profile.memory_limit_bytes);
        // CPU rlimit backs up the wall-clock deadline
        let cpu_secs = timeout.as_secs() + 1;
        let file_size = self.file_size_bytes;
        let max_processes = self.max_processes;

        unsafe {
            command.pre_exec(move || {
                // Own process group, so the kill takes descendants too
                setsid().map_err(io_err)?;
                // Best effort: a fresh user+net namespace cuts the child off
                // from the network where the kernel allows it
                let _ = unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET);

                setrlimit(Resource::RLIMIT_CPU, cpu_secs, cpu_secs).map_err(io_err)?;
                setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size).map_err(io_err)?;
                setrlimit(Resource::RLIMIT_NPROC, max_processes, max_processes)
                    .map_err(io_err)?;
                if let Some(bytes) = memory_limit {
                    setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(io_err)?;
                }
                Ok(())
            });
        }

        let start = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| Error::Sandbox(format!("Failed to spawn process: {}", e)))?;
        let pid = child.id();

        // Feed stdin from a task so a child that never reads cannot stall us
        // before the deadline starts counting; dropping the pipe signals EOF.
        if let Some(mut stdin_pipe) = child.stdin.take() {
            let data = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin_pipe.write_all(&data).await {
                    // Broken pipe just means the child exited without reading
                    debug!("stdin write ended early: {}", e);
                }
            });
        }

        let cap = profile.max_output_bytes;
        let cap_hit = Arc::new(Notify::new());
        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::Sandbox("Child stdout not captured".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| Error::Sandbox("Child stderr not captured".to_string()))?;
        let stdout_task = tokio::spawn(read_capped(stdout_pipe, cap, cap_hit.clone()));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, cap, cap_hit.clone()));

        let mut timed_out = false;
        let mut output_capped = false;
        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| Error::Sandbox(format!("Process error: {}", e)))?
            }
            _ = time::sleep(timeout) => {
                timed_out = true;
                kill_group(pid);
                child
                    .wait()
                    .await
                    .map_err(|e| Error::Sandbox(format!("Process error: {}", e)))?
            }
            _ = cap_hit.notified() => {
                output_capped = true;
                kill_group(pid);
                child
                    .wait()
                    .await
                    .map_err(|e| Error::Sandbox(format!("Process error: {}", e)))?
            }
        };
        let elapsed = start.elapsed();

        let (stdout_buf, stdout_capped) = stdout_task
            .await
            .map_err(|e| Error::Sandbox(format!("Output capture failed: {}", e)))?;
        let (stderr_buf, stderr_capped) = stderr_task
            .await
            .map_err(|e| Error::Sandbox(format!("Output capture failed: {}", e)))?;
        output_capped = output_capped || stdout_capped || stderr_capped;

        let (exit_code, signal) = {
            use std::os::unix::process::ExitStatusExt;
            (status.code(), status.signal())
        };

        debug!(
            ?phase,
            ?exit_code,
            ?signal,
            timed_out,
            output_capped,
            elapsed_ms = elapsed.as_millis() as u64,
            "phase finished"
        );

        Ok(RawOutcome {
            phase,
            exit_code,
            signal,
            timed_out,
            output_capped,
            stdout: stdout_buf,
            stderr: stderr_buf,
            elapsed,
        })
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        profile: &ToolchainProfile,
        code: &str,
        stdin: &str,
    ) -> Result<RawOutcome, Error> {
        // The workspace is dropped on every exit path of this function,
        // including the `?` ones.
        let workspace = self.acquire_workspace().await?;
        let name = profile.source_name(code);
        workspace.write_source(&name.file, code).await?;

        if let Some(compile) = &profile.compile {
            let argv = ToolchainProfile::resolve_argv(compile, &name);
            let outcome = self
                .run_phase(
                    Phase::Compile,
                    &argv,
                    workspace.dir(),
                    "",
                    profile.compile_timeout,
                    profile,
                )
                .await?;
            let failed = outcome.timed_out
                || outcome.output_capped
                || outcome.signal.is_some()
                || outcome.exit_code != Some(0);
            if failed {
                return Ok(outcome);
            }
        }

        let argv = ToolchainProfile::resolve_argv(&profile.run, &name);
        self.run_phase(
            Phase::Run,
            &argv,
            workspace.dir(),
            stdin,
            profile.run_timeout,
            profile,
        )
        .await
    }
}

/// Read a stream into memory, stopping one byte past `cap`. The extra byte
/// lets the normalizer detect truncation; the notify wakes the owner to kill
/// the child so nothing buffers unboundedly.
async fn read_capped(
    mut reader: impl AsyncRead + Unpin,
    cap: usize,
    cap_hit: Arc<Notify>,
) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = (cap + 1).saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
                if buf.len() > cap {
                    cap_hit.notify_one();
                    return (buf, true);
                }
            }
            Err(e) => {
                debug!("output stream closed: {}", e);
                break;
            }
        }
    }
    (buf, false)
}

/// Whether the kernel lets this process put children into fresh user+net
/// namespaces. Checked with a throwaway child, since `unshare` must not run
/// in the server process itself. Where this returns false (unprivileged
/// user namespaces disabled), the in-sandbox `unshare` is a no-op and
/// children keep host network access — logged once at runner construction.
pub fn network_isolation_available() -> bool {
    use std::os::unix::process::CommandExt;
    let mut command = std::process::Command::new("true");
    unsafe {
        command.pre_exec(|| {
            unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET).map_err(io_err)
        });
    }
    command
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // setsid in pre_exec made the child its own group leader
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

fn io_err<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}
