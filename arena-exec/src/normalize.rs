//! Pure classification of captured process outcomes into verdicts. No I/O
//! happens here, so every rule is unit-testable without spawning processes.

use nix::sys::signal::Signal;
use std::time::Duration;

use crate::{
    toolchain::ToolchainProfile,
    types::{ExecutionResult, Verdict},
};

/// Marker appended to a buffer that was cut at the output cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Which phase of the pipeline produced this outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Run,
}

/// Everything the sandbox captured about one child process, before any
/// interpretation.
#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub phase: Phase,
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Raw signal number, if the process was signal-killed
    pub signal: Option<i32>,
    /// The runner's wall-clock deadline expired
    pub timed_out: bool,
    /// Either output stream hit the byte cap and the child was killed for it
    pub output_capped: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

// What the default toolchains actually print when an allocation fails under
// RLIMIT_AS / -Xmx. An address-space cap usually surfaces as a nonzero exit
// with one of these on stderr, not as a signal.
const MEMORY_FAILURE_MARKERS: &[&str] = &["MemoryError", "bad_alloc", "OutOfMemoryError"];

/// Map a captured outcome to the uniform result shape.
pub fn normalize(raw: RawOutcome, profile: &ToolchainProfile) -> ExecutionResult {
    let verdict = classify(&raw);
    let cap = profile.max_output_bytes;

    // Compile failures follow the original contract: output empty, the
    // compiler's stderr returned verbatim (truncated).
    let stdout = if raw.phase == Phase::Compile {
        String::new()
    } else {
        truncate_lossy(&raw.stdout, cap)
    };
    let stderr = truncate_lossy(&raw.stderr, cap);

    ExecutionResult {
        verdict,
        success: verdict == Verdict::Ok,
        stdout,
        stderr,
        exit_code: raw.exit_code,
        signal: raw.signal.map(signal_name),
        duration_ms: raw.elapsed.as_millis() as u64,
    }
}

fn classify(raw: &RawOutcome) -> Verdict {
    // The compile phase only reaches the normalizer when it failed; a compile
    // timeout is still a compile error, the distinguishing signal is which
    // phase failed.
    if raw.phase == Phase::Compile {
        return Verdict::CompileError;
    }

    if raw.timed_out {
        return Verdict::Timeout;
    }
    if raw.output_capped {
        return Verdict::OutputLimitExceeded;
    }

    let failed = raw.signal.is_some() || raw.exit_code.map_or(true, |c| c != 0);
    if !failed {
        return Verdict::Ok;
    }

    // An un-asked-for SIGKILL means the kernel OOM killer took the child;
    // timeout/output kills were already classified above. Process-wide
    // rusage is deliberately not consulted: RUSAGE_CHILDREN reports the
    // lifetime peak over all reaped children, so one large run would taint
    // every later verdict.
    if raw.signal == Some(Signal::SIGKILL as i32) {
        return Verdict::MemoryLimitExceeded;
    }
    let stderr = String::from_utf8_lossy(&raw.stderr);
    if MEMORY_FAILURE_MARKERS.iter().any(|m| stderr.contains(m)) {
        return Verdict::MemoryLimitExceeded;
    }

    Verdict::RuntimeError
}

/// Replace invalid UTF-8 and cut at `cap` bytes, appending the truncation
/// marker when anything was dropped.
fn truncate_lossy(bytes: &[u8], cap: usize) -> String {
    if bytes.len() <= cap {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        let mut s = String::from_utf8_lossy(&bytes[..cap]).into_owned();
        s.push_str(TRUNCATION_MARKER);
        s
    }
}

fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("SIG{}", signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::LimitsConfig, toolchain::ToolchainRegistry, types::Language};

    fn profile() -> ToolchainProfile {
        ToolchainRegistry::with_defaults(&LimitsConfig::default())
            .get(Language::Python)
            .unwrap()
            .clone()
    }

    fn run_outcome() -> RawOutcome {
        RawOutcome {
            phase: Phase::Run,
            exit_code: Some(0),
            signal: None,
            timed_out: false,
            output_capped: false,
            stdout: b"2\n".to_vec(),
            stderr: Vec::new(),
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn zero_exit_is_ok() {
        let result = normalize(run_outcome(), &profile());
        assert_eq!(result.verdict, Verdict::Ok);
        assert!(result.success);
        assert_eq!(result.stdout, "2\n");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.duration_ms, 12);
    }

    #[test]
    fn nonzero_exit_is_runtime_error() {
        let raw = RawOutcome {
            exit_code: Some(1),
            ..run_outcome()
        };
        let result = normalize(raw, &profile());
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn timeout_takes_precedence_over_kill_signal() {
        let raw = RawOutcome {
            exit_code: None,
            signal: Some(Signal::SIGKILL as i32),
            timed_out: true,
            ..run_outcome()
        };
        let result = normalize(raw, &profile());
        assert_eq!(result.verdict, Verdict::Timeout);
        assert_eq!(result.signal.as_deref(), Some("SIGKILL"));
    }

    #[test]
    fn output_cap_kill_is_output_limit() {
        let raw = RawOutcome {
            exit_code: None,
            signal: Some(Signal::SIGKILL as i32),
            output_capped: true,
            ..run_outcome()
        };
        assert_eq!(normalize(raw, &profile()).verdict, Verdict::OutputLimitExceeded);
    }

    #[test]
    fn unexplained_sigkill_is_memory_limit() {
        let raw = RawOutcome {
            exit_code: None,
            signal: Some(Signal::SIGKILL as i32),
            ..run_outcome()
        };
        assert_eq!(normalize(raw, &profile()).verdict, Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn allocator_failure_on_stderr_is_memory_limit() {
        let raw = RawOutcome {
            exit_code: Some(1),
            stderr: b"Traceback...\nMemoryError\n".to_vec(),
            ..run_outcome()
        };
        assert_eq!(normalize(raw, &profile()).verdict, Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn segfault_is_runtime_error() {
        let raw = RawOutcome {
            exit_code: None,
            signal: Some(Signal::SIGSEGV as i32),
            ..run_outcome()
        };
        let result = normalize(raw, &profile());
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert_eq!(result.signal.as_deref(), Some("SIGSEGV"));
    }

    #[test]
    fn compile_failure_is_compile_error_even_on_timeout() {
        let raw = RawOutcome {
            phase: Phase::Compile,
            exit_code: None,
            timed_out: true,
            stdout: b"noise".to_vec(),
            stderr: b"main.cpp:1: error".to_vec(),
            ..run_outcome()
        };
        let result = normalize(raw, &profile());
        assert_eq!(result.verdict, Verdict::CompileError);
        assert_eq!(result.stdout, "");
        assert!(result.stderr.contains("error"));
    }

    #[test]
    fn oversized_buffers_get_the_marker() {
        let p = profile();
        let raw = RawOutcome {
            stdout: vec![b'a'; p.max_output_bytes + 100],
            ..run_outcome()
        };
        let result = normalize(raw, &p);
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            result.stdout.len(),
            p.max_output_bytes + TRUNCATION_MARKER.len()
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let raw = RawOutcome {
            stdout: vec![0xff, 0xfe, b'h', b'i'],
            ..run_outcome()
        };
        let result = normalize(raw, &profile());
        assert!(result.stdout.contains("hi"));
        assert!(result.stdout.contains('\u{FFFD}'));
    }
}
