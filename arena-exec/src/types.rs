use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages accepted at the wire boundary.
///
/// Adding a language is a registry change (see [`crate::ToolchainRegistry`]),
/// plus a variant here so serde keeps the boundary closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
    Java,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    // Case-insensitive: the IDE client sends lowercase ids but the original
    // backend lowercased before dispatch, so "Python" is accepted too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::JavaScript),
            "cpp" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            _ => Err(format!("Unsupported language: {}", s)),
        }
    }
}

/// One code execution request. Created per HTTP call, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Programming language
    pub language: Language,
    /// Source code to execute
    pub code: String,
    /// Data piped to the program's stdin
    #[serde(default)]
    pub stdin: String,
}

/// Classified outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ok,
    CompileError,
    RuntimeError,
    Timeout,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    ServiceBusy,
    InternalError,
}

impl Verdict {
    /// Human-readable message shown to the client alongside captured output.
    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Ok => "execution completed",
            Verdict::CompileError => "compilation failed",
            Verdict::RuntimeError => "program exited with an error",
            Verdict::Timeout => "execution timed out",
            Verdict::MemoryLimitExceeded => "memory limit exceeded",
            Verdict::OutputLimitExceeded => "output limit exceeded",
            Verdict::ServiceBusy => "service is busy, try again later",
            Verdict::InternalError => "internal execution error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Ok => "OK",
            Verdict::CompileError => "COMPILE_ERROR",
            Verdict::RuntimeError => "RUNTIME_ERROR",
            Verdict::Timeout => "TIMEOUT",
            Verdict::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            Verdict::OutputLimitExceeded => "OUTPUT_LIMIT_EXCEEDED",
            Verdict::ServiceBusy => "SERVICE_BUSY",
            Verdict::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

/// Final result returned to the caller. Invariant: `success == (verdict == Ok)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub verdict: Verdict,
    pub success: bool,
    /// Captured stdout, valid UTF-8, truncated to the profile's output cap.
    pub stdout: String,
    /// Captured stderr, valid UTF-8, truncated to the profile's output cap.
    pub stderr: String,
    /// Exit code of the run phase, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Name of the terminating signal, if the process was killed by one.
    pub signal: Option<String>,
    /// Wall-clock duration of the failing phase (or the run phase on success).
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_parses_case_insensitively() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("JavaScript".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("CPP".parse::<Language>().unwrap(), Language::Cpp);
        assert!("brainfuck".parse::<Language>().is_err());
    }

    #[test]
    fn verdict_serializes_screaming_snake() {
        let json = serde_json::to_string(&Verdict::MemoryLimitExceeded).unwrap();
        assert_eq!(json, "\"MEMORY_LIMIT_EXCEEDED\"");
        let back: Verdict = serde_json::from_str("\"COMPILE_ERROR\"").unwrap();
        assert_eq!(back, Verdict::CompileError);
    }

    #[test]
    fn request_deserializes_with_default_stdin() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"language":"python","code":"print(1)"}"#).unwrap();
        assert_eq!(req.language, Language::Python);
        assert!(req.stdin.is_empty());
    }
}
