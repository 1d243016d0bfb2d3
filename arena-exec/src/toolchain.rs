use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::{config::LimitsConfig, types::Language};

/// How the source file gets its name on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceNaming {
    /// `main.<extension>`, entry point `main`
    Fixed,
    /// File named after the `public class` declared in the source (javac
    /// refuses anything else); falls back to `Main`
    JavaPublicClass,
}

/// Resolved names for one request's source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceName {
    /// File name the source is written to inside the workspace
    pub file: String,
    /// Entry-point identifier (binary stem or Java class name)
    pub main: String,
}

/// Static per-language toolchain configuration. Built once at startup and
/// shared read-only by every request.
///
/// Command argv entries may contain `{file}` and `{main}` placeholders,
/// substituted per request after source naming is resolved.
#[derive(Debug, Clone)]
pub struct ToolchainProfile {
    pub id: Language,
    pub file_extension: String,
    /// Compile argv, absent for interpreted languages
    pub compile: Option<Vec<String>>,
    /// Run argv, executed inside the workspace
    pub run: Vec<String>,
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    pub memory_limit_bytes: u64,
    /// Applied independently to stdout and stderr
    pub max_output_bytes: usize,
    pub naming: SourceNaming,
    /// Whether the runner may cap the child with RLIMIT_AS. Off for the JVM,
    /// which cannot start under an address-space cap; its profile carries
    /// `-Xmx` instead.
    pub enforce_address_space: bool,
}

fn java_class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"public\s+class\s+(\w+)").unwrap())
}

impl ToolchainProfile {
    /// Resolve the on-disk source name for one request.
    pub fn source_name(&self, code: &str) -> SourceName {
        match self.naming {
            SourceNaming::Fixed => SourceName {
                file: format!("main.{}", self.file_extension),
                main: "main".to_string(),
            },
            SourceNaming::JavaPublicClass => {
                let class = java_class_regex()
                    .captures(code)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "Main".to_string());
                SourceName {
                    file: format!("{}.{}", class, self.file_extension),
                    main: class,
                }
            }
        }
    }

    /// Substitute `{file}`/`{main}` placeholders into an argv template.
    pub fn resolve_argv(argv: &[String], name: &SourceName) -> Vec<String> {
        argv.iter()
            .map(|arg| arg.replace("{file}", &name.file).replace("{main}", &name.main))
            .collect()
    }
}

/// Registry of toolchain profiles keyed by language id.
///
/// The open-closed seam for language support: handlers look languages up
/// here instead of branching, so adding one is a data change.
#[derive(Debug, Clone, Default)]
pub struct ToolchainRegistry {
    profiles: HashMap<Language, ToolchainProfile>,
}

impl ToolchainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four languages the IDE boundary accepts, sharing
    /// the given limits.
    pub fn with_defaults(limits: &LimitsConfig) -> Self {
        let mut registry = Self::new();
        let xmx = format!("-Xmx{}m", limits.memory_limit_bytes / (1024 * 1024));

        registry.register(ToolchainProfile {
            id: Language::Python,
            file_extension: "py".into(),
            compile: None,
            run: argv(&["python3", "{file}"]),
            compile_timeout: limits.compile_timeout(),
            run_timeout: limits.run_timeout(),
            memory_limit_bytes: limits.memory_limit_bytes,
            max_output_bytes: limits.max_output_bytes,
            naming: SourceNaming::Fixed,
            enforce_address_space: true,
        });
        registry.register(ToolchainProfile {
            id: Language::JavaScript,
            file_extension: "js".into(),
            compile: None,
            run: argv(&["node", "{file}"]),
            compile_timeout: limits.compile_timeout(),
            run_timeout: limits.run_timeout(),
            memory_limit_bytes: limits.memory_limit_bytes,
            max_output_bytes: limits.max_output_bytes,
            naming: SourceNaming::Fixed,
            enforce_address_space: true,
        });
        registry.register(ToolchainProfile {
            id: Language::Cpp,
            file_extension: "cpp".into(),
            compile: Some(argv(&["g++", "{file}", "-O2", "-o", "{main}"])),
            run: argv(&["./{main}"]),
            compile_timeout: limits.compile_timeout(),
            run_timeout: limits.run_timeout(),
            memory_limit_bytes: limits.memory_limit_bytes,
            max_output_bytes: limits.max_output_bytes,
            naming: SourceNaming::Fixed,
            enforce_address_space: true,
        });
        registry.register(ToolchainProfile {
            id: Language::Java,
            file_extension: "java".into(),
            compile: Some(argv(&["javac", "{file}"])),
            run: argv(&["java", xmx.as_str(), "{main}"]),
            compile_timeout: limits.compile_timeout(),
            run_timeout: limits.run_timeout(),
            memory_limit_bytes: limits.memory_limit_bytes,
            max_output_bytes: limits.max_output_bytes,
            naming: SourceNaming::JavaPublicClass,
            enforce_address_space: false,
        });

        registry
    }

    pub fn register(&mut self, profile: ToolchainProfile) {
        self.profiles.insert(profile.id, profile);
    }

    pub fn get(&self, language: Language) -> Option<&ToolchainProfile> {
        self.profiles.get(&language)
    }

    pub fn languages(&self) -> Vec<Language> {
        self.profiles.keys().copied().collect()
    }

    /// Languages whose toolchain binaries resolve on PATH. Logged at startup
    /// so a missing compiler is visible before the first request fails.
    pub fn available(&self) -> Vec<Language> {
        self.profiles
            .values()
            .filter(|p| {
                let run_ok = p.run.first().map_or(false, |cmd| {
                    cmd.starts_with("./") || which::which(cmd).is_ok()
                });
                let compile_ok = p
                    .compile
                    .as_ref()
                    .and_then(|argv| argv.first())
                    .map_or(true, |cmd| which::which(cmd).is_ok());
                run_ok && compile_ok
            })
            .map(|p| p.id)
            .collect()
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_ide_languages() {
        let registry = ToolchainRegistry::with_defaults(&LimitsConfig::default());
        for lang in [Language::Python, Language::JavaScript, Language::Cpp, Language::Java] {
            assert!(registry.get(lang).is_some(), "missing profile for {lang}");
        }
        assert!(registry.get(Language::Cpp).unwrap().compile.is_some());
        assert!(registry.get(Language::Python).unwrap().compile.is_none());
    }

    #[test]
    fn registering_a_new_profile_is_a_data_change() {
        let mut registry = ToolchainRegistry::with_defaults(&LimitsConfig::default());
        let mut profile = registry.get(Language::Python).unwrap().clone();
        profile.run = vec!["pypy3".into(), "{file}".into()];
        registry.register(profile);
        assert_eq!(registry.get(Language::Python).unwrap().run[0], "pypy3");
    }

    #[test]
    fn fixed_naming_uses_main_and_extension() {
        let registry = ToolchainRegistry::with_defaults(&LimitsConfig::default());
        let name = registry.get(Language::Cpp).unwrap().source_name("int main(){}");
        assert_eq!(name.file, "main.cpp");
        assert_eq!(name.main, "main");
    }

    #[test]
    fn java_naming_follows_the_public_class() {
        let registry = ToolchainRegistry::with_defaults(&LimitsConfig::default());
        let profile = registry.get(Language::Java).unwrap();

        let name = profile.source_name("public class Solution { }");
        assert_eq!(name.file, "Solution.java");
        assert_eq!(name.main, "Solution");

        let fallback = profile.source_name("class helper {}");
        assert_eq!(fallback.file, "Main.java");
        assert_eq!(fallback.main, "Main");
    }

    #[test]
    fn placeholders_substitute_into_argv() {
        let name = SourceName {
            file: "Solution.java".into(),
            main: "Solution".into(),
        };
        let argv = ToolchainProfile::resolve_argv(
            &["java".to_string(), "{main}".to_string()],
            &name,
        );
        assert_eq!(argv, vec!["java", "Solution"]);
    }
}
