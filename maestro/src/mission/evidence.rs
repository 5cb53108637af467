//! Evidence gate — deterministic acceptance checks.
//!
//! After each dev sprint the orchestrator verifies that real artifacts
//! exist. No LLM involved: recursive globs (with brace expansion),
//! directory checks, fake-file sniffing, and sandboxed commands.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::sandbox::Sandbox;

/// Kind of acceptance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// A glob resolves to at least one match.
    FileExists,
    /// A glob resolves to at least `min` matches.
    FileCountMin,
    /// A glob resolves to at most `max` matches.
    FileCountMax,
    /// A directory exists.
    DirExists,
    /// Matches are at least `min_size` bytes and carry no stub markers.
    NoFakeFiles,
    /// A sandboxed command exits 0.
    CommandOk,
}

/// One acceptance criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    /// Stable identifier.
    pub id: String,
    /// Human description.
    pub description: String,
    /// Check kind.
    pub check: CheckKind,
    /// Check parameters (`pattern`, `min`, `max`, `path`, `min_size`, `command`).
    #[serde(default)]
    pub params: Value,
    /// Outcome of the last evaluation.
    #[serde(default)]
    pub passed: bool,
    /// Outcome detail.
    #[serde(default)]
    pub detail: String,
}

impl Criterion {
    /// Build a criterion.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        check: CheckKind,
        params: Value,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            check,
            params,
            passed: false,
            detail: String::new(),
        }
    }

    /// Reset the recorded outcome before a re-run.
    pub fn reset(&mut self) {
        self.passed = false;
        self.detail.clear();
    }
}

/// Result of one evidence gate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceReport {
    /// Whether every criterion passed.
    pub all_passed: bool,
    /// Per-criterion outcomes.
    pub criteria: Vec<Criterion>,
}

impl EvidenceReport {
    /// Human-formatted report suitable for re-injection into a sprint prompt.
    #[must_use]
    pub fn render(&self) -> String {
        let lines: Vec<String> = self
            .criteria
            .iter()
            .map(|c| {
                format!(
                    "{} {} — {} ({})",
                    if c.passed { "PASS" } else { "FAIL" },
                    c.id,
                    c.description,
                    c.detail
                )
            })
            .collect();
        format!(
            "[Evidence gate] {}/{} criteria passed\n{}",
            self.criteria.iter().filter(|c| c.passed).count(),
            self.criteria.len(),
            lines.join("\n")
        )
    }
}

/// Default criteria for a workflow, by type substring of its id.
#[must_use]
pub fn default_criteria(workflow_id: &str) -> Vec<Criterion> {
    let wid = workflow_id.to_lowercase();
    let c = Criterion::new;
    if wid.contains("android") {
        vec![
            c("kotlin-files", "At least 5 Kotlin files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*.kt", "min": 5})),
            c("gradle-build", "A build.gradle file exists", CheckKind::FileExists,
              serde_json::json!({"pattern": "**/build.gradle*"})),
            c("manifest", "AndroidManifest.xml exists", CheckKind::FileExists,
              serde_json::json!({"pattern": "**/AndroidManifest.xml"})),
            c("app-structure", "app/src/main exists", CheckKind::DirExists,
              serde_json::json!({"path": "app/src/main"})),
            c("tests-exist", "At least 2 test files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*Test*.kt", "min": 2})),
            c("no-swift", "No Swift files in an Android project", CheckKind::FileCountMax,
              serde_json::json!({"pattern": "**/*.swift", "max": 0})),
            c("real-gradlew", "gradlew is not a fake", CheckKind::NoFakeFiles,
              serde_json::json!({"pattern": "**/gradlew", "min_size": 100})),
        ]
    } else if wid.contains("ios") {
        vec![
            c("swift-files", "At least 5 Swift files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*.swift", "min": 5})),
            c("xcodeproj", "An Xcode project exists", CheckKind::FileExists,
              serde_json::json!({"pattern": "**/*.xcodeproj"})),
            c("tests-exist", "At least 2 test files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*Test*.swift", "min": 2})),
            c("no-kotlin", "No Kotlin in an iOS project", CheckKind::FileCountMax,
              serde_json::json!({"pattern": "**/*.kt", "max": 0})),
        ]
    } else if wid.contains("web") || wid.contains("frontend") {
        vec![
            c("package-json", "package.json exists", CheckKind::FileExists,
              serde_json::json!({"pattern": "**/package.json"})),
            c("source-files", "At least 5 source files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*.{ts,tsx,js,jsx,svelte,vue}", "min": 5})),
            c("tests-exist", "At least 2 test files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*.{test,spec}.{ts,tsx,js,jsx}", "min": 2})),
        ]
    } else if wid.contains("backend") {
        vec![
            c("source-files", "At least 5 source files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*.{py,rs,go,java}", "min": 5})),
            c("tests-exist", "At least 2 test files", CheckKind::FileCountMin,
              serde_json::json!({"pattern": "**/*test*.*", "min": 2})),
        ]
    } else {
        vec![c(
            "has-files",
            "At least 3 source files created",
            CheckKind::FileCountMin,
            serde_json::json!({"pattern": "**/*.*", "min": 3}),
        )]
    }
}

/// Stub markers that disqualify a file in `no_fake_files`.
const FAKE_MARKERS: [&str; 4] = ["placeholder", "echo", "/dev/null", "stub"];

/// Run every criterion against a workspace.
pub async fn run_checks(
    workspace: &Path,
    mut criteria: Vec<Criterion>,
    sandbox: &Sandbox,
) -> EvidenceReport {
    if !workspace.is_dir() {
        for c in &mut criteria {
            c.passed = false;
            c.detail = format!("workspace not found: {}", workspace.display());
        }
        return EvidenceReport {
            all_passed: false,
            criteria,
        };
    }

    let mut all_passed = true;
    for criterion in &mut criteria {
        evaluate(workspace, criterion, sandbox).await;
        debug!(id = %criterion.id, passed = criterion.passed, detail = %criterion.detail, "evidence check");
        all_passed &= criterion.passed;
    }
    EvidenceReport {
        all_passed,
        criteria,
    }
}

async fn evaluate(workspace: &Path, criterion: &mut Criterion, sandbox: &Sandbox) {
    let params = &criterion.params;
    let pattern = params.get("pattern").and_then(Value::as_str).unwrap_or("");
    match criterion.check {
        CheckKind::FileExists => {
            let found = glob_recursive(workspace, pattern);
            criterion.passed = !found.is_empty();
            criterion.detail = format!("{} found", found.len());
        }
        CheckKind::FileCountMin => {
            let min = params.get("min").and_then(Value::as_u64).unwrap_or(1) as usize;
            let found = glob_recursive(workspace, pattern);
            criterion.passed = found.len() >= min;
            criterion.detail = format!("{}/{} found", found.len(), min);
        }
        CheckKind::FileCountMax => {
            let max = params.get("max").and_then(Value::as_u64).unwrap_or(0) as usize;
            let found = glob_recursive(workspace, pattern);
            criterion.passed = found.len() <= max;
            criterion.detail = format!("{} found (max {})", found.len(), max);
        }
        CheckKind::DirExists => {
            let path = params.get("path").and_then(Value::as_str).unwrap_or("");
            criterion.passed = workspace.join(path).is_dir();
            criterion.detail = if criterion.passed {
                "exists".to_owned()
            } else {
                "missing".to_owned()
            };
        }
        CheckKind::NoFakeFiles => {
            let min_size = params.get("min_size").and_then(Value::as_u64).unwrap_or(1);
            let found = glob_recursive(workspace, pattern);
            if found.is_empty() {
                criterion.passed = false;
                criterion.detail = "no matching files".to_owned();
                return;
            }
            let mut fakes = Vec::new();
            for path in &found {
                match std::fs::metadata(path) {
                    Ok(meta) if meta.len() >= min_size => {
                        let head = read_head(path, 200);
                        if FAKE_MARKERS.iter().any(|m| head.to_lowercase().contains(m)) {
                            fakes.push(path.display().to_string());
                        }
                    }
                    _ => fakes.push(path.display().to_string()),
                }
            }
            criterion.passed = fakes.is_empty();
            criterion.detail = if fakes.is_empty() {
                format!("{} genuine", found.len())
            } else {
                format!("fake or undersized: {}", fakes.join(", "))
            };
        }
        CheckKind::CommandOk => {
            let command = params.get("command").and_then(Value::as_str).unwrap_or("");
            let out = sandbox
                .run(command, workspace, &HashMap::new(), Duration::from_secs(60), None)
                .await;
            criterion.passed = out.rc == 0;
            criterion.detail = format!("rc={}", out.rc);
        }
    }
}

fn read_head(path: &Path, n: usize) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes[..bytes.len().min(n)]).into_owned())
        .unwrap_or_default()
}

/// Recursive glob rooted at `workspace`, with brace expansion
/// (`**/*.{ts,tsx}` expands to the union of both globs) and `.git`
/// excluded.
#[must_use]
pub fn glob_recursive(workspace: &Path, pattern: &str) -> Vec<std::path::PathBuf> {
    let mut results = Vec::new();
    for expanded in expand_braces(pattern) {
        let full = workspace.join(&expanded);
        let Some(full_str) = full.to_str() else {
            continue;
        };
        if let Ok(paths) = glob::glob(full_str) {
            for path in paths.flatten() {
                let in_git = path
                    .components()
                    .any(|c| c.as_os_str() == ".git");
                if !in_git && !results.contains(&path) {
                    results.push(path);
                }
            }
        }
    }
    results
}

/// Expand one level of `{a,b,c}` alternation into separate globs.
#[must_use]
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (pattern.find('{'), pattern.find('}')) else {
        return vec![pattern.to_owned()];
    };
    if close < open {
        return vec![pattern.to_owned()];
    }
    let prefix = &pattern[..open];
    let alts = &pattern[open + 1..close];
    let suffix = &pattern[close + 1..];
    alts.split(',')
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn sandbox() -> Sandbox {
        Sandbox::default()
    }

    #[test]
    fn brace_expansion_unions() {
        assert_eq!(expand_braces("**/*.{ts,tsx}"), vec!["**/*.ts", "**/*.tsx"]);
        assert_eq!(expand_braces("**/*.py"), vec!["**/*.py"]);
        assert_eq!(
            expand_braces("**/*.{test,spec}.{ts,js}"),
            vec!["**/*.test.ts", "**/*.test.js", "**/*.spec.ts", "**/*.spec.js"]
        );
    }

    #[tokio::test]
    async fn file_count_min_counts_recursively() {
        let dir = TempDir::new().unwrap();
        dir.child("a.py").write_str("print('a')").unwrap();
        dir.child("pkg/b.py").write_str("print('b')").unwrap();
        dir.child(".git/c.py").write_str("ignored").unwrap();

        let criteria = vec![Criterion::new(
            "py",
            "two python files",
            CheckKind::FileCountMin,
            serde_json::json!({"pattern": "**/*.py", "min": 2}),
        )];
        let report = run_checks(dir.path(), criteria, &sandbox()).await;
        assert!(report.all_passed, "{}", report.render());
        assert_eq!(report.criteria[0].detail, "2/2 found");
    }

    #[tokio::test]
    async fn missing_workspace_fails_everything() {
        let criteria = vec![Criterion::new(
            "x",
            "anything",
            CheckKind::FileExists,
            serde_json::json!({"pattern": "**/*"}),
        )];
        let report =
            run_checks(Path::new("/nonexistent-evidence-dir"), criteria, &sandbox()).await;
        assert!(!report.all_passed);
        assert!(report.criteria[0].detail.contains("workspace not found"));
    }

    #[tokio::test]
    async fn fake_files_detected() {
        let dir = TempDir::new().unwrap();
        dir.child("gradlew")
            .write_str(&format!("#!/bin/sh\n# placeholder script\n{}", "x".repeat(200)))
            .unwrap();

        let criteria = vec![Criterion::new(
            "real-gradlew",
            "gradlew is genuine",
            CheckKind::NoFakeFiles,
            serde_json::json!({"pattern": "**/gradlew", "min_size": 100}),
        )];
        let report = run_checks(dir.path(), criteria, &sandbox()).await;
        assert!(!report.all_passed);
        assert!(report.criteria[0].detail.contains("fake"));
    }

    #[tokio::test]
    async fn undersized_files_are_fake() {
        let dir = TempDir::new().unwrap();
        dir.child("gradlew").write_str("#!").unwrap();
        let criteria = vec![Criterion::new(
            "real-gradlew",
            "gradlew is genuine",
            CheckKind::NoFakeFiles,
            serde_json::json!({"pattern": "**/gradlew", "min_size": 100}),
        )];
        let report = run_checks(dir.path(), criteria, &sandbox()).await;
        assert!(!report.all_passed);
    }

    #[tokio::test]
    async fn command_ok_uses_exit_code() {
        let dir = TempDir::new().unwrap();
        let ok = vec![Criterion::new(
            "true",
            "true passes",
            CheckKind::CommandOk,
            serde_json::json!({"command": "true"}),
        )];
        assert!(run_checks(dir.path(), ok, &sandbox()).await.all_passed);

        let bad = vec![Criterion::new(
            "false",
            "false fails",
            CheckKind::CommandOk,
            serde_json::json!({"command": "false"}),
        )];
        assert!(!run_checks(dir.path(), bad, &sandbox()).await.all_passed);
    }

    #[test]
    fn default_criteria_by_type() {
        assert!(default_criteria("android-app").iter().any(|c| c.id == "manifest"));
        assert!(default_criteria("web-frontend").iter().any(|c| c.id == "package-json"));
        assert_eq!(default_criteria("mystery")[0].id, "has-files");
    }
}
