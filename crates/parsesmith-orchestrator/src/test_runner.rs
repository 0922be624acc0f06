//! Test runner for generated parser tests
//!
//! Runs the generated pytest module as a subprocess. Diagnostics come from
//! the JSON report the test writes; the `Mismatched columns: [...]` marker
//! in the output is only consulted when no report exists.

use crate::artifacts::TestArtifact;
use async_trait::async_trait;
use parsesmith_core::TestRunnerConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tokio::process::Command;

const FEEDBACK_OUTPUT_LINES: usize = 40;
const FEEDBACK_OUTPUT_CHARS: usize = 2000;

/// One structured finding from a test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Parser raised while loading or parsing
    ParserError { detail: String },
    /// Parser returned an empty frame
    EmptyOutput,
    /// Output and reference row counts differ
    RowCount { expected: usize, actual: usize },
    /// A shared column holds different values
    ColumnValues {
        column: String,
        #[serde(default)]
        detail: String,
    },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParserError { detail } => write!(f, "parser raised an exception: {}", detail),
            Self::EmptyOutput => write!(f, "parser returned no rows"),
            Self::RowCount { expected, actual } => {
                write!(f, "row count mismatch: expected {}, got {}", expected, actual)
            }
            Self::ColumnValues { column, detail } if detail.is_empty() => {
                write!(f, "values differ in column '{}'", column)
            }
            Self::ColumnValues { column, detail } => {
                write!(f, "values differ in column '{}': {}", column, detail)
            }
        }
    }
}

/// JSON report written by the generated test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub bank: String,
    pub passed: bool,
    #[serde(default)]
    pub expected_rows: Option<usize>,
    #[serde(default)]
    pub actual_rows: Option<usize>,
    #[serde(default)]
    pub mismatched_columns: Vec<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of running a generated test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    /// Runner exited with status zero
    pub success: bool,
    /// Columns whose values differ from the reference
    pub mismatches: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    /// Combined stdout and stderr
    pub output: String,
    /// Why the test could not be run at all
    pub error: Option<String>,
}

impl TestOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failed run with mismatch detail
    pub fn mismatched(columns: &[&str]) -> Self {
        Self {
            success: false,
            mismatches: columns.iter().map(|c| c.to_string()).collect(),
            diagnostics: columns
                .iter()
                .map(|c| Diagnostic::ColumnValues {
                    column: c.to_string(),
                    detail: String::new(),
                })
                .collect(),
            ..Self::default()
        }
    }

    /// The test could not be run
    pub fn not_run(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Runs a generated test module (allows mocking in tests)
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the test; failures to launch are reported as a failed outcome
    async fn run(&self, artifact: &TestArtifact) -> TestOutcome;
}

/// Runs tests through `<program> <args...> <test_path>` (pytest by default)
#[derive(Debug, Clone)]
pub struct PytestRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl PytestRunner {
    pub fn new(config: &TestRunnerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for PytestRunner {
    fn default() -> Self {
        Self::new(&TestRunnerConfig::default())
    }
}

#[async_trait]
impl TestRunner for PytestRunner {
    async fn run(&self, artifact: &TestArtifact) -> TestOutcome {
        if !artifact.test_path.exists() {
            tracing::warn!("Test artifact {} not found", artifact.test_path.display());
            return TestOutcome::not_run(format!(
                "test artifact {} not found",
                artifact.test_path.display()
            ));
        }

        remove_stale_report(&artifact.report_path).await;

        tracing::info!(
            "Running {} {} {}",
            self.program,
            self.args.join(" "),
            artifact.relative_test_path.display()
        );

        // The child runs inside root, so it gets the root-relative path
        let run = Command::new(&self.program)
            .args(&self.args)
            .arg(&artifact.relative_test_path)
            .current_dir(&artifact.root)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                tracing::error!(
                    "Test runner timed out after {} seconds",
                    self.timeout.as_secs()
                );
                return TestOutcome::not_run(format!(
                    "{} timed out after {} seconds",
                    self.program,
                    self.timeout.as_secs()
                ));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(
                    "Test runner '{}' not found. Install Python and pytest (pip install pytest pandas).",
                    self.program
                );
                return TestOutcome::not_run(format!("{} not found", self.program));
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to run {}: {}", self.program, e);
                return TestOutcome::not_run(format!("failed to run {}: {}", self.program, e));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!("Test stdout:\n{}", stdout);
        tracing::debug!("Test stderr:\n{}", stderr);

        let combined = combine_output(&stdout, &stderr);
        let success = output.status.success();

        let (mismatches, diagnostics) = match read_report(&artifact.report_path).await {
            Some(report) => (report.mismatched_columns, report.diagnostics),
            None => (parse_mismatch_marker(&combined), Vec::new()),
        };

        TestOutcome {
            success,
            mismatches,
            diagnostics,
            output: combined,
            error: None,
        }
    }
}

/// Join stdout and stderr so their boundary always falls on a line break
fn combine_output(stdout: &str, stderr: &str) -> String {
    if stdout.is_empty() || stderr.is_empty() || stdout.ends_with('\n') {
        format!("{}{}", stdout, stderr)
    } else {
        format!("{}\n{}", stdout, stderr)
    }
}

async fn remove_stale_report(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove stale report {}: {}", path.display(), e);
        }
    }
}

async fn read_report(path: &Path) -> Option<TestReport> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!("Ignoring unreadable test report {}: {}", path.display(), e);
            None
        }
    }
}

fn mismatch_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"Mismatched columns:\s*\[(.*?)\]").expect("mismatch marker regex is valid")
    })
}

/// Extract column names from `Mismatched columns: [...]` markers
///
/// Names are unquoted and de-duplicated in order of first appearance.
pub fn parse_mismatch_marker(text: &str) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();

    for caps in mismatch_marker().captures_iter(text) {
        let Some(inner) = caps.get(1) else { continue };
        for name in inner.as_str().split(',') {
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"').trim();
            if !name.is_empty() && !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        }
    }

    columns
}

/// Format a failed outcome for inclusion in the next generation prompt
pub fn format_feedback_for_prompt(outcome: &TestOutcome) -> String {
    if outcome.success {
        return String::new();
    }

    let mut feedback = String::new();

    if let Some(error) = &outcome.error {
        feedback.push_str(&format!("The test could not be run: {}\n", error));
        return feedback;
    }

    if !outcome.mismatches.is_empty() {
        feedback.push_str(&format!(
            "Mismatched columns: {}\n",
            outcome.mismatches.join(", ")
        ));
    }

    if !outcome.diagnostics.is_empty() {
        feedback.push_str("Test diagnostics:\n");
        for diagnostic in &outcome.diagnostics {
            feedback.push_str(&format!("- {}\n", diagnostic));
        }
    }

    if outcome.diagnostics.is_empty() && !outcome.output.trim().is_empty() {
        feedback.push_str("Test output (tail):\n```\n");
        feedback.push_str(&output_tail(&outcome.output));
        feedback.push_str("\n```\n");
    }

    if feedback.is_empty() {
        feedback.push_str("The test failed without further detail.\n");
    }

    feedback
}

fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.trim().lines().collect();
    let start = lines.len().saturating_sub(FEEDBACK_OUTPUT_LINES);
    let tail = lines[start..].join("\n");

    let count = tail.chars().count();
    if count > FEEDBACK_OUTPUT_CHARS {
        let kept: String = tail.chars().skip(count - FEEDBACK_OUTPUT_CHARS).collect();
        format!("...[truncated]{}", kept)
    } else {
        tail
    }
}

/// Scripted test runner for testing
///
/// Outcomes are consumed in order; once exhausted every run fails.
#[derive(Debug, Default)]
pub struct MockTestRunner {
    outcomes: Mutex<VecDeque<TestOutcome>>,
    runs: Mutex<Vec<TestArtifact>>,
}

impl MockTestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, outcome: TestOutcome) -> Self {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
        self
    }

    /// Artifacts passed to `run` so far
    pub fn runs(&self) -> Vec<TestArtifact> {
        self.runs.lock().map(|runs| runs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    async fn run(&self, artifact: &TestArtifact) -> TestOutcome {
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(artifact.clone());
        }

        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| TestOutcome::not_run("no scripted outcome left"))
    }
}
