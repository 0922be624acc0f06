//! Activity Logger - Human-readable attempt log in `.parsesmith/activity.md`
//!
//! Records run starts, each attempt's generation and test outcome, and the
//! final summary. Every write is fail-open: a broken log never stops a run.

use crate::loop_engine::{RunReport, StopReason};
use crate::test_runner::TestOutcome;
use chrono::Utc;
use parsesmith_agent::Generation;
use parsesmith_core::fail_open::fail_open;
use parsesmith_core::ParseSmithError;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Maximum character length for test output in the log preview
const ACTIVITY_LOG_PREVIEW_CHARS: usize = 500;

/// Activity logger for retry loop attempts
pub struct ActivityLogger {
    output_dir: PathBuf,
    output_path: PathBuf,
}

impl ActivityLogger {
    pub fn new(parsesmith_dir: PathBuf) -> Self {
        Self {
            output_path: parsesmith_dir.join("activity.md"),
            output_dir: parsesmith_dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Start a fresh log for a run (truncates any previous log)
    pub async fn log_run_start(&self, bank: &str, max_attempts: usize) {
        fail_open("activity_logger::log_run_start", || async {
            tokio::fs::create_dir_all(&self.output_dir).await?;

            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "# Parsesmith Activity Log\n\n## Bank: {}\n**Started**: {}\n**Max Attempts**: {}\n\n---\n\n",
                bank, timestamp, max_attempts
            );

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;

            Ok::<_, ParseSmithError>(())
        })
        .await;
    }

    pub async fn log_attempt_start(&self, attempt: usize, max: usize) {
        fail_open("activity_logger::log_attempt_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!("### Attempt {}/{}\n**Time**: {}\n\n", attempt, max, timestamp);
            self.append_internal(&content).await
        })
        .await;
    }

    /// Log what was generated and how the test went
    pub async fn log_attempt_complete(
        &self,
        attempt: usize,
        generation: &Generation,
        outcome: &TestOutcome,
    ) {
        fail_open("activity_logger::log_attempt_complete", || async {
            let mut content = String::new();

            content.push_str(&format!("**Attempt {} completed**\n\n", attempt));

            match generation.failure() {
                None => content.push_str("**Parser**: generated\n\n"),
                Some(cause) => {
                    content.push_str(&format!("**Parser**: fallback ({})\n\n", cause))
                }
            }

            let status = if outcome.success { "PASS" } else { "FAIL" };
            content.push_str(&format!("**Test**: {}\n\n", status));

            if let Some(error) = &outcome.error {
                content.push_str(&format!("**Error**: {}\n\n", error));
            }

            if !outcome.mismatches.is_empty() {
                content.push_str("**Mismatched Columns**:\n");
                for column in &outcome.mismatches {
                    content.push_str(&format!("- {}\n", column));
                }
                content.push('\n');
            }

            if !outcome.diagnostics.is_empty() {
                content.push_str("**Diagnostics**:\n");
                for diagnostic in &outcome.diagnostics {
                    content.push_str(&format!("- {}\n", diagnostic));
                }
                content.push('\n');
            }

            if !outcome.success && !outcome.output.trim().is_empty() {
                let output = outcome.output.trim();
                let preview = if output.chars().count() > ACTIVITY_LOG_PREVIEW_CHARS {
                    let truncated: String =
                        output.chars().take(ACTIVITY_LOG_PREVIEW_CHARS).collect();
                    format!("{truncated}...")
                } else {
                    output.to_string()
                };

                content.push_str("**Test Output** (truncated):\n> ");
                content.push_str(&preview.replace('\n', "\n> "));
                content.push_str("\n\n");
            }

            content.push_str("---\n\n");

            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_run_complete(&self, report: &RunReport) {
        fail_open("activity_logger::log_run_complete", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

            let (icon, text) = if report.success {
                ("✓", "Test passed")
            } else {
                ("✗", "Test failed")
            };

            let stop_reason = match &report.stop_reason {
                StopReason::Succeeded => "Succeeded".to_string(),
                StopReason::MaxAttempts => "Max attempts reached".to_string(),
                StopReason::Error(message) => format!("Error: {}", message),
            };

            let mut content = format!(
                "## Run Summary\n\n\
                **Completed**: {}\n\
                **Total Attempts**: {}\n\
                **Success**: {} {}\n\
                **Stop Reason**: {}\n",
                timestamp, report.attempts, icon, text, stop_reason
            );

            if !report.mismatches.is_empty() {
                content.push_str(&format!(
                    "**Mismatched Columns**: {}\n",
                    report.mismatches.join(", ")
                ));
            }
            content.push('\n');

            self.append_internal(&content).await
        })
        .await;
    }

    async fn append_internal(&self, content: &str) -> parsesmith_core::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}
