//! Retry controller driving generate → write → test → decide
//!
//! Control flow comes from the pure state machine: the controller performs
//! each returned action and feeds the resulting event back in. Every
//! attempt starts from a fresh prompt; the only carry-over between attempts
//! is the formatted outcome of the previous test run.

use crate::activity_logger::ActivityLogger;
use crate::artifacts::{ArtifactWriter, TestArtifact};
use crate::state_machine::{transition, Action, Event, State};
use crate::test_runner::{format_feedback_for_prompt, TestOutcome, TestRunner};
use parsesmith_agent::{CodeGenerator, CodeModel, Generation, GenerationRequest};
use parsesmith_core::{BankId, ParseSmithError, Result, WorkflowState};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Why a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Succeeded,
    MaxAttempts,
    Error(String),
}

/// One generate-and-test attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub generation: Generation,
    pub outcome: TestOutcome,
}

/// Final result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub bank: BankId,
    /// Attempts made, at most the configured maximum
    pub attempts: usize,
    pub success: bool,
    /// Mismatched columns from the last test run
    pub mismatches: Vec<String>,
    pub stop_reason: StopReason,
    pub parser_path: Option<PathBuf>,
    pub test_path: Option<PathBuf>,
    pub generations: Vec<AttemptRecord>,
}

impl RunReport {
    fn from_workflow(
        workflow: WorkflowState,
        stop_reason: StopReason,
        generations: Vec<AttemptRecord>,
    ) -> Self {
        Self {
            attempts: generations.len(),
            bank: workflow.bank,
            success: workflow.success,
            mismatches: workflow.mismatches,
            stop_reason,
            parser_path: workflow.parser_path,
            test_path: workflow.test_path,
            generations,
        }
    }
}

/// Runs the bounded retry loop for one bank
pub struct RetryController<M: CodeModel, R: TestRunner> {
    generator: CodeGenerator<M>,
    writer: ArtifactWriter,
    runner: R,
    max_attempts: usize,
    feedback_enabled: bool,
    activity_logger: Option<ActivityLogger>,
}

impl<M: CodeModel, R: TestRunner> RetryController<M, R> {
    /// Create a controller; `max_attempts` below one is treated as one
    pub fn new(
        generator: CodeGenerator<M>,
        writer: ArtifactWriter,
        runner: R,
        max_attempts: usize,
    ) -> Self {
        Self {
            generator,
            writer,
            runner,
            max_attempts: max_attempts.max(1),
            feedback_enabled: true,
            activity_logger: None,
        }
    }

    /// Include the previous attempt's test outcome in the next prompt
    pub fn with_feedback(mut self, enabled: bool) -> Self {
        self.feedback_enabled = enabled;
        self
    }

    /// Enable activity logging to `<dir>/activity.md`
    pub fn with_activity_logging(mut self, parsesmith_dir: PathBuf) -> Self {
        self.activity_logger = Some(ActivityLogger::new(parsesmith_dir));
        self
    }

    pub fn generator(&self) -> &CodeGenerator<M> {
        &self.generator
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Activity log location, when logging is enabled
    pub fn activity_log_path(&self) -> Option<&Path> {
        self.activity_logger.as_ref().map(|logger| logger.path())
    }

    /// Run the loop until the test passes or attempts are exhausted
    ///
    /// A failing test is not an error: it is reported through
    /// [`RunReport::success`]. Only artifact write failures return `Err`.
    pub async fn run(&self, bank: &BankId) -> Result<RunReport> {
        info!("Starting parser generation for bank: {}", bank);

        if let Some(logger) = &self.activity_logger {
            logger.log_run_start(bank.as_str(), self.max_attempts).await;
        }

        let mut workflow = WorkflowState::new(bank.clone());
        let mut generations: Vec<AttemptRecord> = Vec::new();
        let mut feedback: Option<String> = None;
        let mut artifact: Option<TestArtifact> = None;
        let mut generation: Option<Generation> = None;
        let mut write_error: Option<ParseSmithError> = None;

        let (mut state, mut actions) = transition(
            State::Idle,
            Event::Start {
                bank: bank.to_string(),
            },
            self.max_attempts,
        );

        loop {
            let mut next_event = None;

            for action in actions {
                match action {
                    Action::LogActivity { message } => info!("{}", message),

                    Action::Generate { attempt } => {
                        workflow.attempt = attempt;
                        info!("=== Attempt {} of {} ===", attempt, self.max_attempts);
                        if let Some(logger) = &self.activity_logger {
                            logger.log_attempt_start(attempt, self.max_attempts).await;
                        }

                        let request = GenerationRequest {
                            bank,
                            attempt,
                            max_attempts: self.max_attempts,
                            feedback: feedback.as_deref().filter(|_| self.feedback_enabled),
                        };
                        let generated = self.generator.generate(&request).await;

                        match self.write_artifacts(bank, &generated).await {
                            Ok((parser_path, written)) => {
                                workflow.parser_path = Some(parser_path);
                                workflow.test_path = Some(written.test_path.clone());
                                artifact = Some(written);
                                next_event = Some(Event::ArtifactsWritten);
                            }
                            Err(e) => {
                                error!("Attempt {}: {}", attempt, e);
                                next_event = Some(Event::Error {
                                    message: e.to_string(),
                                });
                                write_error = Some(e);
                            }
                        }
                        generation = Some(generated);
                    }

                    Action::RunTests { attempt } => {
                        let (artifact, generated) =
                            match pending_attempt(attempt, artifact.as_ref(), generation.take()) {
                                Ok(pending) => pending,
                                Err(event) => {
                                    next_event = Some(event);
                                    continue;
                                }
                            };

                        let outcome = self.runner.run(artifact).await;
                        workflow.success = outcome.success;
                        workflow.mismatches = outcome.mismatches.clone();

                        if outcome.success {
                            info!("Attempt {}: test passed", attempt);
                        } else {
                            warn!(
                                "Attempt {}: test failed, mismatched columns: {:?}",
                                attempt, outcome.mismatches
                            );
                        }

                        if let Some(logger) = &self.activity_logger {
                            logger
                                .log_attempt_complete(attempt, &generated, &outcome)
                                .await;
                        }

                        next_event = Some(if outcome.success {
                            Event::TestPassed
                        } else {
                            Event::TestFailed {
                                mismatches: outcome.mismatches.clone(),
                            }
                        });

                        feedback = Some(format_feedback_for_prompt(&outcome));
                        generations.push(AttemptRecord {
                            attempt,
                            generation: generated,
                            outcome,
                        });
                    }
                }
            }

            if state.is_terminal() {
                break;
            }

            let Some(event) = next_event else {
                state = State::Failed {
                    error: format!("no progress from state {:?}", state),
                };
                break;
            };

            debug!("State {:?} handling {:?}", state, event);
            (state, actions) = transition(state, event, self.max_attempts);
        }

        let stop_reason = match &state {
            State::Succeeded { .. } => StopReason::Succeeded,
            State::Exhausted { .. } => StopReason::MaxAttempts,
            State::Failed { error } => StopReason::Error(error.clone()),
            other => StopReason::Error(format!("stopped in non-terminal state {:?}", other)),
        };

        let report = RunReport::from_workflow(workflow, stop_reason, generations);

        if let Some(logger) = &self.activity_logger {
            logger.log_run_complete(&report).await;
        }

        if let Some(e) = write_error {
            return Err(e);
        }

        match &report.stop_reason {
            StopReason::Succeeded => info!(
                "Parser for {} passed on attempt {}",
                report.bank, report.attempts
            ),
            StopReason::MaxAttempts => warn!(
                "Max attempts ({}) reached for {}, mismatched columns: {:?}",
                self.max_attempts, report.bank, report.mismatches
            ),
            StopReason::Error(message) => error!("Run for {} failed: {}", report.bank, message),
        }

        Ok(report)
    }

    async fn write_artifacts(
        &self,
        bank: &BankId,
        generation: &Generation,
    ) -> Result<(PathBuf, TestArtifact)> {
        let parser_path = self.writer.write_parser(bank, generation.source()).await?;
        let artifact = self.writer.write_test(bank).await?;
        Ok((parser_path, artifact))
    }
}

/// Artifact and generation an attempt's test run needs, or the error event
fn pending_attempt(
    attempt: usize,
    artifact: Option<&TestArtifact>,
    generation: Option<Generation>,
) -> std::result::Result<(&TestArtifact, Generation), Event> {
    match (artifact, generation) {
        (Some(artifact), Some(generation)) => Ok((artifact, generation)),
        (None, _) => Err(Event::Error {
            message: format!("attempt {} has no test artifact to run", attempt),
        }),
        (Some(_), None) => Err(Event::Error {
            message: format!("attempt {} has no generated parser", attempt),
        }),
    }
}
