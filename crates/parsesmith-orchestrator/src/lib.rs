//! # parsesmith-orchestrator
//!
//! The generate → write → test → decide loop for parsesmith.
//!
//! This crate provides:
//! - Artifact writing for parser and test modules
//! - Test execution with structured reports
//! - A pure state machine and the retry controller that drives it
//! - Markdown activity logging

mod activity_logger;
mod artifacts;
mod loop_engine;
mod state_machine;
mod test_runner;

pub use activity_logger::ActivityLogger;
pub use artifacts::{render_test, ArtifactWriter, TestArtifact};
pub use loop_engine::{AttemptRecord, RetryController, RunReport, StopReason};
pub use state_machine::{transition, Action, Event, State};
pub use test_runner::{
    format_feedback_for_prompt, parse_mismatch_marker, Diagnostic, MockTestRunner, PytestRunner,
    TestOutcome, TestReport, TestRunner,
};
