//! # parsesmith-core
//!
//! Core types for parsesmith, a tool that asks a language model for a bank
//! statement parser, tests it against reference data and retries on failure.
//!
//! - [`BankId`]: validated identifier for the statement format
//! - [`ArtifactLayout`]: where parsers, tests, reports and reference data live
//! - [`WorkflowState`]: state mutated across attempts of one run
//! - [`ParseSmithConfig`]: `.parsesmith/config.toml`

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    GenerationConfig, LayoutConfig, ParseSmithConfig, RetryConfig, SyntaxCheckConfig,
    TestRunnerConfig, CONFIG_FILE, DEFAULT_MAX_ATTEMPTS,
};
pub use error::{ParseSmithError, Result};
pub use types::*;
