//! # parsesmith-agent
//!
//! Generation backend client and parser code generation for parsesmith.
//!
//! - [`CodeModel`]: stateless prompt-in, text-out backend ([`ChatClient`]
//!   for OpenAI-compatible APIs, [`MockCodeModel`] for tests)
//! - [`CodeGenerator`]: prompt, extract, validate, and fall back when the
//!   reply is unusable
//!
//! Generation never returns an error. A [`Generation::Fallback`] carries the
//! default parser together with the [`GenerationFailure`] that triggered it.

mod auth;
mod client;
mod codegen;
mod prompt;
mod types;

pub use auth::get_api_key;
pub use client::{ChatClient, CodeModel, MockCodeModel};
pub use codegen::{
    extract_code, CodeGenerator, Generation, GenerationFailure, SyntaxCheck, ENTRY_POINT,
    FALLBACK_PARSER,
};
pub use prompt::{build_generation_prompt, GenerationRequest};
pub use types::{Completion, Usage};
