//! Code generation: turning a plan step plus a model response into a
//! verified-ready action program.
//!
//! The model authors a JSON action program; this crate assembles the
//! prompt, parses the (often decorated) response, and applies a fixed
//! sequence of deterministic rewrite passes so that known model mistakes
//! never reach the verifier.
//!
//! # Modules
//!
//! - [`error`]: CodegenError enum
//! - [`prompt`]: base + per-service prompt assembly and correction headings
//! - [`parse`]: fence stripping and JSON extraction
//! - [`rewrite`]: alias canonicalization, placeholder substitution, and
//!   structural fixups
//! - [`generator`]: end-to-end finalization and multi-step batching

pub mod error;
pub mod generator;
pub mod parse;
pub mod prompt;
pub mod rewrite;

pub use error::CodegenError;
pub use generator::{batch_program, batchable, default_safety_tier, finalize_program};
pub use parse::{extract_json_object, parse_program, strip_fences};
pub use prompt::{build_codegen_prompt, CorrectionKind, FALLBACK_BASE_PROMPT};
pub use rewrite::{canonical_service, service_for_action};
