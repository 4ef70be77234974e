//! # coachline-providers
//!
//! LLM backends used to classify free text that matched no command.

pub mod anthropic;
pub mod openai;

/// Response cap used when the context does not set one. Classification
/// replies are a single small JSON object.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 512;
