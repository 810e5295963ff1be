//! Prompt module for LLM-based operations.
//!
//! This module provides the prompt templates sent to the text-generation service.

pub mod summarize;

pub use summarize::*;
