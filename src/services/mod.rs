//! Services
//!
//! Business logic: the job manager, iteration engine, prompt subsystem,
//! LLM gateway, source summarizer, template registry, and request validator.

pub mod analyzer;
pub mod llm;
pub mod prompts;
pub mod tasks;
pub mod templates;
pub mod validator;
pub mod workflow;
