//! Patent Cascade - Backend Library
//!
//! A single-process HTTP service orchestrating a multi-round writer/reviewer
//! pipeline that drafts Chinese invention patents via a remote LLM. It
//! provides:
//! - An asynchronous job manager with a bounded worker pool
//! - The iterative writer → reviewer round state machine
//! - A prompt assembly engine with user-custom prompts and dynamic markers
//! - A serialized, retrying LLM gateway
//! - Durable per-round conversation persistence on SQLite

pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use utils::error::{AppError, AppResult};
