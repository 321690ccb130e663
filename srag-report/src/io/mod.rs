//! Side-effecting collaborators and helpers used by the workflow Tasks.

pub mod columns;
pub mod config;
pub mod dataset;
pub mod http;
pub mod llm;
pub mod news;
pub mod prompt;
pub mod rate_limit;
pub mod render;
pub mod retry;
