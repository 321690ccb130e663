//! SRAG surveillance report workflow.
//!
//! Two independent branches feed a barrier: the data branch downloads and
//! refines the SRAG dataset, the news branch searches and curates articles.
//! When both are ready the report Task renders the final HTML artifact.
//!
//! - **[`core`]**: Pure, deterministic logic (state merge, barrier, router,
//!   backoff). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (HTTP, CSV, LLM, rendering,
//!   configuration). Each sits behind a trait so tests can script it.
//!
//! Orchestration modules ([`tasks`], [`join`], [`graph`], [`engine`],
//! [`wiring`]) tie core logic to the collaborators.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod graph;
pub mod io;
pub mod join;
pub mod logging;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod wiring;
