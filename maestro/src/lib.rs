#![cfg_attr(docsrs, feature(doc_cfg))]
//! Maestro is a multi-agent mission orchestration engine: it drives teams
//! of LLM-backed agents through structured collaboration patterns to
//! execute long-running software-engineering missions end-to-end.
//!
//! # Architecture
//!
//! - [`pattern`] — the execution engine for one collaboration topology
//!   (solo, sequential, parallel, loop, hierarchical, network, router,
//!   aggregator, wave, human-in-the-loop), with context-rot compression
//!   and streaming events.
//! - [`executor`] — the per-agent runtime: prompt assembly, the LLM
//!   tool-calling loop, role-based tool filtering, artifact recording.
//! - [`mission`] — the orchestrator walking workflow phases with sprint
//!   iteration, evidence gates, reloop on failure, and feedback hooks.
//! - [`watchdog`] — stall detection, zombie cleanup, and bounded
//!   auto-resume.
//! - [`sandbox`] — subprocess isolation with process-group kill.
//! - [`guard`] — adversarial output validation and tool-call guardrails.
//! - [`bus`] — per-session bounded event streams for SSE fan-out.
//! - [`store`] — repository traits plus the SQLite implementation.
//!
//! The engine consumes LLM providers only through the
//! [`llm::ChatProvider`] trait; a scripted [`llm::MockProvider`] backs
//! the test suite.

pub mod bus;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod llm;
pub mod message;
pub mod mission;
pub mod model;
pub mod pattern;
pub mod prelude;
pub mod sandbox;
pub mod store;
pub mod tool;
pub mod util;
pub mod watchdog;

pub use error::{Error, Result};
