//! Bank Claims Orchestrator
//!
//! Routes customer messages from a banking chat channel through a cheap
//! triage model and, when needed, a specialist model that can call the
//! core-banking API:
//! - Fast paths skip the triage model for unambiguous intents
//! - Per-customer session state (history window, investor questionnaire)
//! - Model-emitted tool arguments are validated against real banking data
//!   before anything reaches a money-moving endpoint
//! - Rate limits are retried once; money-moving writes never are
//!
//! FLOW:
//! CLAIM → TRIAGE (fast path | classify) → CONTEXT → SPECIALIST → TOOLS → RESOLUTION

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod inference;
pub mod memory;
pub mod models;
pub mod normalizer;
pub mod processor;
pub mod questionnaire;
pub mod state;
pub mod tools;
pub mod triage;

#[cfg(test)]
mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use processor::ClaimProcessor;
