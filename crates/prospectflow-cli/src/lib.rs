//! ProspectFlow CLI
//!
//! Inspects and maintains the orchestrator's stored sessions and states,
//! and runs a simulated enrichment run end to end.

pub mod commands;
pub mod error;
pub mod output;
pub mod router;
