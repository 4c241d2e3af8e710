#![forbid(unsafe_code)]

//! `cast-dispatch`: scheduling and dispatch engine for persona-driven
//! social media content.
//!
//! Content items move through a compare-and-set lifecycle
//! (`draft → approved → scheduled → sent | failed`), are delivered through
//! pluggable backends, and recover from classified failures by policy.

pub mod backend;
pub mod clock;
pub mod config;
pub mod content;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod policy;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
