//! Lifecycle orchestration.
//!
//! Covers single-item dispatch, poll-driven scheduling, and the operator
//! API for moving items through their lifecycle.

pub mod dispatcher;
pub mod item_manager;
pub mod scheduler;
