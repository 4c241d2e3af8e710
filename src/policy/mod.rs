//! Failure classification and recovery policy.
//!
//! Both modules are pure: they look at a failure (and the item's attempt
//! counts) and decide what should happen, leaving every state change to
//! the dispatcher and item manager.

pub mod classifier;
pub mod retry;
