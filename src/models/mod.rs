//! Domain model module declarations.

pub mod failure;
pub mod history;
pub mod item;
