//! Persistence layer modules.

pub mod db;
pub mod history_repo;
pub mod item_repo;
pub mod schema;
