//! Per-scope registry of entity containers and relation end points.

mod manager;

pub use manager::{DataManager, DeleteOutcome};
