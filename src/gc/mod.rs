//! Arena allocation and compacting reclamation

pub mod arena;
pub mod collector;

pub use arena::Arena;
pub use collector::{GcStats, collect};
