//! Centralized configuration constants.
//!
//! Interdependent values live together so a change to one is visible next to
//! the values that must move with it.

pub mod constants;
pub use constants::*;
