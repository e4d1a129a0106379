//! Step definitions for task engine behaviour scenarios.

pub mod given;
pub mod when;
pub mod world;
