//! Utility functions and helpers

mod timer;

pub use timer::{PhaseTimer, Timer};
