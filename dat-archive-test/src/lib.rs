//! Internal utilities to support testing.

pub mod logging;
pub mod poll;

pub use poll::eventually;
