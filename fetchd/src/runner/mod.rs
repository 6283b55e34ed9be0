//! Spawning and supervising external tool processes.

pub mod adapter;
pub mod classify;
pub mod tool;

pub use adapter::{Outcome, ProcessAdapter};
pub use tool::{GrabberTool, ToolCommand};
