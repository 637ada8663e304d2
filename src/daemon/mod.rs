//! Daemon subsystem: the scheduled checking loop and signal handling.

pub mod loop_main;
pub mod signals;
