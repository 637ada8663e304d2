//! Volume monitoring: per-volume classification, the system report fold, and
//! the directory scanner that produces it.

pub mod report;
pub mod scanner;
pub mod volume;
