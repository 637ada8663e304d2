//! Protective-mode control: the lock-store capability and its backends, the
//! decision pass over a system report, and the scan-then-decide check cycle.

pub mod cycle;
pub mod lock_store;
pub mod memcached;
pub mod mode;
