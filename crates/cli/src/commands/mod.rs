//! Command implementations

pub mod backup;
