//! Infrastructure layer.
//!
//! Technical concerns that support the application without containing
//! orchestration logic: configuration loading and logging setup.

pub mod config;
