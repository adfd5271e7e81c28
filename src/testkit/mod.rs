//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`cloud`] - [`MemoryCloud`](cloud::MemoryCloud), an in-memory
//!   [`CloudProvider`](crate::port::CloudProvider) with scripted failures and
//!   boot behaviours.
//! - [`domain`] - Builders for roles and creation arguments.
//! - [`config`] - Canonical fast test configurations.

pub mod cloud;
pub mod config;
pub mod domain;
