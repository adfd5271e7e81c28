//! Outbound ports (driven side): interfaces implemented by outbound adapters.
//!
//! The only infrastructure dependency of the orchestration core is the cloud
//! control plane.

pub mod cloud;
