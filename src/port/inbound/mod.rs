//! Inbound ports (driving side): what callers hand to the orchestration core.

pub mod operation;
