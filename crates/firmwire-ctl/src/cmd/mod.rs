//! CLI command modules.

pub mod envelope;
pub mod keys;
pub mod publish;
