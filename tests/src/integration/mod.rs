//! Cross-crate integration scenarios.

pub mod archive_flow;
pub mod compression;
pub mod recovery;
