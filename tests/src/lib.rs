//! # chain-archive Test Suite
//!
//! Unified test crate containing cross-crate integration scenarios:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── archive_flow.rs   # register → archive → query, end to end
//!     ├── recovery.rs       # crash recovery over the real segment log
//!     └── compression.rs    # compress / decompress / reap round trips
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p archive-tests
//!
//! # By scenario
//! cargo test -p archive-tests integration::archive_flow
//! cargo test -p archive-tests integration::recovery
//! cargo test -p archive-tests integration::compression
//! ```

#![allow(dead_code)]

pub mod integration;
