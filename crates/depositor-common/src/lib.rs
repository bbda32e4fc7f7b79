//! Depositor Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the depositor workspace.
//!
//! # Overview
//!
//! - **Checksums**: digest algorithms selectable by name and a streaming
//!   store-and-digest copy used when content arrives
//! - **Error Handling**: the [`CommonError`] type and its result alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use depositor_common::checksum::{compute_file_checksum, ChecksumAlgorithm};
//!
//! fn print_digest(path: &str) -> depositor_common::Result<()> {
//!     let algorithm: ChecksumAlgorithm = "SHA-256".parse()?;
//!     let digest = compute_file_checksum(path, algorithm)?;
//!     tracing::info!(%digest, "computed digest");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use checksum::ChecksumAlgorithm;
pub use error::{CommonError, Result};
