//! Depositor Core Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Session-based deposit of content files into a repository.
//!
//! A client registers a [`Configuration`] describing where content belongs,
//! then submits files against it. Each accepted file is handed to an
//! [`IngestionService`](ingest::IngestionService) by a background unit, and
//! its on-disk name records the outcome. When the configuration's monitoring
//! window closes, the [`LifecycleManager`] removes the session directory or
//! keeps it for inspection when some files could not be stored.
//!
//! # Example
//!
//! ```no_run
//! use depositor_core::{
//!     clock::SystemClock, config::ServiceConfig, ingest::DirectoryIngestionService,
//!     LifecycleManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::load()?;
//!     let service = Arc::new(DirectoryIngestionService::new(&config.service_root));
//!     let manager = LifecycleManager::start(config, service, Arc::new(SystemClock))?;
//!
//!     let xml = std::fs::read_to_string("configuration.xml")?;
//!     manager.register_xml(&xml)?;
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod configuration;
pub mod content_file;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod properties;
pub mod store;

pub use configuration::Configuration;
pub use content_file::{ContentFile, FileState};
pub use error::{DepositError, DepositResult, IngestError};
pub use lifecycle::{
    Accepted, ConfigurationStatus, FileStatus, LifecycleManager, LifecycleState, ReapOutcome,
    UnitStatus,
};
