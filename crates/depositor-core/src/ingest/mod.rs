//! Hand-off of stored content to the external ingestion service

pub mod directory;
pub mod service;
pub mod unit;

pub use directory::DirectoryIngestionService;
pub use service::{IngestionService, StoreRequest, StoredChecksum, CONTENT_CATEGORY};
pub use unit::{IngestUnit, UnitReport};
