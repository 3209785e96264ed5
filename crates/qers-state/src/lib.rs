//! QERS-State: report persistence for batch evaluation
//!
//! Stores finalized batch reports, cached gap evaluations and job status
//! records as whole JSON documents.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic visibility of documents and interchangeable backends.
//!
//! ## Key Components
//!
//! - `ReportStore`: the async storage trait
//! - `MemoryReportStore`: process-local store (default)
//! - `FsReportStore`: one JSON file per document, atomic rename on write
//! - `SurrealReportStore`: SurrealDB tables (`mem://`, `surrealkv://`, remote)

mod error;
pub mod fs_store;
pub mod memory;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fs_store::FsReportStore;
pub use memory::MemoryReportStore;
pub use storage_traits::{validate_key, ReportKind, ReportStore, StorageResult, MAX_KEY_LEN};
pub use surreal_store::SurrealReportStore;
