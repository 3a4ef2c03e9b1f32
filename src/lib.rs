// Listing Sync - Core Library
// Reconciles XML property feeds into durable current/sold collections and
// publishes the result.

pub mod archiver;
pub mod batch;
pub mod config;
pub mod db;
pub mod filter;
pub mod normalizer;
pub mod parser;
pub mod publisher;
pub mod reconciliation;

// Re-export commonly used types
pub use archiver::FileArchiver;
pub use batch::{
    Archiver, BatchDriver, BatchRecord, BatchReport, ErrorPolicy, NoopArchiver, RecordFailure,
};
pub use config::{BuildHookConfig, Config};
pub use db::{Collection, Listing, ListingStatus, ListingStore, CURRENT, SOLD};
pub use filter::AgentFilter;
pub use normalizer::{normalize, ShapeError};
pub use parser::{parse_feed, ParseError, RawRecord};
pub use publisher::{publish_json, Publisher};
pub use reconciliation::{
    ReconcileAction, ReconciliationEngine, ValidationError, DEFAULT_SOLD_LIMIT,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
