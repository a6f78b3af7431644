// Service Archive - Core Library
// Historical import of tailoring-service records: parse, normalize, dedup, store

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod report;
pub mod storage;

// Re-export commonly used types
pub use config::{DefaultPaths, ImportConfig};
pub use db::{get_events_for_entity, insert_event, setup_database, Event, SqliteStore};
pub use dedup::{DuplicatePolicy, DuplicateResolver, DEFAULT_TOLERANCE};
pub use error::{ImportError, ImportResult, LineError};
pub use executor::{ImportExecutor, ImportOptions, JobState, PreparedBatch};
pub use model::{CanonicalRecord, ServiceStatus, ServiceType};
pub use normalizer::{AmountBasis, AmountBases, Normalizer, TypeMapping, TypeMappingTable};
pub use parser::{
    detect_format, get_parser, read_source, ParseOutput, RawRecord, RecordParser, SourceFormat,
    SpaceDelimitedParser, StructuredRowParser, TabDelimitedParser, TestRecordFilter,
};
pub use report::{CommitReport, DryRunReport, ErrorCollector, ImportReport, ImportStats};
pub use storage::{MemoryStore, ServiceFilter, ServiceStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
