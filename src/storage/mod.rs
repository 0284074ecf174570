//! Result persistence
//!
//! Per-event iteration archive backed by sled, with an in-memory twin for
//! tests and dry runs.

pub mod archive;

pub use archive::{ArchiveError, ArchiveSink, InMemoryArchive, IterationRecord, SledArchive, StoredIteration};
