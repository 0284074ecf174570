//! Iteration archive
//!
//! Every processing iteration of an active event is recorded with the
//! observations it used and the results it produced. Iteration numbers are
//! assigned by the archive by counting what is already stored for the event,
//! so they start at 1 and increase monotonically.
//!
//! - `SledArchive`: embedded sled database, bincode values
//! - `InMemoryArchive`: for tests and dry runs
//!
//! Sled keys are `event_id \0 iteration(u32 BE)` for iterations and
//! `event_id \0 "sites"` for the site metadata written once per event.
//! Values are bincode so undefined (NaN) estimates of skipped grid points
//! read back exactly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::defaults::SITES_RECORD;
use crate::types::{
    ActiveEvent, CmtResult, FfResult, OffsetObservation, PeakDisplacementObservation, PgdResult, SiteMetadata,
};

/// One iteration's inputs and outputs for an event.
///
/// A model whose inversion was withheld (insufficient data) has `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Event snapshot at the time of the iteration
    pub event: ActiveEvent,
    /// Scheduler clock (epoch seconds)
    pub time: f64,
    pub pgd_observations: Vec<PeakDisplacementObservation>,
    pub cmt_observations: Vec<OffsetObservation>,
    pub ff_observations: Vec<OffsetObservation>,
    pub pgd: Option<PgdResult>,
    pub cmt: Option<CmtResult>,
    pub ff: Option<FfResult>,
}

/// Stored iteration with archive bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIteration {
    pub iteration: u32,
    pub stored_at: DateTime<Utc>,
    pub record: IterationRecord,
}

/// Archive errors. Any of these is fatal to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive database error: {0}")]
    Database(String),
    #[error("archive serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for ArchiveError {
    fn from(e: sled::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<bincode::Error> for ArchiveError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Trait for archive backends
///
/// Implementations must be thread-safe (Send + Sync).
pub trait ArchiveSink: Send + Sync {
    /// Store the site metadata group for an event (first write wins).
    fn record_sites(&self, event_id: &str, sites: &[SiteMetadata]) -> Result<(), ArchiveError>;

    /// Store an iteration and return the number assigned to it.
    fn record_iteration(&self, record: &IterationRecord) -> Result<u32, ArchiveError>;

    /// Number of iterations stored for an event
    fn iteration_count(&self, event_id: &str) -> Result<u32, ArchiveError>;

    /// All iterations for an event, in order
    fn iterations(&self, event_id: &str) -> Result<Vec<StoredIteration>, ArchiveError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Sled
// ============================================================================

/// Sled-backed archive
#[derive(Clone)]
pub struct SledArchive {
    db: sled::Db,
}

fn event_prefix(event_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(event_id.len() + 1);
    key.extend_from_slice(event_id.as_bytes());
    key.push(0);
    key
}

fn iteration_key(event_id: &str, iteration: u32) -> Vec<u8> {
    let mut key = event_prefix(event_id);
    key.extend_from_slice(&iteration.to_be_bytes());
    key
}

fn sites_key(event_id: &str) -> Vec<u8> {
    let mut key = event_prefix(event_id);
    key.extend_from_slice(SITES_RECORD.as_bytes());
    key
}

impl SledArchive {
    /// Open or create the archive database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let db = sled::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Archive opened");
        Ok(Self { db })
    }

    /// Site metadata recorded for an event
    pub fn sites(&self, event_id: &str) -> Result<Option<Vec<SiteMetadata>>, ArchiveError> {
        match self.db.get(sites_key(event_id))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Iteration keys are exactly prefix + 4 bytes; the sites record is longer.
    fn iteration_keys(&self, event_id: &str) -> impl Iterator<Item = Result<(sled::IVec, sled::IVec), sled::Error>> {
        let prefix = event_prefix(event_id);
        let len = prefix.len() + 4;
        self.db
            .scan_prefix(prefix)
            .filter(move |item| item.as_ref().map_or(true, |(k, _)| k.len() == len))
    }
}

impl ArchiveSink for SledArchive {
    fn record_sites(&self, event_id: &str, sites: &[SiteMetadata]) -> Result<(), ArchiveError> {
        let value = bincode::serialize(sites)?;
        let inserted = self
            .db
            .compare_and_swap(sites_key(event_id), None as Option<&[u8]>, Some(value))?
            .is_ok();
        if inserted {
            self.db.flush()?;
            tracing::debug!(event_id = %event_id, sites = sites.len(), "Archived site metadata");
        }
        Ok(())
    }

    fn record_iteration(&self, record: &IterationRecord) -> Result<u32, ArchiveError> {
        let iteration = self.iteration_count(&record.event.id)? + 1;
        let stored = StoredIteration { iteration, stored_at: Utc::now(), record: record.clone() };
        let value = bincode::serialize(&stored)?;
        self.db.insert(iteration_key(&record.event.id, iteration), value)?;
        self.db.flush()?;
        tracing::debug!(event_id = %record.event.id, iteration = iteration, "Archived iteration");
        Ok(iteration)
    }

    fn iteration_count(&self, event_id: &str) -> Result<u32, ArchiveError> {
        let mut count = 0u32;
        for item in self.iteration_keys(event_id) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn iterations(&self, event_id: &str) -> Result<Vec<StoredIteration>, ArchiveError> {
        self.iteration_keys(event_id)
            .map(|item| {
                let (_, value) = item?;
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory archive for testing and dry runs
///
/// Thread-safe via `RwLock`. Not durable.
#[derive(Default)]
pub struct InMemoryArchive {
    sites: RwLock<HashMap<String, Vec<SiteMetadata>>>,
    iterations: RwLock<HashMap<String, Vec<StoredIteration>>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Site metadata recorded for an event
    pub fn sites(&self, event_id: &str) -> Option<Vec<SiteMetadata>> {
        self.sites.read().ok()?.get(event_id).cloned()
    }
}

fn lock_error<T>(e: std::sync::PoisonError<T>) -> ArchiveError {
    ArchiveError::Database(e.to_string())
}

impl ArchiveSink for InMemoryArchive {
    fn record_sites(&self, event_id: &str, sites: &[SiteMetadata]) -> Result<(), ArchiveError> {
        self.sites
            .write()
            .map_err(lock_error)?
            .entry(event_id.to_string())
            .or_insert_with(|| sites.to_vec());
        Ok(())
    }

    fn record_iteration(&self, record: &IterationRecord) -> Result<u32, ArchiveError> {
        let mut store = self.iterations.write().map_err(lock_error)?;
        let entries = store.entry(record.event.id.clone()).or_default();
        let iteration = entries.len() as u32 + 1;
        entries.push(StoredIteration { iteration, stored_at: Utc::now(), record: record.clone() });
        Ok(iteration)
    }

    fn iteration_count(&self, event_id: &str) -> Result<u32, ArchiveError> {
        let store = self.iterations.read().map_err(lock_error)?;
        Ok(store.get(event_id).map_or(0, |v| v.len() as u32))
    }

    fn iterations(&self, event_id: &str) -> Result<Vec<StoredIteration>, ArchiveError> {
        let store = self.iterations.read().map_err(lock_error)?;
        Ok(store.get(event_id).cloned().unwrap_or_default())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SiteKey;

    fn record(id: &str, magnitude: f64) -> IterationRecord {
        IterationRecord {
            event: ActiveEvent {
                id: id.to_string(),
                latitude: 38.0,
                longitude: 142.0,
                depth_km: 20.0,
                magnitude,
                origin_time: 0.0,
                version: 0,
            },
            time: 30.0,
            pgd_observations: Vec::new(),
            cmt_observations: Vec::new(),
            ff_observations: Vec::new(),
            pgd: Some(PgdResult {
                depths_km: vec![10.0, 20.0],
                magnitudes: vec![magnitude, magnitude + 0.1],
                variance_reduction: vec![0.9, 0.8],
                ranks: vec![1, 1],
                optimum: 0,
                sites_used: 5,
            }),
            cmt: None,
            ff: None,
        }
    }

    fn sites() -> Vec<SiteMetadata> {
        vec![SiteMetadata::new(SiteKey::new("UW", "ALBH", "LY", ""), 48.39, -123.49, 1.0)]
    }

    fn exercise(archive: &dyn ArchiveSink) {
        assert_eq!(archive.iteration_count("ev1").unwrap(), 0);
        assert_eq!(archive.record_iteration(&record("ev1", 7.0)).unwrap(), 1);
        assert_eq!(archive.record_iteration(&record("ev1", 7.2)).unwrap(), 2);
        assert_eq!(archive.record_iteration(&record("ev10", 5.0)).unwrap(), 1);
        archive.record_sites("ev1", &sites()).unwrap();

        // Sites record does not count as an iteration
        assert_eq!(archive.iteration_count("ev1").unwrap(), 2);
        assert_eq!(archive.iteration_count("ev10").unwrap(), 1);

        let stored = archive.iterations("ev1").unwrap();
        assert_eq!(stored.iter().map(|s| s.iteration).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(stored[1].record.event.magnitude, 7.2);
        assert_eq!(stored[0].record, record("ev1", 7.0));
    }

    #[test]
    fn test_in_memory_numbering() {
        let archive = InMemoryArchive::new();
        exercise(&archive);
        assert_eq!(archive.sites("ev1").unwrap(), sites());
        assert_eq!(archive.backend_name(), "InMemory");
    }

    #[test]
    fn test_sled_numbering_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let archive = SledArchive::open(dir.path()).unwrap();
            exercise(&archive);
        }
        let reopened = SledArchive::open(dir.path()).unwrap();
        assert_eq!(reopened.record_iteration(&record("ev1", 7.3)).unwrap(), 3);
        assert_eq!(reopened.sites("ev1").unwrap().unwrap(), sites());
        assert!(reopened.sites("ev10").unwrap().is_none());
    }

    #[test]
    fn test_sites_first_write_wins() {
        let archive = InMemoryArchive::new();
        archive.record_sites("ev1", &sites()).unwrap();
        archive.record_sites("ev1", &[]).unwrap();
        assert_eq!(archive.sites("ev1").unwrap().len(), 1);
    }

    #[test]
    fn test_sled_round_trips_undefined_estimates() {
        let dir = tempfile::tempdir().unwrap();
        let archive = SledArchive::open(dir.path()).unwrap();

        let mut skipped = record("ev", 6.0);
        if let Some(pgd) = skipped.pgd.as_mut() {
            pgd.magnitudes[1] = f64::NAN;
            pgd.variance_reduction[1] = f64::NAN;
        }
        archive.record_iteration(&skipped).unwrap();
        archive.record_iteration(&record("ev", 6.1)).unwrap();

        let stored = archive.iterations("ev").unwrap();
        assert_eq!(stored.len(), 2);
        let pgd = stored[0].record.pgd.as_ref().unwrap();
        assert_eq!(pgd.magnitudes[0], 6.0);
        assert!(pgd.magnitudes[1].is_nan());
        assert!(pgd.variance_reduction[1].is_nan());
        assert_eq!(stored[1].record, record("ev", 6.1));
    }
}
