//! Outbound event messages
//!
//! One JSON document per published iteration summarising the current PGD,
//! CMT and finite-fault estimates for an event. `RepublishPolicy` decides
//! whether an iteration changed enough to be worth publishing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::storage::IterationRecord;
use crate::types::{ActiveEvent, ModelKind, NodalPlane};

/// Hypocentre as announced by the alert feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypocenter {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
    pub origin_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PgdSummary {
    pub magnitude: f64,
    pub depth_km: f64,
    pub variance_reduction: f64,
    pub sites_used: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmtSummary {
    pub magnitude: f64,
    pub scalar_moment: f64,
    pub double_couple_pct: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    /// Harvard convention: Mrr, Mtt, Mpp, Mrt, Mrp, Mtp (N·m)
    pub tensor: [f64; 6],
    pub nodal_planes: [NodalPlane; 2],
    pub variance_reduction: f64,
    pub sites_used: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlipPatch {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub length_km: f64,
    pub width_km: f64,
    pub slip: f64,
    pub rake: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfSummary {
    pub strike: f64,
    pub dip: f64,
    pub magnitude: f64,
    pub moment: f64,
    pub variance_reduction: f64,
    pub sites_used: usize,
    pub patches: Vec<SlipPatch>,
}

/// Published per-iteration summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_id: String,
    pub version: u32,
    pub iteration: u32,
    /// Scheduler time of the iteration (epoch seconds)
    pub time: f64,
    pub hypocenter: Hypocenter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pgd: Option<PgdSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmt: Option<CmtSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ff: Option<FfSummary>,
}

impl EventMessage {
    pub fn from_iteration(record: &IterationRecord, iteration: u32) -> Self {
        let pgd = record.pgd.as_ref().map(|r| PgdSummary {
            magnitude: r.magnitude(),
            depth_km: r.depth_km(),
            variance_reduction: r.variance_reduction[r.optimum],
            sites_used: r.sites_used,
        });

        let cmt = record.cmt.as_ref().map(|r| {
            let (depth_km, latitude, longitude) = r.location(r.optimum);
            CmtSummary {
                magnitude: r.decomposition.magnitude,
                scalar_moment: r.decomposition.scalar_moment,
                double_couple_pct: r.decomposition.double_couple_pct,
                latitude,
                longitude,
                depth_km,
                tensor: r.tensors[r.optimum].to_harvard(),
                nodal_planes: r.decomposition.planes,
                variance_reduction: r.variance_reduction[r.optimum],
                sites_used: r.sites_used,
            }
        });

        let ff = record.ff.as_ref().map(|r| {
            let best = r.best();
            FfSummary {
                strike: best.strike,
                dip: best.dip,
                magnitude: best.magnitude,
                moment: best.moment,
                variance_reduction: r.variance_reduction[r.optimum],
                sites_used: r.sites_used,
                patches: best
                    .patches
                    .iter()
                    .map(|p| SlipPatch {
                        latitude: p.latitude,
                        longitude: p.longitude,
                        depth_km: p.depth_km,
                        length_km: p.length_km,
                        width_km: p.width_km,
                        slip: p.slip(),
                        rake: p.rake(),
                    })
                    .collect(),
            }
        });

        Self {
            event_id: record.event.id.clone(),
            version: record.event.version,
            iteration,
            time: record.time,
            hypocenter: hypocenter(&record.event),
            pgd,
            cmt,
            ff,
        }
    }

    /// Finite magnitude estimates, indexed PGD, CMT, FF
    pub fn magnitudes(&self) -> [Option<f64>; 3] {
        let finite = |m: f64| m.is_finite().then_some(m);
        [
            self.pgd.as_ref().and_then(|s| finite(s.magnitude)),
            self.cmt.as_ref().and_then(|s| finite(s.magnitude)),
            self.ff.as_ref().and_then(|s| finite(s.magnitude)),
        ]
    }

    pub fn has_estimate(&self) -> bool {
        self.magnitudes().iter().any(Option::is_some)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn hypocenter(event: &ActiveEvent) -> Hypocenter {
    Hypocenter {
        latitude: event.latitude,
        longitude: event.longitude,
        depth_km: event.depth_km,
        magnitude: event.magnitude,
        origin_time: event.origin_time,
    }
}

const MODELS: [ModelKind; 3] = [ModelKind::Pgd, ModelKind::Cmt, ModelKind::Ff];

/// Publish only first estimates and magnitude changes of at least `delta`.
///
/// State is keyed by the lowercased event id so updates with different
/// casing share history.
#[derive(Debug, Clone)]
pub struct RepublishPolicy {
    delta: f64,
    last: HashMap<String, [Option<f64>; 3]>,
}

impl RepublishPolicy {
    pub fn new(delta: f64) -> Self {
        Self { delta, last: HashMap::new() }
    }

    /// Whether `message` should go out. Does not record anything.
    pub fn should_publish(&self, message: &EventMessage) -> bool {
        let previous = self.last.get(&message.event_id.to_lowercase()).copied().unwrap_or_default();
        message.magnitudes().into_iter().zip(previous).any(|pair| match pair {
            (Some(_), None) => true,
            (Some(now), Some(before)) => (now - before).abs() >= self.delta,
            (None, _) => false,
        })
    }

    /// Record a published message. Models absent from it keep their last value.
    pub fn mark_published(&mut self, message: &EventMessage) {
        let entry = self.last.entry(message.event_id.to_lowercase()).or_default();
        for (slot, magnitude) in entry.iter_mut().zip(message.magnitudes()) {
            if magnitude.is_some() {
                *slot = magnitude;
            }
        }
    }

    pub fn forget(&mut self, event_id: &str) {
        self.last.remove(&event_id.to_lowercase());
    }

    /// Last published magnitude for one model
    pub fn last_published(&self, event_id: &str, model: ModelKind) -> Option<f64> {
        let index = MODELS.iter().position(|m| *m == model)?;
        self.last.get(&event_id.to_lowercase())?[index]
    }
}
