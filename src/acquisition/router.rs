//! Buffer Router
//!
//! Matches decoded runs to monitored sites by exact (network, station,
//! channel-root, location) key, groups runs per (site, component) and orders
//! each group by start time so the merge walks the ring buffer sequentially.
//! Runs for sites that are not monitored are dropped; the incoming stream is
//! a superset of the site list.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use super::tracebuf::DecodedRun;
use crate::types::{Component, SiteKey, SiteMetadata};

/// Relative tolerance when comparing sampling periods inside a group
const DT_TOLERANCE: f64 = 1.0e-6;

/// Routing consistency faults
#[derive(Debug, Error, PartialEq)]
pub enum RoutingError {
    #[error("Routing invariant violated: {key} resolves to sites {sites:?}")]
    RoutingInvariantViolation { key: String, sites: Vec<usize> },
}

/// All runs for one (site, component), reassembled in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedRun {
    pub site: usize,
    pub component: Component,
    pub run: DecodedRun,
}

/// Router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RouteStats {
    pub routed: u64,
    pub unmatched: u64,
    pub violations: u64,
    /// Groups that needed an explicit sort
    pub resorted: u64,
}

/// Site lookup built once at startup.
#[derive(Debug)]
pub struct BufferRouter {
    index: HashMap<SiteKey, usize>,
    /// Keys shared by more than one site
    ambiguous: HashMap<SiteKey, Vec<usize>>,
    stats: RouteStats,
}

impl BufferRouter {
    pub fn new(sites: &[SiteMetadata]) -> Self {
        let mut owners: HashMap<SiteKey, Vec<usize>> = HashMap::with_capacity(sites.len());
        for (i, site) in sites.iter().enumerate() {
            owners.entry(site.key.clone()).or_default().push(i);
        }

        let mut index = HashMap::with_capacity(owners.len());
        let mut ambiguous = HashMap::new();
        for (key, list) in owners {
            if list.len() == 1 {
                index.insert(key, list[0]);
            } else {
                tracing::warn!(site = %key, sites = ?list, "Site key is not unique; its messages will be rejected");
                ambiguous.insert(key, list);
            }
        }

        Self { index, ambiguous, stats: RouteStats::default() }
    }

    /// Resolve a key to at most one site.
    pub fn resolve(&self, key: &SiteKey) -> Result<Option<usize>, RoutingError> {
        if let Some(sites) = self.ambiguous.get(key) {
            return Err(RoutingError::RoutingInvariantViolation {
                key: key.to_string(),
                sites: sites.clone(),
            });
        }
        Ok(self.index.get(key).copied())
    }

    /// Route a batch of runs. Output is ordered by site index, then component.
    pub fn route(&mut self, runs: Vec<DecodedRun>) -> Vec<RoutedRun> {
        let mut groups: BTreeMap<(usize, Component), Vec<DecodedRun>> = BTreeMap::new();

        for run in runs {
            let site = match self.resolve(&run.key) {
                Ok(Some(site)) => site,
                Ok(None) => {
                    self.stats.unmatched += 1;
                    tracing::debug!(site = %run.key, "No monitored site for message");
                    continue;
                }
                Err(e) => {
                    self.stats.violations += 1;
                    tracing::error!(error = %e, "Dropping message");
                    continue;
                }
            };
            let Some(component) = Component::from_channel(&run.channel) else {
                self.stats.unmatched += 1;
                tracing::debug!(site = %run.key, channel = %run.channel, "Unrecognised component");
                continue;
            };
            self.stats.routed += 1;
            groups.entry((site, component)).or_default().push(run);
        }

        groups
            .into_iter()
            .filter_map(|((site, component), group)| {
                self.reassemble(group).map(|run| RoutedRun { site, component, run })
            })
            .collect()
    }

    /// Order a group by start time and fold it into one multi-chunk run.
    fn reassemble(&mut self, mut group: Vec<DecodedRun>) -> Option<DecodedRun> {
        let sorted = group.windows(2).all(|w| w[0].start_time() <= w[1].start_time());
        if !sorted {
            group.sort_by(|a, b| a.start_time().total_cmp(&b.start_time()));
            self.stats.resorted += 1;
        }

        let mut iter = group.into_iter();
        let mut merged = iter.next()?;
        for run in iter {
            if (run.dt - merged.dt).abs() > DT_TOLERANCE * merged.dt {
                tracing::warn!(
                    site = %run.key,
                    expected_dt = merged.dt,
                    got_dt = run.dt,
                    "Sampling period changed within batch; dropping run"
                );
                continue;
            }
            merged.append(run);
        }
        Some(merged)
    }

    pub fn stats(&self) -> RouteStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::tracebuf::{decode_message, TraceBufBuilder};

    fn run(sta: &str, chan: &str, start: f64, samples: &[i32]) -> DecodedRun {
        let msg = TraceBufBuilder::new("CI", sta, chan, "")
            .start_time(start)
            .samples(samples)
            .build()
            .unwrap();
        decode_message(&msg).unwrap()
    }

    fn sites() -> Vec<SiteMetadata> {
        vec![
            SiteMetadata::new(SiteKey::new("CI", "AAA", "LY", ""), 34.0, -118.0, 1.0),
            SiteMetadata::new(SiteKey::new("CI", "BBB", "LY", ""), 34.5, -118.5, 1.0),
        ]
    }

    #[test]
    fn test_route_groups_and_sorts() {
        let mut router = BufferRouter::new(&sites());
        let routed = router.route(vec![
            run("BBB", "LYN", 20.0, &[3]),
            run("AAA", "LYZ", 10.0, &[1]),
            run("BBB", "LYN", 0.0, &[1, 2]),
            run("ZZZ", "LYZ", 0.0, &[9]),
        ]);

        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].site, 0);
        assert_eq!(routed[0].component, Component::Up);
        assert_eq!(routed[1].site, 1);
        assert_eq!(routed[1].component, Component::North);
        assert_eq!(routed[1].run.samples, vec![1, 2, 3]);
        assert_eq!(routed[1].run.chunks.len(), 2);
        assert_eq!(routed[1].run.start_time(), 0.0);

        let stats = router.stats();
        assert_eq!(stats.routed, 3);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.resorted, 1);
    }

    #[test]
    fn test_sorted_group_skips_resort() {
        let mut router = BufferRouter::new(&sites());
        router.route(vec![run("AAA", "LYE", 0.0, &[1]), run("AAA", "LYE", 1.0, &[2])]);
        assert_eq!(router.stats().resorted, 0);
    }

    #[test]
    fn test_duplicate_site_key_is_violation() {
        let mut dup = sites();
        dup.push(SiteMetadata::new(SiteKey::new("CI", "AAA", "LY", ""), 35.0, -119.0, 1.0));
        let mut router = BufferRouter::new(&dup);

        assert!(matches!(
            router.resolve(&SiteKey::new("CI", "AAA", "LY", "")),
            Err(RoutingError::RoutingInvariantViolation { .. })
        ));
        let routed = router.route(vec![run("AAA", "LYZ", 0.0, &[1]), run("BBB", "LYZ", 0.0, &[1])]);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].site, 1);
        assert_eq!(router.stats().violations, 1);
    }
}
