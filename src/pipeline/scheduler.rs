//! Main processing loop
//!
//! One cooperative task paces iterations to `wait_time`. Each iteration runs
//! the stages strictly in order:
//!
//! 1. read a batch of wire messages (bounded wait)
//! 2. decode, advance every buffer to the clock, route and merge
//! 3. drain the alert transport into the event registry, then expire
//! 4. per active event: extract windows, PGD, CMT, FF, archive, publish
//!
//! Per-message and per-model failures are logged and isolated. Transport
//! termination, exhausted reconnects and archive failures end the loop.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::clock::Clock;
use super::source::TraceSource;
use super::transport::AlertTransport;
use crate::acquisition::{BufferRouter, TransportError, WireDecoder};
use crate::buffer::{build_sites, extract_offsets, extract_peak_displacements, Site};
use crate::config::defaults::{MAX_ALERTS_PER_ITERATION, OVERRUN_FACTOR};
use crate::config::GfastConfig;
use crate::events::EventRegistry;
use crate::inversion::{invert_cmt, invert_ff, invert_pgd, FaultPlane, GridSearchSolver, InversionError};
use crate::messages::{EventMessage, RepublishPolicy};
use crate::storage::{ArchiveError, ArchiveSink, IterationRecord};
use crate::types::{ActiveEvent, AlertCommand, ModelKind, SiteMetadata};

/// Conditions that end the scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("archive failure: {0}")]
    Archive(#[from] ArchiveError),
}

/// Counters returned on shutdown
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub iterations: u64,
    pub messages_decoded: u64,
    pub messages_dropped: u64,
    pub runs_unmatched: u64,
    pub events_opened: u64,
    pub events_updated: u64,
    pub events_cancelled: u64,
    pub events_expired: u64,
    pub inversions_run: u64,
    pub inversions_withheld: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub overruns: u64,
}

/// Span hierarchy for one scheduler run.
///
/// Iterations run inside the root `gfast` span and per-event work inside a
/// child span carrying the event id, so every log line can be attributed.
#[derive(Debug, Clone)]
pub struct LogContext {
    run_id: String,
    root: Span,
}

impl LogContext {
    pub fn new() -> Self {
        let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let root = tracing::info_span!("gfast", run_id = %run_id);
        Self { run_id, root }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Span {
        &self.root
    }

    pub fn event_span(&self, event: &ActiveEvent) -> Span {
        tracing::info_span!(parent: &self.root, "event", event_id = %event.id, version = event.version)
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new()
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Owns the site buffers and drives the pipeline.
pub struct Scheduler {
    config: Arc<GfastConfig>,
    metadata: Vec<SiteMetadata>,
    sites: Vec<Site>,
    decoder: WireDecoder,
    router: BufferRouter,
    registry: EventRegistry,
    solver: GridSearchSolver,
    policy: RepublishPolicy,
    source: Box<dyn TraceSource>,
    transport: Box<dyn AlertTransport>,
    archive: Arc<dyn ArchiveSink>,
    clock: Arc<dyn Clock>,
    log: LogContext,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(
        config: Arc<GfastConfig>,
        metadata: Vec<SiteMetadata>,
        source: Box<dyn TraceSource>,
        transport: Box<dyn AlertTransport>,
        archive: Arc<dyn ArchiveSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sites = build_sites(metadata.clone(), config.general.bufflen, clock.now());
        Self {
            router: BufferRouter::new(&metadata),
            registry: EventRegistry::new(config.general.processing_time),
            solver: GridSearchSolver::new(config.general.parallel),
            policy: RepublishPolicy::new(config.general.republish_mag_delta),
            decoder: WireDecoder::new(),
            log: LogContext::new(),
            stats: SchedulerStats::default(),
            config,
            metadata,
            sites,
            source,
            transport,
            archive,
            clock,
        }
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn log_context(&self) -> &LogContext {
        &self.log
    }

    /// Run until cancelled or a fatal error.
    pub async fn run_forever(mut self, cancel: CancellationToken) -> Result<SchedulerStats, SchedulerError> {
        let cadence = Duration::try_from_secs_f64(self.config.general.wait_time).unwrap_or(Duration::from_secs(1));
        info!(
            run_id = %self.log.run_id(),
            sites = self.sites.len(),
            source = %self.source.source_name(),
            transport = %self.transport.transport_name(),
            archive = %self.archive.backend_name(),
            cadence_s = cadence.as_secs_f64(),
            "Scheduler started"
        );

        loop {
            let started = tokio::time::Instant::now();
            let span = self.log.root().clone();
            match self.iterate(&cancel).instrument(span).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    error!(error = %e, iterations = self.stats.iterations, "Fatal error, scheduler stopping");
                    return Err(e);
                }
            }

            let elapsed = started.elapsed();
            if elapsed.as_secs_f64() > OVERRUN_FACTOR * cadence.as_secs_f64() {
                self.stats.overruns += 1;
                warn!(
                    elapsed_s = elapsed.as_secs_f64(),
                    cadence_s = cadence.as_secs_f64(),
                    "Iteration overran cadence"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cadence.saturating_sub(elapsed)) => {}
            }
        }

        let stats = self.finish();
        info!(
            iterations = stats.iterations,
            decoded = stats.messages_decoded,
            dropped = stats.messages_dropped,
            published = stats.messages_published,
            "Scheduler stopped"
        );
        Ok(stats)
    }

    fn finish(mut self) -> SchedulerStats {
        let decoder = self.decoder.stats();
        let router = self.router.stats();
        self.stats.messages_decoded = decoder.decoded;
        self.stats.messages_dropped = decoder.malformed;
        self.stats.runs_unmatched = router.unmatched;
        self.stats
    }

    async fn iterate(&mut self, cancel: &CancellationToken) -> Result<Flow, SchedulerError> {
        let trace_timeout = Duration::from_millis(self.config.transport.trace_timeout_ms);
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(Flow::Stop),
            read = self.source.read_batch(trace_timeout) => read,
        };
        let frames = match read {
            Ok(frames) => frames,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(source = %self.source.source_name(), error = %e, "Trace read failed");
                Vec::new()
            }
        };

        let now = self.clock.now();
        self.ingest(&frames, now);

        if matches!(self.drain_alerts(cancel).await?, Flow::Stop) {
            return Ok(Flow::Stop);
        }
        for expired in self.registry.tick(now) {
            self.policy.forget(&expired.id);
            self.stats.events_expired += 1;
        }

        let events = self.registry.active().to_vec();
        for event in &events {
            self.process_event(event, now).await?;
        }

        self.stats.iterations += 1;
        Ok(Flow::Continue)
    }

    /// Decode, advance every buffer to `now`, then merge routed runs.
    fn ingest(&mut self, frames: &[Vec<u8>], now: f64) {
        let runs = self.decoder.decode_batch(frames);
        for site in &mut self.sites {
            site.buffer.advance_to(now);
        }
        let mut merged = 0usize;
        for routed in self.router.route(runs) {
            let site = &mut self.sites[routed.site];
            merged += site.buffer.merge(routed.component, &routed.run, site.meta.gain);
        }
        if !frames.is_empty() {
            debug!(messages = frames.len(), samples = merged, "Merged trace batch");
        }
    }

    async fn drain_alerts(&mut self, cancel: &CancellationToken) -> Result<Flow, SchedulerError> {
        let first_timeout = Duration::from_millis(self.config.transport.alert_timeout_ms);
        for n in 0..MAX_ALERTS_PER_ITERATION {
            let timeout = if n == 0 { first_timeout } else { Duration::ZERO };
            let polled = tokio::select! {
                _ = cancel.cancelled() => return Ok(Flow::Stop),
                polled = self.transport.poll_alert(timeout) => polled,
            };
            match polled {
                Ok(None) => break,
                Ok(Some(AlertCommand::Alert(alert))) => {
                    if self.registry.on_alert(&alert).is_new() {
                        self.stats.events_opened += 1;
                        self.archive.record_sites(&alert.event_id, &self.metadata)?;
                    } else {
                        self.stats.events_updated += 1;
                    }
                }
                Ok(Some(AlertCommand::Cancel(id))) => {
                    if self.registry.cancel(&id).is_some() {
                        self.stats.events_cancelled += 1;
                        self.policy.forget(&id);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(transport = %self.transport.transport_name(), error = %e, "Alert poll failed");
                    break;
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn process_event(&mut self, event: &ActiveEvent, now: f64) -> Result<(), SchedulerError> {
        let span = self.log.event_span(event);
        let record = {
            let _entered = span.enter();
            self.run_inversions(event, now)
        };

        let iteration = self.archive.record_iteration(&record)?;
        let message = EventMessage::from_iteration(&record, iteration);
        if self.policy.should_publish(&message) {
            self.publish(&message).instrument(span).await?;
        }
        Ok(())
    }

    fn run_inversions(&mut self, event: &ActiveEvent, now: f64) -> IterationRecord {
        let config = Arc::clone(&self.config);

        let pgd_observations = extract_peak_displacements(&self.sites, event, &config.pgd_window());
        let pgd = self.settle(ModelKind::Pgd, invert_pgd(&config.pgd, &self.solver, event, &pgd_observations));
        if let Some(result) = &pgd {
            info!(magnitude = result.magnitude(), depth_km = result.depth_km(), sites = result.sites_used, "PGD estimate");
        }

        let cmt_observations = extract_offsets(&self.sites, event, &config.cmt_window(), ModelKind::Cmt);
        let cmt = self.settle(ModelKind::Cmt, invert_cmt(&config.cmt, &self.solver, event, &cmt_observations));
        if let Some(result) = &cmt {
            let (depth_km, _, _) = result.location(result.optimum);
            info!(
                magnitude = result.magnitude(),
                depth_km = depth_km,
                double_couple_pct = result.decomposition.double_couple_pct,
                sites = result.sites_used,
                "CMT estimate"
            );
        }

        let ff_observations = extract_offsets(&self.sites, event, &config.ff_window(), ModelKind::Ff);
        let planes: Vec<FaultPlane> = match &cmt {
            Some(result) => result
                .decomposition
                .planes
                .iter()
                .map(|p| FaultPlane { strike: p.strike, dip: p.dip })
                .collect(),
            None => config.ff.fallback_planes.clone(),
        };
        let ff = if planes.is_empty() {
            debug!("No candidate fault planes, finite fault skipped");
            None
        } else {
            let magnitude = [cmt.as_ref().map(|r| r.magnitude()), pgd.as_ref().map(|r| r.magnitude())]
                .into_iter()
                .flatten()
                .find(|m| m.is_finite())
                .unwrap_or(event.magnitude);
            let result = invert_ff(&config.ff, &self.solver, event, magnitude, &planes, &ff_observations);
            self.settle(ModelKind::Ff, result)
        };
        if let Some(result) = &ff {
            let best = result.best();
            info!(magnitude = best.magnitude, strike = best.strike, dip = best.dip, "Finite fault estimate");
        }

        IterationRecord {
            event: event.clone(),
            time: now,
            pgd_observations,
            cmt_observations,
            ff_observations,
            pgd,
            cmt,
            ff,
        }
    }

    /// Count the outcome; a failed model is withheld for this iteration only.
    fn settle<T>(&mut self, model: ModelKind, result: Result<T, InversionError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.stats.inversions_run += 1;
                Some(value)
            }
            Err(e @ InversionError::InsufficientData { .. }) => {
                self.stats.inversions_withheld += 1;
                warn!(model = %model, error = %e, "Inversion withheld");
                None
            }
            Err(e) => {
                self.stats.inversions_withheld += 1;
                error!(model = %model, error = %e, "Inversion failed");
                None
            }
        }
    }

    async fn publish(&mut self, message: &EventMessage) -> Result<(), SchedulerError> {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.publish_failures += 1;
                error!(error = %e, "Event message serialization failed");
                return Ok(());
            }
        };
        match self.transport.publish(&message.event_id, &payload).await {
            Ok(()) => {
                self.policy.mark_published(message);
                self.stats.messages_published += 1;
                info!(iteration = message.iteration, bytes = payload.len(), "Event message published");
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!(error = %e, "Publish failed");
                Ok(())
            }
        }
    }
}
