//! The inference phase of a tick.
//!
//! [`InferencePipeline`] owns the cache, the in-flight registry, the
//! circuit breaker, the dispatcher and the propagation engine, and runs
//! them in two steps:
//!
//! 1. [`drain`](InferencePipeline::drain): fold completed batches into the
//!    cache and propagate their results, or clear the markers of failed
//!    ones.
//! 2. [`run_cycle`](InferencePipeline::run_cycle): select representatives,
//!    serve cache hits immediately, and submit the misses in bounded
//!    batches unless the breaker is open.
//!
//! Both steps run in the tick's single-threaded phase.

use std::sync::Arc;
use std::time::{Duration, Instant};

use throng_agents::{AgentAttributeStore, AgentPool, AgentSlot, PersistenceGateway};
use throng_types::{AgentId, AgentProfile, AnalysisResult, BatchId, ContentDescriptor};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::{CacheSettings, CacheStats, InferenceCache};
use crate::content::ContentHash;
use crate::dispatcher::{Completion, DispatchStats, InferenceDispatcher};
use crate::inflight::{InFlightRegistry, InFlightTicket};
use crate::propagation::{PropagationEngine, PropagationSettings};
use crate::selector::{Representative, SelectorSettings, select_representatives};
use crate::service::InferenceService;

/// Everything the pipeline needs to be configured with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Cache settings.
    pub cache: CacheSettings,
    /// Selector settings.
    pub selector: SelectorSettings,
    /// Propagation settings.
    pub propagation: PropagationSettings,
    /// Timeout applied to every inference call.
    pub request_timeout: Duration,
    /// Maximum profiles per submitted batch.
    pub max_batch_profiles: usize,
    /// Consecutive failures before the breaker opens.
    pub breaker_threshold: u32,
    /// Time the breaker stays open before a probe.
    pub breaker_recovery: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            selector: SelectorSettings::default(),
            propagation: PropagationSettings::default(),
            request_timeout: Duration::from_secs(30),
            max_batch_profiles: 10,
            breaker_threshold: 5,
            breaker_recovery: Duration::from_secs(30),
        }
    }
}

/// Counts from one selection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Representatives chosen by the selector.
    pub representatives: usize,
    /// Representatives served from the cache.
    pub cache_hits: usize,
    /// Representatives submitted to the service.
    pub submitted: usize,
    /// Batches spawned.
    pub batches: usize,
    /// Representatives skipped because their hash is already in flight.
    pub deferred: usize,
    /// Representatives held back by an open breaker.
    pub blocked: usize,
    /// Records updated from cache hits.
    pub propagated: usize,
}

/// Counts from one completion drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Completed batches folded in.
    pub completions: usize,
    /// Batches that failed.
    pub failed: usize,
    /// Results below the confidence floor, not propagated.
    pub rejected: usize,
    /// Records updated.
    pub propagated: usize,
    /// Covered agents no longer in the pool.
    pub skipped: usize,
}

/// Cache, registry, breaker, dispatcher and propagation, composed.
#[derive(Debug)]
pub struct InferencePipeline<S> {
    cache: InferenceCache,
    inflight: InFlightRegistry,
    breaker: CircuitBreaker,
    dispatcher: InferenceDispatcher<S>,
    propagation: PropagationEngine,
    selector: SelectorSettings,
    max_batch_profiles: usize,
}

impl<S: InferenceService> InferencePipeline<S> {
    /// Build the pipeline. Calls are spawned on `runtime`.
    pub fn new(
        settings: &PipelineSettings,
        service: Arc<S>,
        runtime: Handle,
        store: Arc<dyn AgentAttributeStore>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        info!(
            backend = service.name(),
            batch_ceiling = settings.selector.batch_ceiling,
            freshness_window = settings.cache.freshness_window,
            "Inference pipeline initialized"
        );
        Self {
            cache: InferenceCache::new(settings.cache),
            inflight: InFlightRegistry::new(),
            breaker: CircuitBreaker::new(settings.breaker_threshold, settings.breaker_recovery),
            dispatcher: InferenceDispatcher::new(service, runtime, settings.request_timeout),
            propagation: PropagationEngine::new(settings.propagation, store, gateway),
            selector: settings.selector,
            max_batch_profiles: settings.max_batch_profiles.max(1),
        }
    }

    /// Fold every completed batch into the cache and the population.
    pub fn drain(&mut self, pool: &mut AgentPool, tick: u64) -> DrainReport {
        let completions = self.dispatcher.drain_completions();
        self.fold(pool, tick, completions)
    }

    /// Wait for the next completion and fold it in.
    ///
    /// Returns `None` when no call is outstanding and nothing is queued.
    pub async fn settle_one(&mut self, pool: &mut AgentPool, tick: u64) -> Option<DrainReport> {
        if self.dispatcher.outstanding() == 0 {
            let report = self.drain(pool, tick);
            return (report.completions > 0).then_some(report);
        }
        let completion = self.dispatcher.next_completion().await?;
        Some(self.fold(pool, tick, vec![completion]))
    }

    fn fold(
        &mut self,
        pool: &mut AgentPool,
        tick: u64,
        completions: Vec<Completion>,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        for completion in completions {
            report.completions = report.completions.saturating_add(1);
            match completion.outcome {
                Ok(results) => {
                    self.breaker.record_success();
                    for (hash, result) in completion.hashes.iter().zip(results.iter()) {
                        self.cache.insert(*hash, result, tick);
                        let Some(ticket) = self.inflight.finish(hash) else {
                            continue;
                        };
                        if result.confidence >= self.cache.settings().confidence_floor {
                            let applied = self.propagation.propagate(
                                pool,
                                ticket.representative,
                                &ticket.members,
                                result,
                                tick,
                            );
                            report.propagated = report.propagated.saturating_add(applied.applied);
                            report.skipped = report.skipped.saturating_add(applied.skipped);
                        } else {
                            report.rejected = report.rejected.saturating_add(1);
                        }
                        release_ticket(pool, &ticket);
                    }
                }
                Err(error) => {
                    self.breaker.record_failure(Instant::now());
                    report.failed = report.failed.saturating_add(1);
                    for hash in &completion.hashes {
                        if let Some(ticket) = self.inflight.finish(hash) {
                            release_ticket(pool, &ticket);
                        }
                    }
                    debug!(
                        batch_id = %completion.batch_id,
                        hashes = completion.hashes.len(),
                        error = %error,
                        "Cleared in-flight markers for failed batch"
                    );
                }
            }
        }
        report
    }

    /// Select representatives among inference-eligible live agents and
    /// serve or submit them.
    pub fn run_cycle(
        &mut self,
        pool: &mut AgentPool,
        content: &ContentDescriptor,
        tick: u64,
        inference_rate: f32,
    ) -> CycleReport {
        let representatives = select_representatives(
            pool.live_slots()
                .filter(|s| s.assignment().tier.inference_eligible())
                .filter_map(AgentSlot::record),
            tick,
            inference_rate,
            &self.selector,
        );

        let mut report = CycleReport {
            representatives: representatives.len(),
            ..CycleReport::default()
        };
        let mut misses: Vec<(ContentHash, Representative)> = Vec::new();
        for rep in representatives {
            let hash = ContentHash::of(content, &rep.key);
            if self.inflight.contains(&hash) {
                report.deferred = report.deferred.saturating_add(1);
                continue;
            }
            if let Some(entry) = self.cache.lookup(&hash, tick) {
                let applied =
                    self.propagation
                        .propagate(pool, rep.agent_id, &rep.members, &entry.result(), tick);
                report.cache_hits = report.cache_hits.saturating_add(1);
                report.propagated = report.propagated.saturating_add(applied.applied);
                continue;
            }
            misses.push((hash, rep));
        }

        if misses.is_empty() {
            return report;
        }
        if !self.breaker.allow(Instant::now()) {
            report.blocked = misses.len();
            debug!(blocked = misses.len(), "Inference breaker open, holding back misses");
            return report;
        }

        // A half-open breaker admits a single probe batch.
        let batch_limit = if self.breaker.state() == BreakerState::HalfOpen {
            1
        } else {
            usize::MAX
        };

        let mut batch: Vec<(ContentHash, AgentProfile)> =
            Vec::with_capacity(self.max_batch_profiles);
        let mut batch_id = BatchId::new();
        for (hash, rep) in misses {
            if report.batches >= batch_limit {
                report.blocked = report.blocked.saturating_add(1);
                continue;
            }
            match self.begin(pool, batch_id, hash, &rep, tick) {
                Some(profile) => batch.push((hash, profile)),
                None => {
                    report.deferred = report.deferred.saturating_add(1);
                    continue;
                }
            }
            if batch.len() >= self.max_batch_profiles {
                report.submitted = report.submitted.saturating_add(batch.len());
                report.batches = report.batches.saturating_add(1);
                self.dispatcher
                    .submit(batch_id, content.clone(), std::mem::take(&mut batch));
                batch_id = BatchId::new();
            }
        }
        if !batch.is_empty() {
            report.submitted = report.submitted.saturating_add(batch.len());
            report.batches = report.batches.saturating_add(1);
            self.dispatcher.submit(batch_id, content.clone(), batch);
        }
        if report.batches == 0 {
            self.breaker.cancel_probe();
        }

        debug!(
            tick,
            representatives = report.representatives,
            cache_hits = report.cache_hits,
            submitted = report.submitted,
            batches = report.batches,
            "Inference cycle complete"
        );
        report
    }

    /// Register `rep` as in flight and mark its cluster.
    ///
    /// Returns the profile to submit, or `None` if another request for
    /// `hash` won the race or the representative is gone.
    fn begin(
        &self,
        pool: &mut AgentPool,
        batch_id: BatchId,
        hash: ContentHash,
        rep: &Representative,
        tick: u64,
    ) -> Option<AgentProfile> {
        let profile = pool.record(rep.agent_id).map(|r| r.profile())?;
        let covered: Vec<AgentId> = std::iter::once(rep.agent_id)
            .chain(rep.members.iter().copied())
            .collect();
        let slots = covered.iter().filter_map(|id| pool.handle_of(*id)).collect();
        let ticket = InFlightTicket {
            batch_id,
            representative: rep.agent_id,
            members: rep.members.clone(),
            slots,
            submitted_tick: tick,
        };
        let retained = ticket.slots.clone();
        if !self.inflight.try_begin(hash, ticket) {
            return None;
        }
        for id in &covered {
            if let Some(record) = pool.record_mut(*id) {
                record.analysis_in_progress = true;
            }
        }
        for handle in retained {
            if let Err(e) = pool.retain(handle) {
                warn!(slot = handle.index(), error = %e, "Failed to retain slot for analysis");
            }
        }
        Some(profile)
    }

    /// Remove cache entries that are no longer valid.
    pub fn sweep(&mut self, tick: u64) -> usize {
        self.cache.sweep(tick)
    }

    /// Abort outstanding calls and clear every in-flight marker.
    ///
    /// Returns the number of tickets released.
    pub fn shutdown(&mut self, pool: &mut AgentPool) -> usize {
        let aborted = self.dispatcher.abort_all();
        // An aborted probe never reports back.
        self.breaker.cancel_probe();
        let tickets = self.inflight.drain();
        for ticket in &tickets {
            release_ticket(pool, ticket);
        }
        info!(aborted, released = tickets.len(), "Inference pipeline shut down");
        tickets.len()
    }

    /// Look up a cached result without touching statistics.
    pub fn cached(&self, hash: &ContentHash) -> Option<AnalysisResult> {
        self.cache.peek(hash).map(crate::cache::CacheEntry::result)
    }

    /// Cache counters.
    pub const fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Resident cache entries.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Outstanding requests.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Breaker state.
    pub const fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Dispatcher counters.
    pub const fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Approximate resident size of the cache in bytes.
    pub fn estimated_bytes(&self) -> usize {
        self.cache.estimated_bytes()
    }
}

/// Drop the references a ticket holds and clear its agents' markers.
fn release_ticket(pool: &mut AgentPool, ticket: &InFlightTicket) {
    for id in ticket.covered() {
        if let Some(record) = pool.record_mut(id) {
            record.analysis_in_progress = false;
        }
    }
    for handle in &ticket.slots {
        // A stale handle means the slot was already recycled.
        let _ = pool.unretain(*handle);
    }
}
