//! Per-tier update routines.
//!
//! Each tier runs a routine of decreasing cost:
//!
//! | Tier    | Routine                                                   |
//! |---------|-----------------------------------------------------------|
//! | High    | opinion dynamics, social pull, engagement drift, boost decay |
//! | Medium  | opinion dynamics, boost decay                             |
//! | Low     | sentiment decay toward neutral, boost decay               |
//! | Dormant | coarse aging once per simulated day                       |
//!
//! Routines touch exactly one record and never allocate, so the scheduler
//! can run them from a parallel iterator without locking. Social pull reads
//! a [`SocialField`] snapshot built before the batch starts.

use std::collections::HashMap;

use throng_types::{AgentRecord, ClusterKey, Tier};

use crate::config::RoutineConfig;
use crate::error::AgentError;

/// Boosts below this are snapped to zero.
const BOOST_EPSILON: f32 = 1e-3;

/// Read-only snapshot of mean sentiment per cluster.
#[derive(Debug, Clone, Default)]
pub struct SocialField {
    means: HashMap<ClusterKey, f32>,
}

impl SocialField {
    /// Build the snapshot from a set of live records.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a AgentRecord>) -> Self {
        let mut sums: HashMap<ClusterKey, (f32, f32)> = HashMap::new();
        for record in records {
            if !record.sentiment.is_finite() {
                continue;
            }
            let entry = sums.entry(ClusterKey::of(record)).or_insert((0.0, 0.0));
            entry.0 += record.sentiment;
            entry.1 += 1.0;
        }
        let means = sums
            .into_iter()
            .map(|(key, (sum, n))| (key, sum / n))
            .collect();
        Self { means }
    }

    /// Mean sentiment of a cluster, if any member was sampled.
    pub fn mean(&self, key: &ClusterKey) -> Option<f32> {
        self.means.get(key).copied()
    }

    /// Number of clusters in the snapshot.
    pub fn len(&self) -> usize {
        self.means.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Per-batch inputs shared by every routine invocation.
#[derive(Debug, Clone, Copy)]
pub struct RoutineContext<'a> {
    /// Current tick.
    pub tick: u64,
    /// Rates.
    pub config: &'a RoutineConfig,
    /// Cluster sentiment snapshot for the social pull.
    pub social: &'a SocialField,
    /// Whether advanced behaviours (social pull) are enabled this tick.
    pub advanced: bool,
}

/// Run the routine for `tier` on one record.
///
/// # Errors
///
/// Returns [`AgentError::MalformedRecord`] if the record holds non-finite
/// or out-of-range values; the record is left untouched.
pub fn run_routine(
    tier: Tier,
    record: &mut AgentRecord,
    ctx: &RoutineContext<'_>,
) -> Result<(), AgentError> {
    if !record.is_well_formed() {
        return Err(AgentError::MalformedRecord {
            agent_id: record.id,
            reason: "non-finite or out-of-range field".to_owned(),
        });
    }
    match tier {
        Tier::High => update_high(record, ctx),
        Tier::Medium => update_medium(record, ctx),
        Tier::Low => update_low(record, ctx),
        Tier::Dormant => update_dormant(record, ctx),
    }
    Ok(())
}

/// Full update.
fn update_high(record: &mut AgentRecord, ctx: &RoutineContext<'_>) {
    opinion_dynamics(record, ctx.config);
    if ctx.advanced
        && let Some(mean) = ctx.social.mean(&ClusterKey::of(record))
    {
        record.sentiment += (mean - record.sentiment) * ctx.config.social_rate;
        record.sentiment = record.sentiment.clamp(-1.0, 1.0);
    }
    let baseline = 0.5 + record.emotional_boost / 2.0;
    record.engagement += (baseline - record.engagement) * ctx.config.opinion_rate;
    record.engagement = record.engagement.clamp(0.0, 1.0);
    relax_boost(record, ctx);
}

fn update_medium(record: &mut AgentRecord, ctx: &RoutineContext<'_>) {
    opinion_dynamics(record, ctx.config);
    relax_boost(record, ctx);
}

fn update_low(record: &mut AgentRecord, ctx: &RoutineContext<'_>) {
    record.sentiment *= 1.0 - ctx.config.neutral_decay_rate;
    relax_boost(record, ctx);
}

fn update_dormant(record: &mut AgentRecord, ctx: &RoutineContext<'_>) {
    let elapsed = ctx.tick.saturating_sub(record.last_aged_tick);
    if ctx.config.ticks_per_day > 0 && elapsed >= ctx.config.ticks_per_day {
        record.age_days = record.age_days.saturating_add(1);
        record.last_aged_tick = ctx.tick;
    }
}

/// Drift sentiment toward the agent's stance (mean of its opinion axes).
/// A strong emotional boost resists the drift.
fn opinion_dynamics(record: &mut AgentRecord, config: &RoutineConfig) {
    let stance = (record.features.economic_axis + record.features.social_axis) / 2.0;
    let rate = config.opinion_rate * (1.0 - record.emotional_boost.clamp(0.0, 1.0));
    record.sentiment += (stance - record.sentiment) * rate;
    record.sentiment = record.sentiment.clamp(-1.0, 1.0);
}

/// Relax the emotional boost once the last influence is older than the
/// decay window.
fn relax_boost(record: &mut AgentRecord, ctx: &RoutineContext<'_>) {
    let Some(last) = record.last_influence_tick else {
        return;
    };
    if ctx.tick.saturating_sub(last) <= ctx.config.boost_decay_window {
        return;
    }
    record.emotional_boost *= 1.0 - ctx.config.boost_decay_rate;
    if record.emotional_boost < BOOST_EPSILON {
        record.emotional_boost = 0.0;
    }
}
