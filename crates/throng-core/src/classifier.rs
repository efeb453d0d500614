//! Tier classification.
//!
//! Every `lod_update_interval` ticks the classifier recomputes each live
//! agent's [`TierAssignment`]:
//!
//! 1. Effective distance: `focus × (1 − influence_weight × engagement)`,
//!    scaled by `volatile_factor` for volatile agents. Non-finite values
//!    classify as infinitely far.
//! 2. Bucket by the three distance thresholds.
//! 3. Clamp each tier to its capacity, cascading the excess
//!    High → Medium → Low → Dormant. The farthest agents are demoted
//!    first; ties demote the agent that has held its tier longest, then
//!    the higher id.
//!
//! High and Medium capacities shrink with the tier complexity level.
//! Dormant is unbounded, so no agent is ever dropped.

use std::cmp::Ordering;

use rayon::prelude::*;
use throng_agents::AgentPool;
use throng_types::{AgentId, AgentRecord, Tier, TierAssignment};
use tracing::{debug, error};

use crate::adaptive::MAX_COMPLEXITY_LEVEL;
use crate::config::TierConfig;

/// Distance thresholds, weights and capacities used for classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierSettings {
    /// Full-complexity capacities indexed by [`Tier::index`].
    pub capacities: [usize; Tier::COUNT],
    /// Upper bound (exclusive) of the High tier.
    pub high_distance: f32,
    /// Upper bound (exclusive) of the Medium tier.
    pub medium_distance: f32,
    /// Upper bound (exclusive) of the Low tier.
    pub low_distance: f32,
    /// How strongly engagement shrinks the effective distance.
    pub influence_weight: f32,
    /// Distance factor for volatile agents.
    pub volatile_factor: f32,
}

impl ClassifierSettings {
    /// Settings from the `tiers` config section.
    pub const fn from_config(config: &TierConfig) -> Self {
        Self {
            capacities: [
                usize::MAX,
                config.low_capacity,
                config.medium_capacity,
                config.high_capacity,
            ],
            high_distance: config.high_distance,
            medium_distance: config.medium_distance,
            low_distance: config.low_distance,
            influence_weight: config.influence_weight,
            volatile_factor: config.volatile_factor,
        }
    }

    /// Capacity of `tier` at the given complexity level.
    ///
    /// High and Medium scale by `(level + 1) / 4`; Low and Dormant do not.
    pub fn capacity(&self, tier: Tier, level: u8) -> usize {
        let full = self.capacities.get(tier.index()).copied().unwrap_or(usize::MAX);
        match tier {
            Tier::High | Tier::Medium => {
                let quarters = usize::from(level.min(MAX_COMPLEXITY_LEVEL)).saturating_add(1);
                full.saturating_mul(quarters).checked_div(4).unwrap_or(full)
            }
            Tier::Low | Tier::Dormant => full,
        }
    }

    /// Sum of the bounded tier capacities at full complexity.
    pub fn bounded_capacity(&self) -> usize {
        [Tier::High, Tier::Medium, Tier::Low]
            .into_iter()
            .map(|tier| self.capacity(tier, MAX_COMPLEXITY_LEVEL))
            .fold(0_usize, usize::saturating_add)
    }

    /// Tier a distance falls into before capacity clamping.
    pub fn base_tier(&self, distance: f32) -> Tier {
        if distance < self.high_distance {
            Tier::High
        } else if distance < self.medium_distance {
            Tier::Medium
        } else if distance < self.low_distance {
            Tier::Low
        } else {
            Tier::Dormant
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::from_config(&TierConfig::default())
    }
}

/// Effective distance of an agent; smaller is more important.
pub fn effective_distance(record: &AgentRecord, settings: &ClassifierSettings) -> f32 {
    let focus = record.focus_distance.max(0.0);
    let engagement = record.engagement.clamp(0.0, 1.0);
    let volatility = if record.volatile {
        settings.volatile_factor
    } else {
        1.0
    };
    let distance = focus * (1.0 - settings.influence_weight * engagement) * volatility;
    if distance.is_finite() { distance } else { f32::MAX }
}

/// Outcome of one classification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationReport {
    /// Live agents classified.
    pub classified: usize,
    /// Population per tier, indexed by [`Tier::index`].
    pub populations: [usize; Tier::COUNT],
    /// Agents whose tier changed.
    pub reassigned: usize,
    /// Agents demoted below their distance tier by a capacity clamp.
    pub demoted: usize,
    /// Agents the post-pass verification had to clamp.
    pub clamped: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: u32,
    agent_id: AgentId,
    distance: f32,
    base: Tier,
    previous: Tier,
    frames: u64,
}

/// Keep order within a tier: nearest first, then most recently
/// reassigned, then lowest id.
fn keep_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.frames.cmp(&b.frames))
        .then(a.agent_id.cmp(&b.agent_id))
}

/// Assigns tiers to the live population.
#[derive(Debug, Clone)]
pub struct TierClassifier {
    settings: ClassifierSettings,
    last_pass_tick: Option<u64>,
}

impl TierClassifier {
    /// Create a classifier.
    pub const fn new(settings: ClassifierSettings) -> Self {
        Self {
            settings,
            last_pass_tick: None,
        }
    }

    /// The classifier's settings.
    pub const fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Forget the last pass (after a population reset).
    pub const fn reset(&mut self) {
        self.last_pass_tick = None;
    }

    /// Run one classification pass over every live agent in `pool`.
    pub fn classify(&mut self, pool: &mut AgentPool, level: u8, tick: u64) -> ClassificationReport {
        let elapsed = self
            .last_pass_tick
            .map_or(0, |last| tick.saturating_sub(last));
        self.last_pass_tick = Some(tick);
        let settings = self.settings;

        let candidates: Vec<Candidate> = pool
            .slots()
            .par_iter()
            .filter(|slot| slot.is_live())
            .filter_map(|slot| {
                let record = slot.record()?;
                let distance = effective_distance(record, &settings);
                let assignment = slot.assignment();
                Some(Candidate {
                    index: slot.index(),
                    agent_id: record.id,
                    distance,
                    base: settings.base_tier(distance),
                    previous: assignment.tier,
                    frames: assignment.frames_since_reassignment.saturating_add(elapsed),
                })
            })
            .collect();

        let mut report = ClassificationReport {
            classified: candidates.len(),
            ..ClassificationReport::default()
        };

        let mut buckets: [Vec<Candidate>; Tier::COUNT] = Default::default();
        for candidate in candidates {
            if let Some(bucket) = buckets.get_mut(candidate.base.index()) {
                bucket.push(candidate);
            }
        }

        let mut assigned: Vec<(Candidate, Tier)> = Vec::with_capacity(report.classified);
        let mut overflow: Vec<Candidate> = Vec::new();
        for tier in Tier::DESCENDING {
            let Some(bucket) = buckets.get_mut(tier.index()) else {
                continue;
            };
            let mut members = std::mem::take(bucket);
            members.append(&mut overflow);
            members.sort_unstable_by(keep_order);
            let cap = settings.capacity(tier, level);
            if members.len() > cap {
                overflow = members.split_off(cap);
                report.demoted = report.demoted.saturating_add(overflow.len());
            }
            if let Some(count) = report.populations.get_mut(tier.index()) {
                *count = members.len();
            }
            assigned.extend(members.into_iter().map(|c| (c, tier)));
        }

        for (candidate, tier) in assigned {
            let frames = if tier == candidate.previous {
                candidate.frames
            } else {
                report.reassigned = report.reassigned.saturating_add(1);
                0
            };
            pool.assign_tier(
                candidate.index,
                TierAssignment {
                    tier,
                    distance: candidate.distance,
                    frames_since_reassignment: frames,
                },
            );
        }

        report.clamped = self.enforce_caps(pool, level);
        if report.clamped > 0 {
            report.populations = pool.tier_populations();
        }

        debug!(
            tick,
            level,
            classified = report.classified,
            high = report.populations.get(Tier::High.index()).copied().unwrap_or(0),
            medium = report.populations.get(Tier::Medium.index()).copied().unwrap_or(0),
            low = report.populations.get(Tier::Low.index()).copied().unwrap_or(0),
            dormant = report.populations.get(Tier::Dormant.index()).copied().unwrap_or(0),
            reassigned = report.reassigned,
            demoted = report.demoted,
            "Tier classification pass"
        );
        report
    }

    /// Verify no tier exceeds its capacity, demoting the farthest excess
    /// agents if one does. Returns the number of agents clamped.
    pub fn enforce_caps(&self, pool: &mut AgentPool, level: u8) -> usize {
        let mut clamped: usize = 0;
        for tier in Tier::DESCENDING {
            let Some(lower) = tier.demoted() else {
                continue;
            };
            let cap = self.settings.capacity(tier, level);
            let mut members: Vec<(u32, AgentId, TierAssignment)> = pool
                .live_slots()
                .filter(|slot| slot.assignment().tier == tier)
                .filter_map(|slot| Some((slot.index(), slot.record()?.id, *slot.assignment())))
                .collect();
            if members.len() <= cap {
                continue;
            }
            error!(
                %tier,
                population = members.len(),
                capacity = cap,
                "Tier over capacity after classification, clamping"
            );
            members.sort_unstable_by(|a, b| {
                a.2.distance
                    .total_cmp(&b.2.distance)
                    .then(a.2.frames_since_reassignment.cmp(&b.2.frames_since_reassignment))
                    .then(a.1.cmp(&b.1))
            });
            for (index, _, assignment) in members.into_iter().skip(cap) {
                pool.assign_tier(
                    index,
                    TierAssignment {
                        tier: lower,
                        distance: assignment.distance,
                        frames_since_reassignment: 0,
                    },
                );
                clamped = clamped.saturating_add(1);
            }
        }
        clamped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use throng_types::FeatureVector;

    use super::*;

    fn settings(high: usize, medium: usize, low: usize) -> ClassifierSettings {
        ClassifierSettings {
            capacities: [usize::MAX, low, medium, high],
            ..ClassifierSettings::default()
        }
    }

    fn spawn(pool: &mut AgentPool, id: u64, focus: f32) {
        let mut record = AgentRecord::new(
            AgentId::new(id),
            FeatureVector {
                age: 30,
                education: 2,
                urban: true,
                economic_axis: 0.0,
                social_axis: 0.0,
            },
        );
        record.engagement = 0.0;
        record.focus_distance = focus;
        let handle = pool.acquire(record.id, 0).unwrap();
        pool.activate(handle, record).unwrap();
    }

    fn tier_of(pool: &AgentPool, id: u64) -> Tier {
        let handle = pool.handle_of(AgentId::new(id)).unwrap();
        pool.get(handle).unwrap().assignment().tier
    }

    #[test]
    fn effective_distance_weights_engagement_and_volatility() {
        let settings = ClassifierSettings::default();
        let mut record = AgentRecord::new(
            AgentId::new(1),
            FeatureVector {
                age: 30,
                education: 2,
                urban: true,
                economic_axis: 0.0,
                social_axis: 0.0,
            },
        );
        record.focus_distance = 100.0;
        record.engagement = 1.0;
        assert!((effective_distance(&record, &settings) - 50.0).abs() < 1e-4);
        record.volatile = true;
        assert!((effective_distance(&record, &settings) - 37.5).abs() < 1e-4);
        record.focus_distance = f32::INFINITY;
        assert!((effective_distance(&record, &settings) - f32::MAX).abs() < 1.0);
    }

    #[test]
    fn distances_bucket_into_tiers() {
        let mut pool = AgentPool::with_capacity(8);
        for (id, focus) in [(1, 10.0), (2, 100.0), (3, 300.0), (4, 900.0)] {
            spawn(&mut pool, id, focus);
        }
        let mut classifier = TierClassifier::new(ClassifierSettings::default());
        let report = classifier.classify(&mut pool, 3, 10);
        assert_eq!(tier_of(&pool, 1), Tier::High);
        assert_eq!(tier_of(&pool, 2), Tier::Medium);
        assert_eq!(tier_of(&pool, 3), Tier::Low);
        assert_eq!(tier_of(&pool, 4), Tier::Dormant);
        assert_eq!(report.populations, [1, 1, 1, 1]);
        assert_eq!(report.classified, 4);
    }

    #[test]
    fn overflow_cascades_farthest_first() {
        let mut pool = AgentPool::with_capacity(8);
        for id in 1..=6 {
            spawn(&mut pool, id, f32::from(u8::try_from(id).unwrap()));
        }
        let mut classifier = TierClassifier::new(settings(2, 2, 1));
        let report = classifier.classify(&mut pool, 3, 10);
        assert_eq!(tier_of(&pool, 1), Tier::High);
        assert_eq!(tier_of(&pool, 2), Tier::High);
        assert_eq!(tier_of(&pool, 3), Tier::Medium);
        assert_eq!(tier_of(&pool, 4), Tier::Medium);
        assert_eq!(tier_of(&pool, 5), Tier::Low);
        assert_eq!(tier_of(&pool, 6), Tier::Dormant);
        assert_eq!(report.demoted, 4 + 2 + 1);
        assert_eq!(report.clamped, 0);
    }

    #[test]
    fn equal_distance_demotes_higher_id() {
        let mut pool = AgentPool::with_capacity(4);
        for id in 1..=3 {
            spawn(&mut pool, id, 5.0);
        }
        let mut classifier = TierClassifier::new(settings(2, 0, 0));
        classifier.classify(&mut pool, 3, 10);
        assert_eq!(tier_of(&pool, 1), Tier::High);
        assert_eq!(tier_of(&pool, 2), Tier::High);
        assert_eq!(tier_of(&pool, 3), Tier::Dormant);
    }

    #[test]
    fn complexity_level_scales_high_and_medium_caps() {
        let settings = settings(500, 2_000, 7_500);
        assert_eq!(settings.capacity(Tier::High, 3), 500);
        assert_eq!(settings.capacity(Tier::High, 2), 375);
        assert_eq!(settings.capacity(Tier::Medium, 1), 1_000);
        assert_eq!(settings.capacity(Tier::High, 0), 125);
        assert_eq!(settings.capacity(Tier::Low, 0), 7_500);
        assert_eq!(settings.capacity(Tier::Dormant, 0), usize::MAX);
        assert_eq!(settings.bounded_capacity(), 10_000);
    }

    #[test]
    fn frames_since_reassignment_accumulate_until_tier_changes() {
        let mut pool = AgentPool::with_capacity(2);
        spawn(&mut pool, 1, 10.0);
        let mut classifier = TierClassifier::new(ClassifierSettings::default());
        classifier.classify(&mut pool, 3, 10);
        classifier.classify(&mut pool, 3, 20);
        let handle = pool.handle_of(AgentId::new(1)).unwrap();
        assert_eq!(pool.get(handle).unwrap().assignment().frames_since_reassignment, 10);

        pool.record_mut(AgentId::new(1)).unwrap().focus_distance = 1_000.0;
        classifier.classify(&mut pool, 3, 30);
        let assignment = *pool.get(handle).unwrap().assignment();
        assert_eq!(assignment.tier, Tier::Dormant);
        assert_eq!(assignment.frames_since_reassignment, 0);
    }

    #[test]
    fn enforce_caps_clamps_after_capacity_drop() {
        let mut pool = AgentPool::with_capacity(8);
        for id in 1..=4 {
            spawn(&mut pool, id, 1.0);
        }
        let mut classifier = TierClassifier::new(settings(4, 4, 4));
        classifier.classify(&mut pool, 3, 10);
        assert_eq!(pool.tier_populations(), [0, 0, 0, 4]);
        // Level 0 leaves room for one High and one Medium agent.
        let clamped = classifier.enforce_caps(&mut pool, 0);
        assert_eq!(clamped, 3 + 2);
        assert_eq!(pool.tier_populations(), [0, 2, 1, 1]);
    }
}
