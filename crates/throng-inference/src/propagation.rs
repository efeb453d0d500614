//! Propagation of a representative's result to its cluster.
//!
//! The representative receives its result at full
//! `representative_strength`. Every other member receives it at
//!
//! ```text
//! max(confidence * base_factor * (1 - d), min_strength)
//! ```
//!
//! where `d` in `[0, 1]` is the weighted feature distance between member
//! and representative. Each application is written back through the
//! attribute store and marked dirty for persistence.

use std::sync::Arc;

use throng_agents::{AgentAttributeStore, AgentPool, PersistenceGateway};
use throng_types::{AgentId, AgentRecord, AnalysisResult, FeatureVector, InfluenceDelta};
use tracing::debug;

/// Per-feature weights of the member-to-representative distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceWeights {
    /// Age difference (normalized by 100 years).
    pub age: f32,
    /// Education difference (normalized by 4 levels).
    pub education: f32,
    /// Locale mismatch.
    pub locale: f32,
    /// Economic axis difference (normalized by 2).
    pub economic: f32,
    /// Social axis difference (normalized by 2).
    pub social: f32,
}

impl Default for DistanceWeights {
    fn default() -> Self {
        Self {
            age: 0.2,
            education: 0.15,
            locale: 0.15,
            economic: 0.25,
            social: 0.25,
        }
    }
}

/// Propagation tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationSettings {
    /// Scale applied to member strength before the distance discount.
    pub base_factor: f32,
    /// Lower bound on member strength.
    pub min_strength: f32,
    /// Strength at which the representative receives its own result.
    pub representative_strength: f32,
    /// Emotional boost gained per unit of applied sentiment shift.
    pub boost_gain: f32,
    /// Distance weights.
    pub weights: DistanceWeights,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            base_factor: 0.8,
            min_strength: 0.1,
            representative_strength: 1.0,
            boost_gain: 1.5,
            weights: DistanceWeights::default(),
        }
    }
}

/// Weighted, normalized distance between two feature vectors, in `[0, 1]`.
pub fn feature_distance(a: &FeatureVector, b: &FeatureVector, weights: &DistanceWeights) -> f32 {
    let total =
        weights.age + weights.education + weights.locale + weights.economic + weights.social;
    if total <= 0.0 {
        return 0.0;
    }
    let age = (f32::from(a.age) - f32::from(b.age)).abs() / 100.0;
    let education = (f32::from(a.education) - f32::from(b.education)).abs() / 4.0;
    let locale = if a.urban == b.urban { 0.0 } else { 1.0 };
    let economic = (a.economic_axis - b.economic_axis).abs() / 2.0;
    let social = (a.social_axis - b.social_axis).abs() / 2.0;
    let sum = weights.age * age.min(1.0)
        + weights.education * education.min(1.0)
        + weights.locale * locale
        + weights.economic * economic.min(1.0)
        + weights.social * social.min(1.0);
    (sum / total).clamp(0.0, 1.0)
}

/// Strength at which a member at `distance` receives a result.
///
/// Non-increasing in `distance`.
pub fn propagation_strength(confidence: f32, distance: f32, settings: &PropagationSettings) -> f32 {
    let d = distance.clamp(0.0, 1.0);
    (confidence * settings.base_factor * (1.0 - d)).max(settings.min_strength)
}

/// Apply a result to one record at `strength`, returning the delta applied.
pub fn apply_result(
    record: &mut AgentRecord,
    result: &AnalysisResult,
    strength: f32,
    boost_gain: f32,
    tick: u64,
) -> InfluenceDelta {
    let sentiment_before = record.sentiment;
    let engagement_before = record.engagement;

    record.sentiment = (record.sentiment + result.sentiment_shift * strength).clamp(-1.0, 1.0);
    record.engagement = (record.engagement + result.engagement_change * strength).clamp(0.0, 1.0);
    let boost = (result.sentiment_shift.abs() * strength * boost_gain).clamp(0.0, 1.0);
    record.emotional_boost = record.emotional_boost.max(boost);
    record.last_inference_tick = Some(tick);
    record.last_influence_tick = Some(tick);
    record.cached_confidence = (result.confidence * strength).clamp(0.0, 1.0);
    record.analysis_in_progress = false;

    InfluenceDelta {
        agent_id: record.id,
        sentiment_delta: record.sentiment - sentiment_before,
        engagement_delta: record.engagement - engagement_before,
        strength,
        category: result.category,
        tick,
    }
}

/// Counts from one propagation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Records the result was applied to (representative included).
    pub applied: usize,
    /// Members no longer live in the pool.
    pub skipped: usize,
}

/// Applies results to clusters and writes the deltas to collaborators.
pub struct PropagationEngine {
    settings: PropagationSettings,
    store: Arc<dyn AgentAttributeStore>,
    gateway: Arc<dyn PersistenceGateway>,
}

impl std::fmt::Debug for PropagationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PropagationEngine {
    /// Create an engine writing to `store` and `gateway`.
    pub fn new(
        settings: PropagationSettings,
        store: Arc<dyn AgentAttributeStore>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            settings,
            store,
            gateway,
        }
    }

    /// Active settings.
    pub const fn settings(&self) -> &PropagationSettings {
        &self.settings
    }

    /// Apply `result` to `representative` at full strength and to each of
    /// `members` at distance-discounted strength.
    ///
    /// Members that have left the pool are skipped. If the representative
    /// itself is gone, its last known features are unavailable and members
    /// receive the minimum strength.
    pub fn propagate(
        &self,
        pool: &mut AgentPool,
        representative: AgentId,
        members: &[AgentId],
        result: &AnalysisResult,
        tick: u64,
    ) -> PropagationReport {
        let mut report = PropagationReport::default();
        let rep_features = pool.record(representative).map(|r| r.features);

        if let Some(record) = pool.record_mut(representative) {
            let delta = apply_result(
                record,
                result,
                self.settings.representative_strength,
                self.settings.boost_gain,
                tick,
            );
            self.write_back(&delta);
            report.applied = report.applied.saturating_add(1);
        } else {
            report.skipped = report.skipped.saturating_add(1);
        }

        for member in members {
            let Some(record) = pool.record_mut(*member) else {
                report.skipped = report.skipped.saturating_add(1);
                continue;
            };
            let strength = rep_features.map_or(self.settings.min_strength, |rep| {
                let d = feature_distance(&record.features, &rep, &self.settings.weights);
                propagation_strength(result.confidence, d, &self.settings)
            });
            let delta = apply_result(record, result, strength, self.settings.boost_gain, tick);
            self.write_back(&delta);
            report.applied = report.applied.saturating_add(1);
        }

        debug!(
            representative = %representative,
            applied = report.applied,
            skipped = report.skipped,
            category = ?result.category,
            "Propagated analysis to cluster"
        );
        report
    }

    fn write_back(&self, delta: &InfluenceDelta) {
        self.store.apply_influence(delta);
        self.gateway.mark_dirty(delta.agent_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use throng_agents::{DirtyTracker, InMemoryAttributeStore};
    use throng_types::ResponseCategory;

    use super::*;

    fn features(age: u8, urban: bool, axis: f32) -> FeatureVector {
        FeatureVector {
            age,
            education: 2,
            urban,
            economic_axis: axis,
            social_axis: axis,
        }
    }

    fn result() -> AnalysisResult {
        AnalysisResult {
            sentiment_shift: 0.5,
            engagement_change: 0.2,
            category: ResponseCategory::Supportive,
            confidence: 0.9,
        }
    }

    #[test]
    fn identical_features_have_zero_distance() {
        let f = features(40, true, 0.3);
        assert!(feature_distance(&f, &f, &DistanceWeights::default()).abs() < f32::EPSILON);
    }

    #[test]
    fn opposite_features_have_unit_distance() {
        let a = FeatureVector {
            age: 0,
            education: 0,
            urban: false,
            economic_axis: -1.0,
            social_axis: -1.0,
        };
        let b = FeatureVector {
            age: 100,
            education: 4,
            urban: true,
            economic_axis: 1.0,
            social_axis: 1.0,
        };
        assert!((feature_distance(&a, &b, &DistanceWeights::default()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn strength_is_non_increasing_in_distance() {
        let settings = PropagationSettings::default();
        let mut previous = f32::INFINITY;
        for step in 0..=100_u8 {
            let d = f32::from(step) / 100.0;
            let s = propagation_strength(0.9, d, &settings);
            assert!(s <= previous);
            assert!(s >= settings.min_strength);
            previous = s;
        }
    }

    #[test]
    fn apply_result_clamps_and_stamps() {
        let mut record = AgentRecord::new(AgentId::new(1), features(30, true, 0.0));
        record.sentiment = 0.9;
        record.analysis_in_progress = true;
        let delta = apply_result(&mut record, &result(), 1.0, 1.5, 42);
        assert!((record.sentiment - 1.0).abs() < f32::EPSILON);
        assert!((delta.sentiment_delta - 0.1).abs() < 1e-6);
        assert_eq!(record.last_inference_tick, Some(42));
        assert_eq!(record.last_influence_tick, Some(42));
        assert!(!record.analysis_in_progress);
        assert!(record.emotional_boost > 0.0);
    }

    #[test]
    fn members_receive_reduced_strength_and_are_persisted() {
        let store = Arc::new(InMemoryAttributeStore::new());
        let dirty = Arc::new(DirtyTracker::new());
        let engine =
            PropagationEngine::new(PropagationSettings::default(), store.clone(), dirty.clone());

        let mut pool = AgentPool::with_capacity(4);
        let specs = [
            (1, features(30, true, 0.1)),
            (2, features(31, true, 0.1)),
            (3, features(80, false, -0.9)),
        ];
        for (id, f) in specs {
            let agent = AgentId::new(id);
            store.insert(agent, f, 0.5);
            let handle = pool.acquire(agent, 0).unwrap();
            pool.activate(handle, AgentRecord::new(agent, f)).unwrap();
        }

        let report = engine.propagate(
            &mut pool,
            AgentId::new(1),
            &[AgentId::new(2), AgentId::new(3), AgentId::new(99)],
            &result(),
            7,
        );
        assert_eq!(report.applied, 3);
        assert_eq!(report.skipped, 1);

        let rep = pool.record(AgentId::new(1)).unwrap().sentiment;
        let near = pool.record(AgentId::new(2)).unwrap().sentiment;
        let far = pool.record(AgentId::new(3)).unwrap().sentiment;
        assert!(rep > near);
        assert!(near > far);
        assert!(far > 0.0);
        assert_eq!(dirty.len(), 3);
        assert_eq!(store.deltas_applied(AgentId::new(3)), 1);
    }
}
