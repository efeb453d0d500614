//! Representative selection.
//!
//! Agents whose cached result is missing or old are grouped by
//! [`ClusterKey`]; each cluster sends one representative to the inference
//! service and the rest of the cluster receives the result by propagation.
//!
//! The representative is the member with the highest engagement (ties go
//! to the lowest id). When more clusters need refresh than the batch cap
//! allows, clusters are ranked by their representative's priority score:
//!
//! ```text
//! wE * engagement + wV * volatile + wT * min(1, since_last / refresh) + wR * min(1, reach / reach_norm)
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use throng_types::{AgentId, AgentRecord, ClusterKey};

/// Weights of the priority score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityWeights {
    /// Weight of the engagement score.
    pub engagement: f32,
    /// Weight of the volatility flag.
    pub volatile: f32,
    /// Weight of result staleness.
    pub staleness: f32,
    /// Weight of social reach.
    pub reach: f32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            engagement: 0.4,
            volatile: 0.2,
            staleness: 0.25,
            reach: 0.15,
        }
    }
}

/// Selector tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorSettings {
    /// Ticks after which any cached result needs refresh.
    pub refresh_window: u64,
    /// Ticks after which a volatile agent's result needs refresh.
    pub volatile_refresh_window: u64,
    /// Maximum representatives per cycle at multiplier `1.0`.
    pub batch_ceiling: usize,
    /// Reach at which the reach term saturates.
    pub reach_norm: u32,
    /// Priority weights.
    pub weights: PriorityWeights,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            refresh_window: 600,
            volatile_refresh_window: 150,
            batch_ceiling: 50,
            reach_norm: 1000,
            weights: PriorityWeights::default(),
        }
    }
}

/// One chosen representative and the cluster it stands in for.
#[derive(Debug, Clone, PartialEq)]
pub struct Representative {
    /// Agent whose profile is submitted.
    pub agent_id: AgentId,
    /// Cluster the representative belongs to.
    pub key: ClusterKey,
    /// Remaining cluster members, ascending by id.
    pub members: Vec<AgentId>,
    /// Priority score the cluster was ranked by.
    pub score: f32,
}

/// Whether `record` needs a fresh analysis at `tick`.
///
/// Agents with an analysis in flight never need refresh.
pub fn needs_refresh(record: &AgentRecord, tick: u64, settings: &SelectorSettings) -> bool {
    if record.analysis_in_progress {
        return false;
    }
    let Some(last) = record.last_inference_tick else {
        return true;
    };
    let age = tick.saturating_sub(last);
    age > settings.refresh_window || (record.volatile && age > settings.volatile_refresh_window)
}

/// Priority score of a representative.
#[allow(clippy::cast_precision_loss)]
pub fn priority_score(record: &AgentRecord, tick: u64, settings: &SelectorSettings) -> f32 {
    let w = &settings.weights;
    let staleness = match record.last_inference_tick {
        None => 1.0,
        Some(_) if settings.refresh_window == 0 => 1.0,
        Some(last) => {
            let since = tick.saturating_sub(last) as f32;
            (since / settings.refresh_window as f32).min(1.0)
        }
    };
    let reach = if settings.reach_norm == 0 {
        1.0
    } else {
        (record.social_reach as f32 / settings.reach_norm as f32).min(1.0)
    };
    let volatile = if record.volatile { 1.0 } else { 0.0 };
    w.engagement * record.engagement
        + w.volatile * volatile
        + w.staleness * staleness
        + w.reach * reach
}

/// Maximum representatives this cycle: `batch_ceiling * rate`, at least one.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn representative_cap(batch_ceiling: usize, inference_rate: f32) -> usize {
    let scaled = (batch_ceiling as f32 * inference_rate.max(0.0)).floor();
    (scaled as usize).max(1)
}

/// Group eligible `candidates` by cluster and pick ranked representatives.
///
/// Candidates that do not need refresh are ignored. The result is ordered
/// by priority score, highest first, with ties on the lower agent id.
pub fn select_representatives<'a>(
    candidates: impl IntoIterator<Item = &'a AgentRecord>,
    tick: u64,
    inference_rate: f32,
    settings: &SelectorSettings,
) -> Vec<Representative> {
    let mut clusters: BTreeMap<ClusterKey, Vec<&AgentRecord>> = BTreeMap::new();
    for record in candidates {
        if needs_refresh(record, tick, settings) {
            clusters.entry(ClusterKey::of(record)).or_default().push(record);
        }
    }

    let mut representatives: Vec<Representative> = clusters
        .into_iter()
        .filter_map(|(key, members)| {
            let rep = members.iter().copied().max_by(|a, b| {
                a.engagement
                    .total_cmp(&b.engagement)
                    .then_with(|| b.id.cmp(&a.id))
            })?;
            let mut rest: Vec<AgentId> = members
                .iter()
                .map(|m| m.id)
                .filter(|id| *id != rep.id)
                .collect();
            rest.sort_unstable();
            Some(Representative {
                agent_id: rep.id,
                key,
                members: rest,
                score: priority_score(rep, tick, settings),
            })
        })
        .collect();

    representatives.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.agent_id.cmp(&b.agent_id),
        other => other,
    });
    representatives.truncate(representative_cap(settings.batch_ceiling, inference_rate));
    representatives
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use throng_types::FeatureVector;

    use super::*;

    fn record(id: u64, age: u8, engagement: f32) -> AgentRecord {
        let mut r = AgentRecord::new(
            AgentId::new(id),
            FeatureVector {
                age,
                education: 2,
                urban: true,
                economic_axis: 0.1,
                social_axis: 0.1,
            },
        );
        r.engagement = engagement;
        r
    }

    #[test]
    fn refresh_rules() {
        let settings = SelectorSettings {
            refresh_window: 100,
            volatile_refresh_window: 10,
            ..SelectorSettings::default()
        };
        let mut r = record(1, 30, 0.5);
        assert!(needs_refresh(&r, 0, &settings));

        r.last_inference_tick = Some(50);
        assert!(!needs_refresh(&r, 100, &settings));
        assert!(needs_refresh(&r, 151, &settings));

        r.volatile = true;
        assert!(needs_refresh(&r, 61, &settings));

        r.analysis_in_progress = true;
        assert!(!needs_refresh(&r, 1000, &settings));
    }

    #[test]
    fn representative_is_most_engaged_then_lowest_id() {
        let records = [record(5, 30, 0.6), record(2, 31, 0.6), record(9, 32, 0.55)];
        let reps = select_representatives(records.iter(), 0, 1.0, &SelectorSettings::default());
        assert_eq!(reps.len(), 1);
        let rep = reps.first().unwrap();
        assert_eq!(rep.agent_id, AgentId::new(2));
        assert_eq!(rep.members, vec![AgentId::new(5), AgentId::new(9)]);
    }

    #[test]
    fn cap_scales_with_inference_rate_and_keeps_best_clusters() {
        // Five age brackets -> five clusters; engagement differs per cluster.
        let records = [
            record(1, 20, 0.6),
            record(2, 30, 0.9),
            record(3, 40, 0.7),
            record(4, 55, 0.8),
            record(5, 70, 0.5),
        ];
        let settings = SelectorSettings {
            batch_ceiling: 4,
            ..SelectorSettings::default()
        };
        let reps = select_representatives(records.iter(), 0, 0.5, &settings);
        let ids: Vec<_> = reps.iter().map(|r| r.agent_id.into_inner()).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn cap_is_at_least_one() {
        assert_eq!(representative_cap(50, 0.0), 1);
        assert_eq!(representative_cap(50, 1.0), 50);
        assert_eq!(representative_cap(50, 0.8), 40);
    }

    #[test]
    fn staleness_and_reach_raise_priority() {
        let settings = SelectorSettings::default();
        let mut fresh = record(1, 30, 0.5);
        fresh.last_inference_tick = Some(990);
        let stale = record(2, 30, 0.5);
        assert!(priority_score(&stale, 1000, &settings) > priority_score(&fresh, 1000, &settings));

        let mut popular = record(3, 30, 0.5);
        popular.social_reach = 5000;
        assert!(
            priority_score(&popular, 1000, &settings) > priority_score(&stale, 1000, &settings)
        );
    }
}
