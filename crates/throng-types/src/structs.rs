//! Core records passed between the pool, scheduler, and inference layer.

use serde::{Deserialize, Serialize};

use crate::enums::{ResponseCategory, Tier};
use crate::ids::AgentId;

// ---------------------------------------------------------------------------
// Feature vector and agent record
// ---------------------------------------------------------------------------

/// Coarse demographic and opinion features used for clustering and
/// similarity.
///
/// The engine only reads these; the attribute collaborator owns their
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Age in years.
    pub age: u8,
    /// Education level, `0` (none) to `4` (postgraduate).
    pub education: u8,
    /// Whether the agent lives in an urban locale.
    pub urban: bool,
    /// Position on the economic opinion axis, `-1.0..=1.0`.
    pub economic_axis: f32,
    /// Position on the social opinion axis, `-1.0..=1.0`.
    pub social_axis: f32,
}

impl FeatureVector {
    /// Whether every floating-point feature is finite and in range.
    pub fn is_well_formed(&self) -> bool {
        self.economic_axis.is_finite()
            && self.social_axis.is_finite()
            && (-1.0..=1.0).contains(&self.economic_axis)
            && (-1.0..=1.0).contains(&self.social_axis)
            && self.education <= 4
    }
}

/// Mutable simulation state for one agent.
///
/// Owned by the agent pool. Per-tier update routines and the propagation
/// engine are the only writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Logical identity.
    pub id: AgentId,
    /// Clustering features.
    pub features: FeatureVector,
    /// Volatile agents need fresh inference more often.
    pub volatile: bool,
    /// Engagement / influence score, `0.0..=1.0`.
    pub engagement: f32,
    /// Size of the agent's social audience (followers, contacts).
    pub social_reach: u32,
    /// Proximity hint from the presentation layer; smaller is more important.
    pub focus_distance: f32,
    /// Current sentiment toward the active content, `-1.0..=1.0`.
    pub sentiment: f32,
    /// Temporary emotional boost from the last applied inference, `0.0..=1.0`.
    pub emotional_boost: f32,
    /// Tick of the last inference result applied to this agent.
    pub last_inference_tick: Option<u64>,
    /// Confidence of the last applied result, scaled by propagation strength.
    pub cached_confidence: f32,
    /// Tick at which the current emotional boost was applied.
    pub last_influence_tick: Option<u64>,
    /// Simulated age in days since spawn.
    pub age_days: u32,
    /// Tick of the last coarse aging step.
    pub last_aged_tick: u64,
    /// Set while a request covering this agent is in flight.
    pub analysis_in_progress: bool,
}

impl AgentRecord {
    /// Create a neutral record for a freshly spawned agent.
    pub const fn new(id: AgentId, features: FeatureVector) -> Self {
        Self {
            id,
            features,
            volatile: false,
            engagement: 0.5,
            social_reach: 0,
            focus_distance: 0.0,
            sentiment: 0.0,
            emotional_boost: 0.0,
            last_inference_tick: None,
            cached_confidence: 0.0,
            last_influence_tick: None,
            age_days: 0,
            last_aged_tick: 0,
            analysis_in_progress: false,
        }
    }

    /// Whether every scalar field is finite and in range.
    ///
    /// Update routines refuse to touch malformed records.
    pub fn is_well_formed(&self) -> bool {
        self.features.is_well_formed()
            && self.engagement.is_finite()
            && self.sentiment.is_finite()
            && self.emotional_boost.is_finite()
            && self.focus_distance.is_finite()
            && self.cached_confidence.is_finite()
    }

    /// The profile submitted to the inference service for this agent.
    pub const fn profile(&self) -> AgentProfile {
        AgentProfile {
            agent_id: self.id,
            features: self.features,
            engagement: self.engagement,
            volatile: self.volatile,
        }
    }
}

// ---------------------------------------------------------------------------
// Tier assignment
// ---------------------------------------------------------------------------

/// Per-agent tier assignment, recomputed every classification pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierAssignment {
    /// Current processing tier.
    pub tier: Tier,
    /// Effective distance used for bucketing; smaller is more important.
    pub distance: f32,
    /// Ticks elapsed since the tier last changed.
    pub frames_since_reassignment: u64,
}

impl Default for TierAssignment {
    fn default() -> Self {
        Self {
            tier: Tier::Dormant,
            distance: f32::MAX,
            frames_since_reassignment: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Cluster key
// ---------------------------------------------------------------------------

/// Discretized grouping key for representative selection.
///
/// Never persisted; two agents with equal keys share one inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterKey {
    /// Age bracket: `<25`, `25-34`, `35-49`, `50-64`, `65+` as `0..=4`.
    pub age_bracket: u8,
    /// Education level, `0..=4`.
    pub education: u8,
    /// Urban locale flag.
    pub urban: bool,
    /// Economic axis quartile, `0..=3`.
    pub economic_quartile: u8,
    /// Social axis quartile, `0..=3`.
    pub social_quartile: u8,
    /// Whether engagement is at least one half.
    pub engaged: bool,
}

impl ClusterKey {
    /// Derive the cluster key of a record.
    pub fn of(record: &AgentRecord) -> Self {
        let f = &record.features;
        Self {
            age_bracket: age_bracket(f.age),
            education: f.education.min(4),
            urban: f.urban,
            economic_quartile: axis_quartile(f.economic_axis),
            social_quartile: axis_quartile(f.social_axis),
            engaged: record.engagement >= 0.5,
        }
    }

    /// Compact, stable textual encoding used as hash input.
    pub fn encode(&self) -> String {
        format!(
            "a{}e{}u{}x{}y{}g{}",
            self.age_bracket,
            self.education,
            u8::from(self.urban),
            self.economic_quartile,
            self.social_quartile,
            u8::from(self.engaged)
        )
    }
}

/// Map an age in years to its bracket index.
const fn age_bracket(age: u8) -> u8 {
    match age {
        0..=24 => 0,
        25..=34 => 1,
        35..=49 => 2,
        50..=64 => 3,
        _ => 4,
    }
}

/// Map an axis value in `-1.0..=1.0` to its quartile index.
fn axis_quartile(value: f32) -> u8 {
    if value < -0.5 {
        0
    } else if value < 0.0 {
        1
    } else if value < 0.5 {
        2
    } else {
        3
    }
}

// ---------------------------------------------------------------------------
// Inference payloads
// ---------------------------------------------------------------------------

/// The content an inference call analyses, supplied by the event collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDescriptor {
    /// Short topic label (e.g. `"housing"`).
    pub topic: String,
    /// Full text presented to the audience.
    pub text: String,
}

impl ContentDescriptor {
    /// Build a descriptor from a topic and text.
    pub fn new(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            text: text.into(),
        }
    }
}

/// The per-agent profile submitted to the inference service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Agent the profile describes.
    pub agent_id: AgentId,
    /// Clustering features.
    pub features: FeatureVector,
    /// Engagement score.
    pub engagement: f32,
    /// Volatility flag.
    pub volatile: bool,
}

/// Result of analysing one profile against one piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Shift in sentiment, `-1.0..=1.0`.
    pub sentiment_shift: f32,
    /// Change in engagement, `-1.0..=1.0`.
    pub engagement_change: f32,
    /// Expected response category.
    pub category: ResponseCategory,
    /// Model confidence, `0.0..=1.0`.
    pub confidence: f32,
}

/// An influence delta written back to the attribute collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InfluenceDelta {
    /// Agent that received the influence.
    pub agent_id: AgentId,
    /// Applied sentiment change.
    pub sentiment_delta: f32,
    /// Applied engagement change.
    pub engagement_delta: f32,
    /// Strength the result was applied at.
    pub strength: f32,
    /// Response category of the originating result.
    pub category: ResponseCategory,
    /// Tick the influence was applied.
    pub tick: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(age: u8, economic: f32, social: f32) -> FeatureVector {
        FeatureVector {
            age,
            education: 2,
            urban: true,
            economic_axis: economic,
            social_axis: social,
        }
    }

    #[test]
    fn cluster_key_buckets_age_and_axes() {
        let record = AgentRecord::new(AgentId::new(1), features(30, -0.7, 0.6));
        let key = ClusterKey::of(&record);
        assert_eq!(key.age_bracket, 1);
        assert_eq!(key.economic_quartile, 0);
        assert_eq!(key.social_quartile, 3);
        assert!(key.engaged);
    }

    #[test]
    fn similar_agents_share_a_key() {
        let a = AgentRecord::new(AgentId::new(1), features(40, 0.1, 0.2));
        let b = AgentRecord::new(AgentId::new(2), features(45, 0.3, 0.4));
        assert_eq!(ClusterKey::of(&a), ClusterKey::of(&b));
    }

    #[test]
    fn cluster_key_encoding_is_stable() {
        let record = AgentRecord::new(AgentId::new(1), features(70, 0.0, -0.1));
        assert_eq!(ClusterKey::of(&record).encode(), "a4e2u1x2y1g1");
    }

    #[test]
    fn malformed_record_is_detected() {
        let mut record = AgentRecord::new(AgentId::new(1), features(20, 0.0, 0.0));
        assert!(record.is_well_formed());
        record.sentiment = f32::NAN;
        assert!(!record.is_well_formed());
    }

    #[test]
    fn default_assignment_is_dormant() {
        assert_eq!(TierAssignment::default().tier, Tier::Dormant);
    }
}
