//! Enumeration types shared across the engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Processing tiers
// ---------------------------------------------------------------------------

/// Processing tier of a live agent (level of detail for simulation compute).
///
/// Ordered from cheapest to most expensive, so `Tier::Dormant < Tier::High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Near no-op: coarse aging only.
    Dormant,
    /// Decay-only: sentiment drifts toward neutral.
    Low,
    /// Opinion dynamics without social propagation.
    Medium,
    /// Full update: opinion dynamics, social influence, cached results.
    High,
}

impl Tier {
    /// All tiers from most to least expensive, the order the classifier
    /// cascades demotions in.
    pub const DESCENDING: [Self; 4] = [Self::High, Self::Medium, Self::Low, Self::Dormant];

    /// Number of tiers.
    pub const COUNT: usize = 4;

    /// Stable array index for per-tier tables (`Dormant = 0` .. `High = 3`).
    pub const fn index(self) -> usize {
        match self {
            Self::Dormant => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    /// The next cheaper tier, or `None` for [`Tier::Dormant`].
    pub const fn demoted(self) -> Option<Self> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => Some(Self::Dormant),
            Self::Dormant => None,
        }
    }

    /// Whether agents in this tier may be selected for fresh inference.
    pub const fn inference_eligible(self) -> bool {
        !matches!(self, Self::Dormant)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dormant => f.write_str("dormant"),
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

// ---------------------------------------------------------------------------
// Slot lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a pool slot.
///
/// Transitions only move forward, except `Active <-> Sleeping`. Releasing a
/// slot always returns it to `Unallocated` before it can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// On the free list.
    Unallocated,
    /// Handed out by `acquire`, record not yet installed.
    Allocated,
    /// Holding a live agent that is being scheduled.
    Active,
    /// Holding a live agent parked in the dormant tier.
    Sleeping,
    /// Marked for removal; reclaimed by the next sweep once unreferenced.
    PendingDestroy,
    /// Torn down, about to be reset to `Unallocated`.
    Destroyed,
}

impl LifecycleState {
    /// Whether the slot holds an agent that counts toward the live population.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Sleeping)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unallocated, Self::Allocated)
                | (Self::Allocated, Self::Active | Self::PendingDestroy)
                | (Self::Active, Self::Sleeping | Self::PendingDestroy)
                | (Self::Sleeping, Self::Active | Self::PendingDestroy)
                | (Self::PendingDestroy, Self::Destroyed)
                | (Self::Destroyed, Self::Unallocated)
        )
    }
}

// ---------------------------------------------------------------------------
// Adaptive control
// ---------------------------------------------------------------------------

/// Performance classification produced by the adaptive controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PerformanceState {
    /// Frame time or memory far over budget: shed load aggressively.
    Critical,
    /// Over target: shrink multipliers mildly.
    Warning,
    /// Within budget: relax toward defaults.
    Good,
    /// Well under budget: allow extra fidelity and growth.
    Excellent,
}

impl std::fmt::Display for PerformanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => f.write_str("critical"),
            Self::Warning => f.write_str("warning"),
            Self::Good => f.write_str("good"),
            Self::Excellent => f.write_str("excellent"),
        }
    }
}

/// Coarse hardware class used to seed the adaptive state at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HardwareClass {
    /// Two cores or fewer.
    Low,
    /// Up to eight cores.
    Mid,
    /// More than eight cores.
    High,
}

impl HardwareClass {
    /// Classify a machine by its available parallelism.
    pub const fn from_cores(cores: usize) -> Self {
        if cores <= 2 {
            Self::Low
        } else if cores <= 8 {
            Self::Mid
        } else {
            Self::High
        }
    }

    /// Detect the class of the current machine.
    ///
    /// Falls back to [`HardwareClass::Low`] when parallelism cannot be queried.
    pub fn detect() -> Self {
        std::thread::available_parallelism().map_or(Self::Low, |n| Self::from_cores(n.get()))
    }
}

// ---------------------------------------------------------------------------
// Inference results
// ---------------------------------------------------------------------------

/// How an analysed audience is expected to respond to a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    /// Broadly agrees with the content.
    Supportive,
    /// No strong reaction.
    Neutral,
    /// Broadly disagrees with the content.
    Opposed,
    /// Likely to act on it (share, protest, campaign).
    Mobilized,
    /// Likely to tune out.
    Disengaged,
}

impl ResponseCategory {
    /// Parse a category label as returned by an inference backend.
    ///
    /// Unknown labels map to [`ResponseCategory::Neutral`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "supportive" | "support" | "positive" => Self::Supportive,
            "opposed" | "oppose" | "negative" => Self::Opposed,
            "mobilized" | "mobilised" => Self::Mobilized,
            "disengaged" | "apathetic" => Self::Disengaged,
            _ => Self::Neutral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_demotion_cascades_to_dormant() {
        assert_eq!(Tier::High.demoted(), Some(Tier::Medium));
        assert_eq!(Tier::Medium.demoted(), Some(Tier::Low));
        assert_eq!(Tier::Low.demoted(), Some(Tier::Dormant));
        assert_eq!(Tier::Dormant.demoted(), None);
    }

    #[test]
    fn tier_indices_are_distinct() {
        let mut seen = [false; Tier::COUNT];
        for tier in Tier::DESCENDING {
            let slot = seen.get_mut(tier.index());
            assert!(slot.is_some());
            if let Some(flag) = slot {
                assert!(!*flag);
                *flag = true;
            }
        }
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        use LifecycleState::*;
        assert!(Unallocated.can_transition_to(Allocated));
        assert!(Active.can_transition_to(Sleeping));
        assert!(Sleeping.can_transition_to(Active));
        assert!(Destroyed.can_transition_to(Unallocated));
        assert!(!Active.can_transition_to(Allocated));
        assert!(!PendingDestroy.can_transition_to(Active));
        assert!(!Unallocated.can_transition_to(Active));
    }

    #[test]
    fn hardware_class_thresholds() {
        assert_eq!(HardwareClass::from_cores(1), HardwareClass::Low);
        assert_eq!(HardwareClass::from_cores(2), HardwareClass::Low);
        assert_eq!(HardwareClass::from_cores(8), HardwareClass::Mid);
        assert_eq!(HardwareClass::from_cores(16), HardwareClass::High);
    }

    #[test]
    fn response_category_labels() {
        assert_eq!(ResponseCategory::from_label(" Supportive"), ResponseCategory::Supportive);
        assert_eq!(ResponseCategory::from_label("MOBILISED"), ResponseCategory::Mobilized);
        assert_eq!(ResponseCategory::from_label("???"), ResponseCategory::Neutral);
    }
}
