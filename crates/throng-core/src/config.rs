//! Configuration loading and typed config structures for Throng.
//!
//! The canonical configuration is a single YAML document (see
//! `throng-config.yaml` at the project root). Every field has a default, so
//! an empty document is a valid configuration. After parsing, the inference
//! endpoint can be overridden from the environment and [`SimulationConfig::validate`]
//! rejects values the engine cannot run with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use throng_agents::RoutineConfig;
use throng_inference::{
    BackendSettings, CacheSettings, DistanceWeights, PipelineSettings, PriorityWeights,
    PropagationSettings, SelectorSettings,
};
use throng_types::Tier;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside the range the engine can run with.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// World-level settings (seed, timing, run bounds).
    #[serde(default)]
    pub world: WorldConfig,

    /// Pool and population targets.
    #[serde(default)]
    pub population: PopulationConfig,

    /// Tier capacities, thresholds and per-tier quotas.
    #[serde(default)]
    pub tiers: TierConfig,

    /// Worker pool and routine rates.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Adaptive controller thresholds and factors.
    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    /// Cache, selection, breaker and endpoint settings.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Propagation strengths, decay and distance weights.
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Content rotation for the binary's feed.
    #[serde(default)]
    pub content: ContentConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override the inference endpoint:
    /// - `INFERENCE_API_URL` overrides `inference.api_url`
    /// - `INFERENCE_API_KEY` overrides `inference.api_key`
    /// - `INFERENCE_MODEL` overrides `inference.model`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config
            .inference
            .apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };
        if self.population.pool_capacity == 0 {
            return invalid("population.pool_capacity must be at least 1");
        }
        if self.population.initial_agents > self.population.pool_capacity {
            return invalid("population.initial_agents exceeds population.pool_capacity");
        }
        if !(0.0..=1.0).contains(&self.population.volatile_fraction) {
            return invalid("population.volatile_fraction must be within 0..=1");
        }
        let t = &self.tiers;
        if !(t.high_distance > 0.0
            && t.high_distance < t.medium_distance
            && t.medium_distance < t.low_distance)
        {
            return invalid("tier distances must satisfy 0 < high < medium < low");
        }
        if t.lod_update_interval == 0 {
            return invalid("tiers.lod_update_interval must be at least 1");
        }
        if !(0.0..=1.0).contains(&t.influence_weight) {
            return invalid("tiers.influence_weight must be within 0..=1");
        }
        if self.world.ticks_per_day == 0 {
            return invalid("world.ticks_per_day must be at least 1");
        }
        let s = &self.scheduler;
        if s.min_batch == 0 || s.min_batch > s.max_batch {
            return invalid("scheduler batch bounds must satisfy 1 <= min_batch <= max_batch");
        }
        if s.frame_budget_ms <= 0.0 {
            return invalid("scheduler.frame_budget_ms must be positive");
        }
        let a = &self.adaptive;
        if a.frame_history == 0 || a.memory_history == 0 {
            return invalid("adaptive history lengths must be at least 1");
        }
        if !(a.target_frame_ms > 0.0 && a.target_frame_ms < a.critical_frame_ms) {
            return invalid("adaptive frame thresholds must satisfy 0 < target < critical");
        }
        if a.memory_warning_mb >= a.memory_critical_mb {
            return invalid("adaptive.memory_warning_mb must be below memory_critical_mb");
        }
        if !(a.multiplier_floor > 0.0 && a.multiplier_floor <= 1.0 && a.multiplier_ceiling >= 1.0) {
            return invalid("adaptive multipliers must satisfy 0 < floor <= 1 <= ceiling");
        }
        let i = &self.inference;
        if !(0.0..=1.0).contains(&i.confidence_floor) {
            return invalid("inference.confidence_floor must be within 0..=1");
        }
        if i.freshness_window_ticks == 0 || i.selection_interval_ticks == 0 {
            return invalid("inference windows and intervals must be at least 1 tick");
        }
        let p = &self.propagation;
        if !(0.0..=1.0).contains(&p.min_strength) || p.base_factor < 0.0 {
            return invalid("propagation strengths must be non-negative and min_strength <= 1");
        }
        Ok(())
    }

    /// Rates for the per-tier routines.
    pub const fn routine_config(&self) -> RoutineConfig {
        RoutineConfig {
            opinion_rate: self.scheduler.opinion_rate,
            social_rate: self.scheduler.social_rate,
            neutral_decay_rate: self.scheduler.neutral_decay_rate,
            boost_decay_window: self.propagation.decay_window_ticks,
            boost_decay_rate: self.propagation.decay_rate,
            ticks_per_day: self.world.ticks_per_day,
        }
    }

    /// Settings for the inference pipeline.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let i = &self.inference;
        let p = &self.propagation;
        PipelineSettings {
            cache: CacheSettings {
                freshness_window: i.freshness_window_ticks,
                confidence_floor: i.confidence_floor,
                max_entries: i.cache_max_entries,
            },
            selector: SelectorSettings {
                refresh_window: i.refresh_window_ticks,
                volatile_refresh_window: i.volatile_refresh_window_ticks,
                batch_ceiling: i.batch_ceiling,
                reach_norm: i.reach_norm,
                weights: PriorityWeights {
                    engagement: i.priority_weights.engagement,
                    volatile: i.priority_weights.volatile,
                    staleness: i.priority_weights.staleness,
                    reach: i.priority_weights.reach,
                },
            },
            propagation: PropagationSettings {
                base_factor: p.base_factor,
                min_strength: p.min_strength,
                representative_strength: p.representative_strength,
                boost_gain: p.boost_gain,
                weights: DistanceWeights {
                    age: p.distance_weights.age,
                    education: p.distance_weights.education,
                    locale: p.distance_weights.locale,
                    economic: p.distance_weights.economic,
                    social: p.distance_weights.social,
                },
            },
            request_timeout: Duration::from_millis(i.request_timeout_ms),
            max_batch_profiles: i.max_batch_profiles,
            breaker_threshold: i.breaker_failure_threshold,
            breaker_recovery: Duration::from_millis(i.breaker_recovery_ms),
        }
    }

    /// Connection settings for the inference backend.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            api_url: self.inference.api_url.clone(),
            api_key: self.inference.api_key.clone(),
            model: self.inference.model.clone(),
            templates_dir: self.inference.templates_dir.as_ref().map(PathBuf::from),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable run name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed for the spawner.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Real-time milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Ticks in one simulated day.
    #[serde(default = "default_ticks_per_day")]
    pub ticks_per_day: u64,

    /// Stop after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Stop after this many wall-clock seconds (0 = unlimited).
    #[serde(default)]
    pub max_real_time_seconds: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
            tick_interval_ms: default_tick_interval_ms(),
            ticks_per_day: default_ticks_per_day(),
            max_ticks: 0,
            max_real_time_seconds: 0,
        }
    }
}

/// Pool and population configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PopulationConfig {
    /// Fixed pool capacity.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: u32,

    /// Agents spawned at startup.
    #[serde(default = "default_initial_agents")]
    pub initial_agents: u32,

    /// Live population the controller steers toward when shrinking.
    #[serde(default = "default_target_population")]
    pub target_population: u32,

    /// Ticks between free-list compactions.
    #[serde(default = "default_compaction_interval_ticks")]
    pub compaction_interval_ticks: u64,

    /// Agents added or shed per controller step.
    #[serde(default = "default_population_step")]
    pub population_step: u32,

    /// Fraction of spawned agents flagged volatile.
    #[serde(default = "default_volatile_fraction")]
    pub volatile_fraction: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            initial_agents: default_initial_agents(),
            target_population: default_target_population(),
            compaction_interval_ticks: default_compaction_interval_ticks(),
            population_step: default_population_step(),
            volatile_fraction: default_volatile_fraction(),
        }
    }
}

/// Per-tier update quotas at multiplier `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VotersPerFrame {
    /// High tier.
    #[serde(default = "default_voters_high")]
    pub high: usize,
    /// Medium tier.
    #[serde(default = "default_voters_medium")]
    pub medium: usize,
    /// Low tier.
    #[serde(default = "default_voters_low")]
    pub low: usize,
    /// Dormant tier.
    #[serde(default = "default_voters_dormant")]
    pub dormant: usize,
}

impl VotersPerFrame {
    /// Quota for `tier`.
    pub const fn for_tier(&self, tier: Tier) -> usize {
        match tier {
            Tier::High => self.high,
            Tier::Medium => self.medium,
            Tier::Low => self.low,
            Tier::Dormant => self.dormant,
        }
    }
}

impl Default for VotersPerFrame {
    fn default() -> Self {
        Self {
            high: default_voters_high(),
            medium: default_voters_medium(),
            low: default_voters_low(),
            dormant: default_voters_dormant(),
        }
    }
}

/// Tier classification configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TierConfig {
    /// Maximum agents in the High tier.
    #[serde(default = "default_high_capacity")]
    pub high_capacity: usize,
    /// Maximum agents in the Medium tier.
    #[serde(default = "default_medium_capacity")]
    pub medium_capacity: usize,
    /// Maximum agents in the Low tier.
    #[serde(default = "default_low_capacity")]
    pub low_capacity: usize,
    /// Effective distance below which an agent is High.
    #[serde(default = "default_high_distance")]
    pub high_distance: f32,
    /// Effective distance below which an agent is Medium.
    #[serde(default = "default_medium_distance")]
    pub medium_distance: f32,
    /// Effective distance below which an agent is Low.
    #[serde(default = "default_low_distance")]
    pub low_distance: f32,
    /// Ticks between classification passes.
    #[serde(default = "default_lod_update_interval")]
    pub lod_update_interval: u64,
    /// Per-tier update quotas.
    #[serde(default)]
    pub voters_per_frame: VotersPerFrame,
    /// How strongly engagement shrinks the effective distance, `0..=1`.
    #[serde(default = "default_influence_weight")]
    pub influence_weight: f32,
    /// Distance factor applied to volatile agents.
    #[serde(default = "default_volatile_factor")]
    pub volatile_factor: f32,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            high_capacity: default_high_capacity(),
            medium_capacity: default_medium_capacity(),
            low_capacity: default_low_capacity(),
            high_distance: default_high_distance(),
            medium_distance: default_medium_distance(),
            low_distance: default_low_distance(),
            lod_update_interval: default_lod_update_interval(),
            voters_per_frame: VotersPerFrame::default(),
            influence_weight: default_influence_weight(),
            volatile_factor: default_volatile_factor(),
        }
    }
}

/// Worker pool and routine rate configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerConfig {
    /// Worker threads for tier batches (0 = available parallelism).
    #[serde(default)]
    pub worker_threads: usize,
    /// Budget for all tier batches in one tick, in milliseconds.
    #[serde(default = "default_frame_budget_ms")]
    pub frame_budget_ms: f64,
    /// Smallest parallel split length.
    #[serde(default = "default_min_batch")]
    pub min_batch: usize,
    /// Largest parallel split length.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Opinion drift rate.
    #[serde(default = "default_opinion_rate")]
    pub opinion_rate: f32,
    /// Social pull rate (High tier).
    #[serde(default = "default_social_rate")]
    pub social_rate: f32,
    /// Sentiment decay rate (Low tier).
    #[serde(default = "default_neutral_decay_rate")]
    pub neutral_decay_rate: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            frame_budget_ms: default_frame_budget_ms(),
            min_batch: default_min_batch(),
            max_batch: default_max_batch(),
            opinion_rate: default_opinion_rate(),
            social_rate: default_social_rate(),
            neutral_decay_rate: default_neutral_decay_rate(),
        }
    }
}

/// Adaptive controller configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdaptiveConfig {
    /// Milliseconds between controller checks.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Frame-time samples kept.
    #[serde(default = "default_frame_history")]
    pub frame_history: usize,
    /// Memory samples kept.
    #[serde(default = "default_memory_history")]
    pub memory_history: usize,
    /// Target frame time.
    #[serde(default = "default_target_frame_ms")]
    pub target_frame_ms: f64,
    /// Critical frame time.
    #[serde(default = "default_critical_frame_ms")]
    pub critical_frame_ms: f64,
    /// Fraction of the target below which performance is excellent.
    #[serde(default = "default_excellent_ratio")]
    pub excellent_ratio: f64,
    /// Memory warning threshold.
    #[serde(default = "default_memory_warning_mb")]
    pub memory_warning_mb: f64,
    /// Memory critical threshold.
    #[serde(default = "default_memory_critical_mb")]
    pub memory_critical_mb: f64,
    /// Multiplier factor applied on Critical.
    #[serde(default = "default_critical_factor")]
    pub critical_factor: f32,
    /// Multiplier factor applied on Warning.
    #[serde(default = "default_warning_factor")]
    pub warning_factor: f32,
    /// Smoothing toward `1.0` on Good.
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    /// Multiplier growth factor on Excellent.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f32,
    /// Lowest allowed multiplier.
    #[serde(default = "default_multiplier_floor")]
    pub multiplier_floor: f32,
    /// Highest allowed multiplier.
    #[serde(default = "default_multiplier_ceiling")]
    pub multiplier_ceiling: f32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            frame_history: default_frame_history(),
            memory_history: default_memory_history(),
            target_frame_ms: default_target_frame_ms(),
            critical_frame_ms: default_critical_frame_ms(),
            excellent_ratio: default_excellent_ratio(),
            memory_warning_mb: default_memory_warning_mb(),
            memory_critical_mb: default_memory_critical_mb(),
            critical_factor: default_critical_factor(),
            warning_factor: default_warning_factor(),
            smoothing: default_smoothing(),
            growth_factor: default_growth_factor(),
            multiplier_floor: default_multiplier_floor(),
            multiplier_ceiling: default_multiplier_ceiling(),
        }
    }
}

/// Weights of the representative priority score.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PriorityWeightsConfig {
    /// Engagement weight.
    #[serde(default = "default_weight_engagement")]
    pub engagement: f32,
    /// Volatility weight.
    #[serde(default = "default_weight_volatile")]
    pub volatile: f32,
    /// Staleness weight.
    #[serde(default = "default_weight_staleness")]
    pub staleness: f32,
    /// Social reach weight.
    #[serde(default = "default_weight_reach")]
    pub reach: f32,
}

impl Default for PriorityWeightsConfig {
    fn default() -> Self {
        Self {
            engagement: default_weight_engagement(),
            volatile: default_weight_volatile(),
            staleness: default_weight_staleness(),
            reach: default_weight_reach(),
        }
    }
}

/// Inference cache, selection and endpoint configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceConfig {
    /// Ticks a cached result stays fresh.
    #[serde(default = "default_freshness_window_ticks")]
    pub freshness_window_ticks: u64,
    /// Ticks after which an agent needs a fresh result.
    #[serde(default = "default_refresh_window_ticks")]
    pub refresh_window_ticks: u64,
    /// Refresh window for volatile agents.
    #[serde(default = "default_volatile_refresh_window_ticks")]
    pub volatile_refresh_window_ticks: u64,
    /// Minimum confidence a cached result needs.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// Representatives per cycle at multiplier `1.0`.
    #[serde(default = "default_batch_ceiling")]
    pub batch_ceiling: usize,
    /// Ticks between selection cycles at multiplier `1.0`.
    #[serde(default = "default_selection_interval_ticks")]
    pub selection_interval_ticks: u64,
    /// Timeout for one inference call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Profiles per submitted batch.
    #[serde(default = "default_max_batch_profiles")]
    pub max_batch_profiles: usize,
    /// Maximum cache entries.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Ticks between cache and pool sweeps.
    #[serde(default = "default_sweep_interval_ticks")]
    pub sweep_interval_ticks: u64,
    /// Social reach at which the reach term saturates.
    #[serde(default = "default_reach_norm")]
    pub reach_norm: u32,
    /// Priority score weights.
    #[serde(default)]
    pub priority_weights: PriorityWeightsConfig,
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// Milliseconds the breaker stays open.
    #[serde(default = "default_breaker_recovery_ms")]
    pub breaker_recovery_ms: u64,
    /// OpenAI-compatible base URL; empty selects the heuristic backend.
    #[serde(default)]
    pub api_url: String,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Optional prompt template directory.
    #[serde(default)]
    pub templates_dir: Option<String>,
}

impl InferenceConfig {
    /// Override endpoint fields from a variable lookup.
    ///
    /// `lookup` is normally `std::env::var`; empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("INFERENCE_API_URL") {
            self.api_url = url;
        }
        if let Some(key) = get("INFERENCE_API_KEY") {
            self.api_key = key;
        }
        if let Some(model) = get("INFERENCE_MODEL") {
            self.model = model;
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            freshness_window_ticks: default_freshness_window_ticks(),
            refresh_window_ticks: default_refresh_window_ticks(),
            volatile_refresh_window_ticks: default_volatile_refresh_window_ticks(),
            confidence_floor: default_confidence_floor(),
            batch_ceiling: default_batch_ceiling(),
            selection_interval_ticks: default_selection_interval_ticks(),
            request_timeout_ms: default_request_timeout_ms(),
            max_batch_profiles: default_max_batch_profiles(),
            cache_max_entries: default_cache_max_entries(),
            sweep_interval_ticks: default_sweep_interval_ticks(),
            reach_norm: default_reach_norm(),
            priority_weights: PriorityWeightsConfig::default(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_recovery_ms: default_breaker_recovery_ms(),
            api_url: String::new(),
            api_key: String::new(),
            model: default_model(),
            templates_dir: None,
        }
    }
}

/// Weights of the member-to-representative distance.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DistanceWeightsConfig {
    /// Age weight.
    #[serde(default = "default_weight_age")]
    pub age: f32,
    /// Education weight.
    #[serde(default = "default_weight_education")]
    pub education: f32,
    /// Locale weight.
    #[serde(default = "default_weight_locale")]
    pub locale: f32,
    /// Economic axis weight.
    #[serde(default = "default_weight_axis")]
    pub economic: f32,
    /// Social axis weight.
    #[serde(default = "default_weight_axis")]
    pub social: f32,
}

impl Default for DistanceWeightsConfig {
    fn default() -> Self {
        Self {
            age: default_weight_age(),
            education: default_weight_education(),
            locale: default_weight_locale(),
            economic: default_weight_axis(),
            social: default_weight_axis(),
        }
    }
}

/// Propagation configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropagationConfig {
    /// Member strength scale.
    #[serde(default = "default_base_factor")]
    pub base_factor: f32,
    /// Minimum member strength.
    #[serde(default = "default_min_strength")]
    pub min_strength: f32,
    /// Representative strength.
    #[serde(default = "default_representative_strength")]
    pub representative_strength: f32,
    /// Emotional boost per unit of applied sentiment shift.
    #[serde(default = "default_boost_gain")]
    pub boost_gain: f32,
    /// Ticks before an emotional boost starts relaxing.
    #[serde(default = "default_decay_window_ticks")]
    pub decay_window_ticks: u64,
    /// Fraction of the boost lost per update once relaxing.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    /// Distance weights.
    #[serde(default)]
    pub distance_weights: DistanceWeightsConfig,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            base_factor: default_base_factor(),
            min_strength: default_min_strength(),
            representative_strength: default_representative_strength(),
            boost_gain: default_boost_gain(),
            decay_window_ticks: default_decay_window_ticks(),
            decay_rate: default_decay_rate(),
            distance_weights: DistanceWeightsConfig::default(),
        }
    }
}

/// One piece of content in the rotation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicConfig {
    /// Topic label.
    pub topic: String,
    /// Content text.
    pub text: String,
}

/// Content rotation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentConfig {
    /// Ticks each topic stays current.
    #[serde(default = "default_rotation_interval_ticks")]
    pub rotation_interval_ticks: u64,
    /// Topics in rotation order.
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicConfig>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            rotation_interval_ticks: default_rotation_interval_ticks(),
            topics: default_topics(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default log level; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    "throng".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_tick_interval_ms() -> u64 {
    16
}

const fn default_ticks_per_day() -> u64 {
    240
}

const fn default_pool_capacity() -> u32 {
    12_000
}

const fn default_initial_agents() -> u32 {
    5_000
}

const fn default_target_population() -> u32 {
    10_000
}

const fn default_compaction_interval_ticks() -> u64 {
    600
}

const fn default_population_step() -> u32 {
    250
}

const fn default_volatile_fraction() -> f64 {
    0.15
}

const fn default_voters_high() -> usize {
    500
}

const fn default_voters_medium() -> usize {
    400
}

const fn default_voters_low() -> usize {
    750
}

const fn default_voters_dormant() -> usize {
    1_000
}

const fn default_high_capacity() -> usize {
    500
}

const fn default_medium_capacity() -> usize {
    2_000
}

const fn default_low_capacity() -> usize {
    7_500
}

const fn default_high_distance() -> f32 {
    50.0
}

const fn default_medium_distance() -> f32 {
    150.0
}

const fn default_low_distance() -> f32 {
    400.0
}

const fn default_lod_update_interval() -> u64 {
    10
}

const fn default_influence_weight() -> f32 {
    0.5
}

const fn default_volatile_factor() -> f32 {
    0.75
}

const fn default_frame_budget_ms() -> f64 {
    8.0
}

const fn default_min_batch() -> usize {
    16
}

const fn default_max_batch() -> usize {
    4_096
}

const fn default_opinion_rate() -> f32 {
    0.05
}

const fn default_social_rate() -> f32 {
    0.1
}

const fn default_neutral_decay_rate() -> f32 {
    0.02
}

const fn default_check_interval_ms() -> u64 {
    1_000
}

const fn default_frame_history() -> usize {
    60
}

const fn default_memory_history() -> usize {
    30
}

const fn default_target_frame_ms() -> f64 {
    16.67
}

const fn default_critical_frame_ms() -> f64 {
    33.33
}

const fn default_excellent_ratio() -> f64 {
    0.7
}

const fn default_memory_warning_mb() -> f64 {
    512.0
}

const fn default_memory_critical_mb() -> f64 {
    1_024.0
}

const fn default_critical_factor() -> f32 {
    0.6
}

const fn default_warning_factor() -> f32 {
    0.85
}

const fn default_smoothing() -> f32 {
    0.1
}

const fn default_growth_factor() -> f32 {
    1.05
}

const fn default_multiplier_floor() -> f32 {
    0.25
}

const fn default_multiplier_ceiling() -> f32 {
    1.5
}

const fn default_weight_engagement() -> f32 {
    0.4
}

const fn default_weight_volatile() -> f32 {
    0.2
}

const fn default_weight_staleness() -> f32 {
    0.25
}

const fn default_weight_reach() -> f32 {
    0.15
}

const fn default_freshness_window_ticks() -> u64 {
    600
}

const fn default_refresh_window_ticks() -> u64 {
    600
}

const fn default_volatile_refresh_window_ticks() -> u64 {
    150
}

const fn default_confidence_floor() -> f32 {
    0.3
}

const fn default_batch_ceiling() -> usize {
    50
}

const fn default_selection_interval_ticks() -> u64 {
    30
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_max_batch_profiles() -> usize {
    10
}

const fn default_cache_max_entries() -> usize {
    10_000
}

const fn default_sweep_interval_ticks() -> u64 {
    300
}

const fn default_reach_norm() -> u32 {
    1_000
}

const fn default_breaker_failure_threshold() -> u32 {
    5
}

const fn default_breaker_recovery_ms() -> u64 {
    30_000
}

fn default_model() -> String {
    "gpt-4o-mini".to_owned()
}

const fn default_weight_age() -> f32 {
    0.2
}

const fn default_weight_education() -> f32 {
    0.15
}

const fn default_weight_locale() -> f32 {
    0.15
}

const fn default_weight_axis() -> f32 {
    0.25
}

const fn default_base_factor() -> f32 {
    0.8
}

const fn default_min_strength() -> f32 {
    0.1
}

const fn default_representative_strength() -> f32 {
    1.0
}

const fn default_boost_gain() -> f32 {
    1.5
}

const fn default_decay_window_ticks() -> u64 {
    30
}

const fn default_decay_rate() -> f32 {
    0.1
}

const fn default_rotation_interval_ticks() -> u64 {
    900
}

fn default_topics() -> Vec<TopicConfig> {
    [
        ("housing", "The city council proposes a freeze on rent increases."),
        ("transit", "Public transit fares will be cut in half next year."),
        ("taxes", "A new flat income tax replaces the progressive brackets."),
        ("energy", "The last coal plant in the region will close early."),
    ]
    .into_iter()
    .map(|(topic, text)| TopicConfig {
        topic: topic.to_owned(),
        text: text.to_owned(),
    })
    .collect()
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.population.pool_capacity, 12_000);
        assert_eq!(config.tiers.high_capacity, 500);
        assert_eq!(config.tiers.medium_capacity, 2_000);
        assert_eq!(config.tiers.low_capacity, 7_500);
        assert_eq!(config.adaptive.frame_history, 60);
        assert_eq!(config.adaptive.memory_history, 30);
    }

    #[test]
    fn parse_empty_yaml() {
        let config = SimulationConfig::parse("").unwrap();
        assert_eq!(config.world.seed, 42);
        assert_eq!(config.content.topics.len(), 4);
    }

    #[test]
    fn parse_partial_yaml_keeps_defaults() {
        let yaml = r"
world:
  seed: 7
  max_ticks: 100
tiers:
  high_capacity: 10
  voters_per_frame:
    high: 3
inference:
  batch_ceiling: 5
  priority_weights:
    reach: 0.5
propagation:
  distance_weights:
    locale: 0.0
content:
  topics:
    - topic: water
      text: Water prices rise.
";
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.world.seed, 7);
        assert_eq!(config.world.max_ticks, 100);
        assert_eq!(config.world.ticks_per_day, 240);
        assert_eq!(config.tiers.high_capacity, 10);
        assert_eq!(config.tiers.voters_per_frame.high, 3);
        assert_eq!(config.tiers.voters_per_frame.low, 750);
        assert_eq!(config.inference.batch_ceiling, 5);
        assert!((config.inference.priority_weights.reach - 0.5).abs() < f32::EPSILON);
        assert!(config.propagation.distance_weights.locale.abs() < f32::EPSILON);
        assert_eq!(config.content.topics.first().unwrap().topic, "water");
    }

    #[test]
    fn invalid_tier_distances_are_rejected() {
        let yaml = "tiers:\n  high_distance: 500.0\n";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn volatile_fraction_must_be_a_probability() {
        let err = SimulationConfig::parse("population:\n  volatile_fraction: 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn invalid_yaml_is_a_yaml_error() {
        let err = SimulationConfig::parse("world: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn env_overrides_replace_endpoint_fields() {
        let mut inference = InferenceConfig::default();
        inference.apply_env_overrides(|key| match key {
            "INFERENCE_API_URL" => Some("http://localhost:8000/v1".to_owned()),
            "INFERENCE_MODEL" => Some("   ".to_owned()),
            _ => None,
        });
        assert_eq!(inference.api_url, "http://localhost:8000/v1");
        assert_eq!(inference.model, "gpt-4o-mini");
        assert!(inference.api_key.is_empty());
    }

    #[test]
    fn derived_settings_follow_sections() {
        let config = SimulationConfig::default();
        let pipeline = config.pipeline_settings();
        assert_eq!(pipeline.selector.batch_ceiling, 50);
        assert_eq!(pipeline.request_timeout, Duration::from_secs(30));
        let routines = config.routine_config();
        assert_eq!(routines.ticks_per_day, 240);
        assert_eq!(routines.boost_decay_window, 30);
        assert_eq!(config.tiers.voters_per_frame.for_tier(Tier::Dormant), 1_000);
        assert!(config.backend_settings().api_url.is_empty());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../throng-config.yaml");
        let config = SimulationConfig::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
    }
}
