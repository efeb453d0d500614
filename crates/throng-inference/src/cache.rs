//! Inference result cache.
//!
//! Entries are keyed by [`ContentHash`] and stamped with the tick they were
//! created. Validity is checked lazily on [`InferenceCache::lookup`]: an
//! entry is served only while `tick - created_tick < freshness_window` and
//! its confidence is at least the floor. Invalid entries stay resident
//! until the periodic [`InferenceCache::sweep`] removes them.
//!
//! The cache is bounded. Entries are kept in insertion order in an
//! [`IndexMap`], and a replaced entry moves to the back, so the front is
//! always the oldest insert. Inserting into a full cache evicts the front
//! in O(1).

use indexmap::IndexMap;
use throng_types::{AnalysisResult, ResponseCategory};

use crate::content::ContentHash;

/// Cache tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSettings {
    /// Ticks an entry stays fresh.
    pub freshness_window: u64,
    /// Minimum confidence an entry needs to be served.
    pub confidence_floor: f32,
    /// Maximum resident entries.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            freshness_window: 600,
            confidence_floor: 0.3,
            max_entries: 10_000,
        }
    }
}

/// One cached analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    /// Shift in sentiment.
    pub sentiment_shift: f32,
    /// Change in engagement.
    pub engagement_change: f32,
    /// Expected response category.
    pub category: ResponseCategory,
    /// Tick the entry was inserted.
    pub created_tick: u64,
    /// Model confidence, `0.0..=1.0`.
    pub confidence: f32,
}

impl CacheEntry {
    /// Build an entry from a fresh analysis.
    pub const fn from_result(result: &AnalysisResult, tick: u64) -> Self {
        Self {
            sentiment_shift: result.sentiment_shift,
            engagement_change: result.engagement_change,
            category: result.category,
            created_tick: tick,
            confidence: result.confidence,
        }
    }

    /// Whether the entry may be served at `tick`.
    pub fn is_valid(&self, tick: u64, settings: &CacheSettings) -> bool {
        tick.saturating_sub(self.created_tick) < settings.freshness_window
            && self.confidence >= settings.confidence_floor
    }

    /// The cached analysis.
    pub const fn result(&self) -> AnalysisResult {
        AnalysisResult {
            sentiment_shift: self.sentiment_shift,
            engagement_change: self.engagement_change,
            category: self.category,
            confidence: self.confidence,
        }
    }
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable (includes stale).
    pub misses: u64,
    /// Misses where an entry existed but was stale or low-confidence.
    pub stale: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
    /// Entries removed by sweeps.
    pub swept: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, `0.0` before any lookup.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits.saturating_add(self.misses);
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded map from content hash to the last analysis.
#[derive(Debug)]
pub struct InferenceCache {
    settings: CacheSettings,
    entries: IndexMap<ContentHash, CacheEntry>,
    stats: CacheStats,
}

impl InferenceCache {
    /// Create an empty cache.
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: IndexMap::with_capacity(settings.max_entries.min(4096)),
            stats: CacheStats::default(),
        }
    }

    /// Look up a valid entry for `hash` at `tick`.
    ///
    /// Returns `None` (a miss) for absent, stale, or low-confidence entries.
    /// Stale entries are not removed here.
    pub fn lookup(&mut self, hash: &ContentHash, tick: u64) -> Option<CacheEntry> {
        match self.entries.get(hash) {
            Some(entry) if entry.is_valid(tick, &self.settings) => {
                self.stats.hits = self.stats.hits.saturating_add(1);
                Some(*entry)
            }
            Some(_) => {
                self.stats.misses = self.stats.misses.saturating_add(1);
                self.stats.stale = self.stats.stale.saturating_add(1);
                None
            }
            None => {
                self.stats.misses = self.stats.misses.saturating_add(1);
                None
            }
        }
    }

    /// Peek at an entry without touching statistics or validity.
    pub fn peek(&self, hash: &ContentHash) -> Option<&CacheEntry> {
        self.entries.get(hash)
    }

    /// Store a fresh analysis, replacing any previous entry for `hash`.
    pub fn insert(&mut self, hash: ContentHash, result: &AnalysisResult, tick: u64) {
        if self.settings.max_entries == 0 {
            return;
        }
        if self.entries.shift_remove(&hash).is_none()
            && self.entries.len() >= self.settings.max_entries
            && self.entries.shift_remove_index(0).is_some()
        {
            self.stats.evictions = self.stats.evictions.saturating_add(1);
        }
        self.entries.insert(hash, CacheEntry::from_result(result, tick));
    }

    /// Remove every entry that is no longer valid at `tick`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&mut self, tick: u64) -> usize {
        let before = self.entries.len();
        let settings = self.settings;
        self.entries.retain(|_, entry| entry.is_valid(tick, &settings));
        let removed = before.saturating_sub(self.entries.len());
        self.stats.swept = self
            .stats
            .swept
            .saturating_add(u64::try_from(removed).unwrap_or(u64::MAX));
        removed
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Resident entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cumulative counters.
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Active settings.
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Approximate size of the resident entries in bytes.
    pub fn estimated_bytes(&self) -> usize {
        self.entries
            .len()
            .saturating_mul(size_of::<(ContentHash, CacheEntry)>())
    }
}
