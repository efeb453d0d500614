//! In-flight request registry.
//!
//! Grants at most one outstanding inference request per content hash.
//! [`InFlightRegistry::try_begin`] checks and inserts under one lock, so
//! concurrent callers for the same hash see exactly one success.

use std::collections::HashMap;

use parking_lot::Mutex;
use throng_agents::SlotHandle;
use throng_types::{AgentId, BatchId};

use crate::content::ContentHash;

/// Bookkeeping for one outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightTicket {
    /// Batch the request belongs to.
    pub batch_id: BatchId,
    /// Agent whose profile was submitted.
    pub representative: AgentId,
    /// Other cluster members waiting on the result.
    pub members: Vec<AgentId>,
    /// Pool slots retained for the covered agents.
    pub slots: Vec<SlotHandle>,
    /// Tick the request was submitted.
    pub submitted_tick: u64,
}

impl InFlightTicket {
    /// Every agent covered by the request, representative first.
    pub fn covered(&self) -> impl Iterator<Item = AgentId> + '_ {
        std::iter::once(self.representative).chain(self.members.iter().copied())
    }
}

/// Set of content hashes with an outstanding request.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    tickets: Mutex<HashMap<ContentHash, InFlightTicket>>,
}

impl InFlightRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `hash` unless one is already outstanding.
    ///
    /// Returns `true` if the caller now owns the request.
    pub fn try_begin(&self, hash: ContentHash, ticket: InFlightTicket) -> bool {
        let mut tickets = self.tickets.lock();
        if tickets.contains_key(&hash) {
            return false;
        }
        tickets.insert(hash, ticket);
        true
    }

    /// Remove the request for `hash`, returning its ticket.
    pub fn finish(&self, hash: &ContentHash) -> Option<InFlightTicket> {
        self.tickets.lock().remove(hash)
    }

    /// Whether a request for `hash` is outstanding.
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.tickets.lock().contains_key(hash)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.tickets.lock().len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.tickets.lock().is_empty()
    }

    /// Remove and return every outstanding ticket (shutdown).
    pub fn drain(&self) -> Vec<InFlightTicket> {
        self.tickets.lock().drain().map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use throng_types::{AgentRecord, ClusterKey, ContentDescriptor, FeatureVector};

    use super::*;

    fn hash() -> ContentHash {
        let record = AgentRecord::new(
            AgentId::new(1),
            FeatureVector {
                age: 40,
                education: 2,
                urban: true,
                economic_axis: 0.0,
                social_axis: 0.0,
            },
        );
        ContentHash::of(&ContentDescriptor::new("t", "x"), &ClusterKey::of(&record))
    }

    fn ticket(rep: u64) -> InFlightTicket {
        InFlightTicket {
            batch_id: BatchId::new(),
            representative: AgentId::new(rep),
            members: vec![AgentId::new(rep.saturating_add(1))],
            slots: Vec::new(),
            submitted_tick: 0,
        }
    }

    #[test]
    fn second_begin_for_same_hash_fails() {
        let registry = InFlightRegistry::new();
        assert!(registry.try_begin(hash(), ticket(1)));
        assert!(!registry.try_begin(hash(), ticket(5)));
        let done = registry.finish(&hash()).unwrap();
        assert_eq!(done.representative, AgentId::new(1));
        assert_eq!(done.covered().count(), 2);
        assert!(registry.try_begin(hash(), ticket(5)));
    }

    #[test]
    fn concurrent_begins_have_exactly_one_winner() {
        let registry = Arc::new(InFlightRegistry::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16_u64)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if registry.try_begin(hash(), ticket(i)) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }
}
