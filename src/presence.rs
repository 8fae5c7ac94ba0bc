use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::types::PlayerId;

/// Latest "currently connected" snapshot, published by the accrual scheduler.
#[derive(Default)]
pub struct PresenceTracker {
    connected: Mutex<HashSet<PlayerId>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot and returns the ids that were connected before
    /// but are not anymore.
    pub fn refresh<I>(&self, ids: I) -> Vec<PlayerId>
    where
        I: IntoIterator<Item = PlayerId>,
    {
        let next: HashSet<PlayerId> = ids.into_iter().collect();
        let mut connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
        let mut departed: Vec<PlayerId> = connected.difference(&next).cloned().collect();
        departed.sort();
        *connected = next;
        departed
    }

    pub fn snapshot(&self) -> Vec<PlayerId> {
        let connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<PlayerId> = connected.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(player)
    }

    pub fn len(&self) -> usize {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<PlayerId> {
        values
            .iter()
            .filter_map(|value| PlayerId::parse(value))
            .collect()
    }

    #[test]
    fn refresh_reports_departed_players() {
        let tracker = PresenceTracker::new();
        assert!(tracker.refresh(ids(&["a", "b", "c"])).is_empty());
        let departed = tracker.refresh(ids(&["B", "d"]));
        assert_eq!(departed, ids(&["a", "c"]));
        assert_eq!(tracker.snapshot(), ids(&["b", "d"]));
        assert!(tracker.contains(&ids(&["D"])[0]));
    }

    #[test]
    fn empty_refresh_clears_everyone() {
        let tracker = PresenceTracker::new();
        tracker.refresh(ids(&["a"]));
        assert_eq!(tracker.refresh(Vec::new()), ids(&["a"]));
        assert!(tracker.is_empty());
    }
}
