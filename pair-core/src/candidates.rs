//! Candidate bookkeeping for MedPair.
//!
//! The relay session carries one append-only candidate list that both sides
//! write to. Each observer (push subscription or poll) sees the whole list on
//! every observation, so without bookkeeping the same candidate would be
//! applied to the peer connection over and over. The tracker records how many
//! entries have already been consumed and yields only the new suffix.

use pair_types::IceCandidate;

/// Tracks how many relay candidates have been applied locally.
///
/// Consumption is monotonic: given observations of lengths 0 → 2 → 5, the
/// tracker yields 2 entries, then 3, never reapplying the first two. Push and
/// poll can both fire against the same growing list without duplicates.
#[derive(Debug, Clone, Default)]
pub struct CandidateTracker {
    seen: usize,
}

impl CandidateTracker {
    /// Create a tracker that has consumed nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many candidates have been consumed so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Consume the not-yet-seen suffix of the observed list.
    ///
    /// Returns clones of the new entries and advances the tracker. A list
    /// shorter than what was already seen yields nothing (the relay list is
    /// append-only; a shorter snapshot is a stale read).
    pub fn take_new(&mut self, observed: &[IceCandidate]) -> Vec<IceCandidate> {
        if observed.len() <= self.seen {
            return Vec::new();
        }
        let fresh = observed[self.seen..].to_vec();
        self.seen = observed.len();
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(n: usize) -> Vec<IceCandidate> {
        (0..n)
            .map(|i| IceCandidate::new(format!("candidate:{}", i)))
            .collect()
    }

    #[test]
    fn starts_with_nothing_seen() {
        let tracker = CandidateTracker::new();
        assert_eq!(tracker.seen(), 0);
    }

    #[test]
    fn growing_list_yields_only_the_suffix() {
        let mut tracker = CandidateTracker::new();

        assert!(tracker.take_new(&list(0)).is_empty());

        let first = tracker.take_new(&list(2));
        assert_eq!(first.len(), 2);

        let second = tracker.take_new(&list(5));
        assert_eq!(second.len(), 3);
        assert_eq!(second[0].candidate, "candidate:2");
        assert_eq!(tracker.seen(), 5);
    }

    #[test]
    fn repeated_observation_is_a_noop() {
        let mut tracker = CandidateTracker::new();
        tracker.take_new(&list(3));
        assert!(tracker.take_new(&list(3)).is_empty());
        assert!(tracker.take_new(&list(3)).is_empty());
        assert_eq!(tracker.seen(), 3);
    }

    #[test]
    fn stale_shorter_snapshot_yields_nothing() {
        let mut tracker = CandidateTracker::new();
        tracker.take_new(&list(4));
        assert!(tracker.take_new(&list(2)).is_empty());
        assert_eq!(tracker.seen(), 4);
    }

    #[test]
    fn interleaved_push_and_poll_never_duplicate() {
        // Both paths observe the same growing list; the tracker is shared.
        let mut tracker = CandidateTracker::new();
        let mut applied = Vec::new();

        applied.extend(tracker.take_new(&list(1))); // push sees 1
        applied.extend(tracker.take_new(&list(1))); // poll sees the same 1
        applied.extend(tracker.take_new(&list(4))); // poll sees 4
        applied.extend(tracker.take_new(&list(4))); // push sees the same 4

        assert_eq!(applied.len(), 4);
        let lines: Vec<_> = applied.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(
            lines,
            ["candidate:0", "candidate:1", "candidate:2", "candidate:3"]
        );
    }
}
