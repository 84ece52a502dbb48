//! Candidate gathering state and collection
//!
//! [`CandidateCollector`] is the append-only list of local candidates for one
//! negotiation round. A [`CandidateSnapshot`] freezes the list at a point in
//! time (the moment the local description is reported to signaling);
//! everything appended afterwards is the trickle set returned by
//! [`CandidateCollector::since`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::candidate::IceCandidate;

/// ICE gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatheringState {
    /// Gathering has not started
    #[default]
    New,

    /// Candidates are being gathered
    Gathering,

    /// The transport signalled end-of-candidates
    Complete,
}

impl fmt::Display for GatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Gathering => write!(f, "gathering"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Point-in-time copy of a collector's candidates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    candidates: Vec<IceCandidate>,
}

impl CandidateSnapshot {
    /// Candidates captured by the snapshot
    pub fn candidates(&self) -> &[IceCandidate] {
        &self.candidates
    }

    /// Number of captured candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether nothing had been gathered when the snapshot was taken
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Whether the snapshot is a prefix of (or equal to) `candidates`
    pub fn is_prefix_of(&self, candidates: &[IceCandidate]) -> bool {
        candidates.starts_with(&self.candidates)
    }

    /// Consume the snapshot
    pub fn into_candidates(self) -> Vec<IceCandidate> {
        self.candidates
    }
}

/// Append-only candidate list for a single gathering phase
#[derive(Debug, Clone, Default)]
pub struct CandidateCollector {
    candidates: Vec<IceCandidate>,
}

impl CandidateCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly gathered candidate, returning its index
    pub fn push(&mut self, candidate: IceCandidate) -> usize {
        trace!(candidate = %candidate, "Collected local candidate");
        self.candidates.push(candidate);
        self.candidates.len() - 1
    }

    /// All candidates gathered so far, in discovery order
    pub fn candidates(&self) -> &[IceCandidate] {
        &self.candidates
    }

    /// Number of gathered candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether no candidate has been gathered
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Take a point-in-time copy
    pub fn snapshot(&self) -> CandidateSnapshot {
        CandidateSnapshot {
            candidates: self.candidates.clone(),
        }
    }

    /// Candidates appended after `snapshot` was taken
    ///
    /// Returns every candidate if the snapshot does not belong to this
    /// collector's current gathering phase.
    pub fn since(&self, snapshot: &CandidateSnapshot) -> &[IceCandidate] {
        if snapshot.is_prefix_of(&self.candidates) {
            &self.candidates[snapshot.len()..]
        } else {
            &self.candidates
        }
    }

    /// Start a new gathering phase
    pub fn clear(&mut self) {
        self.candidates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateType;

    fn sample(n: u16) -> IceCandidate {
        IceCandidate::host(n.to_string(), format!("10.0.0.{}", n), 5000 + n)
    }

    #[test]
    fn snapshot_stays_a_prefix_while_collecting() {
        let mut collector = CandidateCollector::new();
        collector.push(sample(1));
        let snapshot = collector.snapshot();

        for n in 2..6 {
            collector.push(sample(n));
            assert!(snapshot.is_prefix_of(collector.candidates()));
        }

        assert_eq!(snapshot.len(), 1);
        assert_eq!(collector.len(), 5);
    }

    #[test]
    fn since_returns_only_late_candidates() {
        let mut collector = CandidateCollector::new();
        let empty = collector.snapshot();
        assert!(empty.is_empty());

        collector.push(sample(1));
        let snapshot = collector.snapshot();
        collector.push(IceCandidate::server_reflexive("2", "203.0.113.7", 6000, "10.0.0.1", 5001));

        let late = collector.since(&snapshot);
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].candidate_type, CandidateType::ServerReflexive);
        assert!(!snapshot.candidates().contains(&late[0]));
        assert_eq!(collector.since(&empty).len(), 2);
    }

    #[test]
    fn clear_starts_a_new_phase() {
        let mut collector = CandidateCollector::new();
        collector.push(sample(1));
        collector.push(sample(2));
        let stale = collector.snapshot();

        collector.clear();
        collector.push(sample(3));

        assert!(!stale.is_prefix_of(collector.candidates()));
        assert_eq!(collector.since(&stale), collector.candidates());
    }

    #[test]
    fn gathering_state_display() {
        assert_eq!(GatheringState::default(), GatheringState::New);
        assert_eq!(GatheringState::Gathering.to_string(), "gathering");
    }
}
