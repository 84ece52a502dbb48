//! Negotiation session state
//!
//! A [`NegotiationSession`] is the per-call-leg record of one offer/answer
//! exchange: the four state axes, the gathered candidates, the snapshot taken
//! when the local SDP was reported, and the at-most-once report latch.
//!
//! The session is a cheap cloneable handle. The call layer owns its lifetime;
//! the negotiation driver is the only writer while a round is running, and
//! every write goes through the per-session lock so readers always observe a
//! consistent view (in particular, the snapshot and the candidate list are
//! updated under the same lock).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rtcpeer_ice_core::{CandidateCollector, CandidateSnapshot, GatheringState, IceCandidate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::description::SessionDescription;
use crate::error::{NegotiationError, Result};
use crate::negotiation::driver::RoundControl;

/// Unique identifier of a negotiation session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which side of the offer/answer exchange this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationRole {
    /// Creates the offer (outbound dial)
    Offerer,
    /// Creates the answer from a remote offer (inbound call)
    Answerer,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offerer => write!(f, "offerer"),
            Self::Answerer => write!(f, "answerer"),
        }
    }
}

/// Progress of the local description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalDescriptionState {
    /// Nothing created this round
    NotCreated,
    /// Offer/answer creation or local application in flight
    Creating,
    /// Applied on the transport and reportable to signaling
    Ready,
    /// Offer/answer exchange complete (remote counterpart applied too)
    Applied,
}

/// Progress of the remote description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteDescriptionState {
    NotReceived,
    Applied,
}

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Data captured when the local SDP is reported
#[derive(Debug, Clone)]
pub(crate) struct ReportedSdp {
    pub round: u32,
    pub description: SessionDescription,
    pub snapshot: CandidateSnapshot,
}

#[derive(Debug)]
struct SessionState {
    round: u32,
    local_description_state: LocalDescriptionState,
    remote_description_state: RemoteDescriptionState,
    ice_gathering_state: GatheringState,
    connection_state: ConnectionState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    candidates: CandidateCollector,
    candidate_snapshot: Option<CandidateSnapshot>,
    sdp_ready_reported: bool,
    gathering_timed_out: bool,
    stopped: bool,
    last_error: Option<NegotiationError>,
    updated_at: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            round: 1,
            local_description_state: LocalDescriptionState::NotCreated,
            remote_description_state: RemoteDescriptionState::NotReceived,
            ice_gathering_state: GatheringState::New,
            connection_state: ConnectionState::New,
            local_description: None,
            remote_description: None,
            candidates: CandidateCollector::new(),
            candidate_snapshot: None,
            sdp_ready_reported: false,
            gathering_timed_out: false,
            stopped: false,
            last_error: None,
            updated_at: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Instant::now();
    }
}

/// Read-only view of a session at one instant
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub role: NegotiationRole,
    pub round: u32,
    pub local_description_state: LocalDescriptionState,
    pub remote_description_state: RemoteDescriptionState,
    pub ice_gathering_state: GatheringState,
    pub connection_state: ConnectionState,
    pub candidate_count: usize,
    pub snapshot_len: Option<usize>,
    pub sdp_ready_reported: bool,
    pub gathering_timed_out: bool,
    pub stopped: bool,
}

/// One negotiation session per call leg
#[derive(Clone)]
pub struct NegotiationSession {
    id: SessionId,
    role: NegotiationRole,
    created_at: Instant,
    state: Arc<RwLock<SessionState>>,
    round_control: Arc<Mutex<Option<RoundControl>>>,
}

impl fmt::Debug for NegotiationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl NegotiationSession {
    /// Create a session with a fresh ID
    pub fn new(role: NegotiationRole) -> Self {
        Self::with_id(SessionId::new(), role)
    }

    /// Create a session for an outbound dial
    pub fn offerer() -> Self {
        Self::new(NegotiationRole::Offerer)
    }

    /// Create a session for an inbound call
    pub fn answerer() -> Self {
        Self::new(NegotiationRole::Answerer)
    }

    /// Create a session with a caller-chosen ID
    pub fn with_id(id: SessionId, role: NegotiationRole) -> Self {
        tracing::debug!(session_id = %id, %role, "Created negotiation session");
        Self {
            id,
            role,
            created_at: Instant::now(),
            state: Arc::new(RwLock::new(SessionState::new())),
            round_control: Arc::new(Mutex::new(None)),
        }
    }

    /// Session identifier
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Negotiation role (fixed for the session's lifetime)
    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    /// Current negotiation round, starting at 1
    pub fn round(&self) -> u32 {
        self.state.read().round
    }

    pub fn local_description_state(&self) -> LocalDescriptionState {
        self.state.read().local_description_state
    }

    pub fn remote_description_state(&self) -> RemoteDescriptionState {
        self.state.read().remote_description_state
    }

    pub fn ice_gathering_state(&self) -> GatheringState {
        self.state.read().ice_gathering_state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection_state
    }

    /// Local description applied this round, if any
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.read().local_description.clone()
    }

    /// Remote description applied this round, if any
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.read().remote_description.clone()
    }

    /// All candidates gathered this round, in discovery order
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.read().candidates.candidates().to_vec()
    }

    /// Number of candidates gathered this round
    pub fn candidate_count(&self) -> usize {
        self.state.read().candidates.len()
    }

    /// Candidates captured when the local SDP was reported
    pub fn candidate_snapshot(&self) -> Option<CandidateSnapshot> {
        self.state.read().candidate_snapshot.clone()
    }

    /// Candidates gathered after the report, for trickle delivery
    ///
    /// Empty until the local SDP has been reported.
    pub fn trickle_candidates(&self) -> Vec<IceCandidate> {
        let state = self.state.read();
        match &state.candidate_snapshot {
            Some(snapshot) => state.candidates.since(snapshot).to_vec(),
            None => Vec::new(),
        }
    }

    /// Whether the local SDP has been reported this round
    pub fn sdp_ready_reported(&self) -> bool {
        self.state.read().sdp_ready_reported
    }

    /// Whether gathering outlived its timeout this round
    pub fn gathering_timed_out(&self) -> bool {
        self.state.read().gathering_timed_out
    }

    /// Whether the session has been stopped
    pub fn is_stopped(&self) -> bool {
        self.state.read().stopped
    }

    /// Last fatal error recorded for the session
    pub fn last_error(&self) -> Option<NegotiationError> {
        self.state.read().last_error.clone()
    }

    /// Time since the session was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last state change
    pub fn idle_time(&self) -> Duration {
        self.state.read().updated_at.elapsed()
    }

    /// Consistent view of every state axis
    pub fn info(&self) -> SessionInfo {
        let state = self.state.read();
        SessionInfo {
            session_id: self.id.clone(),
            role: self.role,
            round: state.round,
            local_description_state: state.local_description_state,
            remote_description_state: state.remote_description_state,
            ice_gathering_state: state.ice_gathering_state,
            connection_state: state.connection_state,
            candidate_count: state.candidates.len(),
            snapshot_len: state.candidate_snapshot.as_ref().map(CandidateSnapshot::len),
            sdp_ready_reported: state.sdp_ready_reported,
            gathering_timed_out: state.gathering_timed_out,
            stopped: state.stopped,
        }
    }

    /// Re-arm the session for a renegotiation round
    ///
    /// Cancels the running round (without touching the transport), clears the
    /// per-round state including the SDP-ready latch, and returns the new
    /// round number. The connection state is kept: the underlying transport
    /// usually stays up across renegotiations.
    pub fn rearm(&self) -> Result<u32> {
        if let Some(control) = self.round_control.lock().take() {
            control.cancel();
        }

        let mut state = self.state.write();
        if state.stopped {
            return Err(NegotiationError::invalid_state(
                &self.id,
                "cannot renegotiate a stopped session",
            ));
        }

        state.round += 1;
        state.local_description_state = LocalDescriptionState::NotCreated;
        state.remote_description_state = RemoteDescriptionState::NotReceived;
        state.ice_gathering_state = GatheringState::New;
        state.local_description = None;
        state.remote_description = None;
        state.candidates.clear();
        state.candidate_snapshot = None;
        state.sdp_ready_reported = false;
        state.gathering_timed_out = false;
        state.last_error = None;
        state.touch();

        tracing::debug!(session_id = %self.id, round = state.round, "Session re-armed for renegotiation");
        Ok(state.round)
    }

    // ----- driver-side transitions -----

    pub(crate) fn install_round(&self, control: RoundControl) {
        if let Some(previous) = self.round_control.lock().replace(control) {
            previous.cancel();
        }
    }

    pub(crate) fn round_control(&self) -> Option<RoundControl> {
        self.round_control.lock().clone()
    }

    pub(crate) fn take_round_control(&self) -> Option<RoundControl> {
        self.round_control.lock().take()
    }

    /// NotCreated -> Creating
    pub(crate) fn begin_local_description(&self) -> Result<u32> {
        let mut state = self.state.write();
        if state.stopped {
            return Err(NegotiationError::Cancelled);
        }
        if state.local_description_state != LocalDescriptionState::NotCreated {
            return Err(NegotiationError::invalid_state(
                &self.id,
                format!(
                    "local description is {:?}; re-arm the session to renegotiate",
                    state.local_description_state
                ),
            ));
        }
        state.local_description_state = LocalDescriptionState::Creating;
        state.touch();
        Ok(state.round)
    }

    /// Creating -> Ready; gathering starts with the local description
    pub(crate) fn mark_local_ready(&self, round: u32, description: SessionDescription) -> Result<()> {
        let mut state = self.state.write();
        self.check_round(&state, round)?;
        state.local_description_state = LocalDescriptionState::Ready;
        state.local_description = Some(description);
        if state.ice_gathering_state == GatheringState::New {
            state.ice_gathering_state = GatheringState::Gathering;
        }
        if state.remote_description_state == RemoteDescriptionState::Applied {
            state.local_description_state = LocalDescriptionState::Applied;
        }
        state.touch();
        Ok(())
    }

    /// Latch the at-most-once report and fix the candidate snapshot
    pub(crate) fn latch_sdp_ready(&self, round: u32) -> Result<ReportedSdp> {
        let mut state = self.state.write();
        self.check_round(&state, round)?;
        if state.sdp_ready_reported {
            return Err(NegotiationError::DuplicateSdpReady {
                session_id: self.id.clone(),
                round: state.round,
            });
        }
        let description = state.local_description.clone().ok_or_else(|| {
            NegotiationError::invalid_state(&self.id, "no local description to report")
        })?;

        let snapshot = state.candidates.snapshot();
        state.candidate_snapshot = Some(snapshot.clone());
        state.sdp_ready_reported = true;
        state.touch();

        Ok(ReportedSdp {
            round: state.round,
            description,
            snapshot,
        })
    }

    /// Append a gathered candidate
    ///
    /// Returns whether it arrived after the report, or `None` when `round`
    /// is no longer current and the candidate was dropped.
    pub(crate) fn push_candidate(&self, round: u32, candidate: IceCandidate) -> Option<bool> {
        let mut state = self.state.write();
        if self.check_round(&state, round).is_err() {
            return None;
        }
        if state.ice_gathering_state == GatheringState::New {
            state.ice_gathering_state = GatheringState::Gathering;
        }
        state.candidates.push(candidate);
        state.touch();
        Some(state.sdp_ready_reported)
    }

    /// Gathering -> Complete; returns false if already complete or stale
    pub(crate) fn mark_gathering_complete(&self, round: u32) -> bool {
        let mut state = self.state.write();
        if self.check_round(&state, round).is_err() || state.ice_gathering_state == GatheringState::Complete {
            return false;
        }
        state.ice_gathering_state = GatheringState::Complete;
        state.touch();
        true
    }

    /// Returns false when `round` is no longer current
    pub(crate) fn mark_gathering_timed_out(&self, round: u32) -> bool {
        let mut state = self.state.write();
        if self.check_round(&state, round).is_err() {
            return false;
        }
        state.gathering_timed_out = true;
        state.touch();
        true
    }

    /// Check that a remote description may still be applied this round
    pub(crate) fn check_remote_acceptable(&self) -> Result<()> {
        let state = self.state.read();
        if state.stopped {
            return Err(NegotiationError::Cancelled);
        }
        if state.remote_description_state == RemoteDescriptionState::Applied {
            return Err(NegotiationError::DuplicateRemoteDescription {
                session_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// NotReceived -> Applied
    pub(crate) fn mark_remote_applied(&self, round: u32, description: SessionDescription) -> Result<()> {
        let mut state = self.state.write();
        self.check_round(&state, round)?;
        if state.remote_description_state == RemoteDescriptionState::Applied {
            return Err(NegotiationError::DuplicateRemoteDescription {
                session_id: self.id.clone(),
            });
        }
        state.remote_description_state = RemoteDescriptionState::Applied;
        state.remote_description = Some(description);
        if state.local_description_state == LocalDescriptionState::Ready {
            state.local_description_state = LocalDescriptionState::Applied;
        }
        state.touch();
        Ok(())
    }

    /// Record a transport-reported connection state; returns the previous
    /// state when it changed
    pub(crate) fn set_connection_state(&self, round: u32, next: ConnectionState) -> Option<ConnectionState> {
        let mut state = self.state.write();
        if state.round != round {
            return None;
        }
        let previous = state.connection_state;
        if previous == next || previous.is_terminal() {
            return None;
        }
        state.connection_state = next;
        state.touch();
        Some(previous)
    }

    /// Returns false when `round` is no longer current
    pub(crate) fn record_failure(&self, round: u32, error: &NegotiationError) -> bool {
        let mut state = self.state.write();
        if state.round != round {
            return false;
        }
        state.last_error = Some(error.clone());
        state.touch();
        true
    }

    /// Mark stopped; returns true only for the first call
    pub(crate) fn mark_stopped(&self) -> bool {
        let mut state = self.state.write();
        if state.stopped {
            return false;
        }
        state.stopped = true;
        if !state.connection_state.is_terminal() {
            state.connection_state = ConnectionState::Closed;
        }
        state.touch();
        true
    }

    /// Writes from a round that was re-armed away or stopped are refused
    fn check_round(&self, state: &SessionState, round: u32) -> Result<()> {
        if state.stopped || state.round != round {
            return Err(NegotiationError::Cancelled);
        }
        Ok(())
    }
}
