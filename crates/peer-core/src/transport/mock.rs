//! Scriptable in-process transport
//!
//! `MockTransport` behaves like a peer connection whose network behavior is
//! written down in advance: which candidates appear and when, whether
//! gathering ever completes, how long the connection takes after both
//! descriptions are applied (or whether it never connects), and which
//! operations fail. Zero-offset candidates are delivered before
//! `set_local_description` returns, the way host candidates are usually
//! available immediately in a real stack.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtcpeer_ice_core::{CandidateType, IceCandidate, IceConfig, IceTransportPolicy};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{PeerTransport, TransportEvent};
use crate::config::{MediaDirection, MediaKind};
use crate::description::{SdpType, SessionDescription};
use crate::error::{NegotiationError, Result};
use crate::session::ConnectionState;

const SUBSCRIBER_CAPACITY: usize = 64;

/// Operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Configure,
    SetTransceiver,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
}

impl MockOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::SetTransceiver => "set_transceiver",
            Self::CreateOffer => "create_offer",
            Self::CreateAnswer => "create_answer",
            Self::SetLocalDescription => "set_local_description",
            Self::SetRemoteDescription => "set_remote_description",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MockScript {
    candidates: Vec<(Duration, IceCandidate)>,
    gathering_complete_after: Option<Duration>,
    connect_after: Option<Duration>,
    fail_connection_after: Option<Duration>,
    description_delay: Duration,
    failures: HashSet<MockOperation>,
}

/// Builder for [`MockTransport`]
#[derive(Debug, Default)]
pub struct MockTransportBuilder {
    script: MockScript,
}

impl MockTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `candidate` this long after the local description is applied
    pub fn with_candidate(mut self, offset: Duration, candidate: IceCandidate) -> Self {
        self.script.candidates.push((offset, candidate));
        self
    }

    /// Emit a host candidate as soon as the local description is applied
    pub fn with_host_candidate(self, address: &str, port: u16) -> Self {
        let foundation = (self.script.candidates.len() + 1).to_string();
        self.with_candidate(Duration::ZERO, IceCandidate::host(foundation, address, port))
    }

    /// Signal end-of-candidates this long after the local description is applied
    pub fn with_gathering_complete_after(mut self, offset: Duration) -> Self {
        self.script.gathering_complete_after = Some(offset);
        self
    }

    /// Reach `Connected` this long after both descriptions are applied
    pub fn connect_after(mut self, delay: Duration) -> Self {
        self.script.connect_after = Some(delay);
        self
    }

    /// Report `Failed` this long after both descriptions are applied
    pub fn fail_connection_after(mut self, delay: Duration) -> Self {
        self.script.fail_connection_after = Some(delay);
        self
    }

    /// Time taken by offer/answer creation
    pub fn with_description_delay(mut self, delay: Duration) -> Self {
        self.script.description_delay = delay;
        self
    }

    /// Make an operation return a transport error
    pub fn fail_on(mut self, operation: MockOperation) -> Self {
        self.script.failures.insert(operation);
        self
    }

    pub fn build(self) -> Arc<MockTransport> {
        Arc::new(MockTransport::from_script(self.script))
    }
}

#[derive(Debug, Default)]
struct MockState {
    ice: Option<IceConfig>,
    transceivers: Vec<(MediaKind, MediaDirection)>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    version: u64,
    connecting: bool,
    closed: bool,
}

type Subscribers = Arc<Mutex<Vec<mpsc::Sender<TransportEvent>>>>;

/// In-process [`PeerTransport`] driven by a script
#[derive(Debug)]
pub struct MockTransport {
    session_number: u64,
    script: MockScript,
    state: Arc<Mutex<MockState>>,
    subscribers: Subscribers,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    close_calls: AtomicUsize,
}

impl MockTransport {
    /// Start building a scripted transport
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::new()
    }

    fn from_script(script: MockScript) -> Self {
        Self {
            session_number: Uuid::new_v4().as_u64_pair().0 >> 1,
            script,
            state: Arc::new(Mutex::new(MockState::default())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            tasks: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Deliver an event to every subscriber, as if the engine produced it
    pub async fn inject(&self, event: TransportEvent) {
        broadcast(&self.subscribers, event).await;
    }

    /// Number of `close` calls received
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether nothing is left running or subscribed
    pub fn resources_released(&self) -> bool {
        self.is_closed() && self.tasks.lock().is_empty() && self.subscriber_count() == 0
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    pub fn transceivers(&self) -> Vec<(MediaKind, MediaDirection)> {
        self.state.lock().transceivers.clone()
    }

    pub fn ice_config(&self) -> Option<IceConfig> {
        self.state.lock().ice.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    fn check(&self, operation: MockOperation) -> Result<()> {
        if self.state.lock().closed {
            return Err(NegotiationError::transport(operation.name(), "transport is closed"));
        }
        if self.script.failures.contains(&operation) {
            return Err(NegotiationError::transport(operation.name(), "scripted failure"));
        }
        Ok(())
    }

    fn render(&self, sdp_type: SdpType) -> SessionDescription {
        let mut state = self.state.lock();
        state.version += 1;

        let mut sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.session_number, state.version
        );
        let mids: Vec<String> = (0..state.transceivers.len()).map(|i| i.to_string()).collect();
        sdp.push_str(&format!("a=group:BUNDLE {}\r\n", mids.join(" ")));

        for (mid, (kind, direction)) in state.transceivers.iter().enumerate() {
            let payload = match kind {
                MediaKind::Audio => 111,
                MediaKind::Video => 96,
            };
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF {}\r\n", kind, payload));
            sdp.push_str("c=IN IP4 0.0.0.0\r\n");
            sdp.push_str(&format!("a=mid:{}\r\n", mid));
            sdp.push_str(&format!("a={}\r\n", direction));
        }

        SessionDescription::new(sdp_type, sdp)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Candidates allowed by the configured transport policy
    fn scripted_candidates(&self) -> Vec<(Duration, IceCandidate)> {
        let relay_only = self
            .state
            .lock()
            .ice
            .as_ref()
            .is_some_and(|ice| ice.transport_policy == IceTransportPolicy::Relay);

        self.script
            .candidates
            .iter()
            .filter(|(_, c)| !relay_only || c.candidate_type == CandidateType::Relay)
            .cloned()
            .collect()
    }

    /// Start connectivity once both descriptions are in place
    fn maybe_start_connecting(&self) {
        {
            let mut state = self.state.lock();
            if state.connecting || state.local.is_none() || state.remote.is_none() {
                return;
            }
            state.connecting = true;
        }

        let subscribers = self.subscribers.clone();
        let connect_after = self.script.connect_after;
        let fail_after = self.script.fail_connection_after;

        let handle = tokio::spawn(async move {
            broadcast(&subscribers, TransportEvent::ConnectionStateChanged(ConnectionState::Connecting)).await;

            let outcome = match (connect_after, fail_after) {
                (Some(connect), Some(fail)) if fail < connect => Some((fail, ConnectionState::Failed)),
                (Some(connect), _) => Some((connect, ConnectionState::Connected)),
                (None, Some(fail)) => Some((fail, ConnectionState::Failed)),
                (None, None) => None,
            };

            // Without an outcome the connection hangs in Connecting
            if let Some((delay, state)) = outcome {
                sleep(delay).await;
                broadcast(&subscribers, TransportEvent::ConnectionStateChanged(state)).await;
            }
        });
        self.track(handle);
    }
}

async fn broadcast(subscribers: &Subscribers, event: TransportEvent) {
    let senders = {
        let mut subscribers = subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.clone()
    };

    trace!(?event, subscribers = senders.len(), "Mock transport event");
    for tx in senders {
        let _ = tx.send(event.clone()).await;
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn configure(&self, ice: &IceConfig) -> Result<()> {
        self.check(MockOperation::Configure)?;
        self.state.lock().ice = Some(ice.clone());
        Ok(())
    }

    async fn set_transceiver(&self, kind: MediaKind, direction: MediaDirection) -> Result<()> {
        self.check(MockOperation::SetTransceiver)?;
        let mut state = self.state.lock();
        match state.transceivers.iter_mut().find(|(k, _)| *k == kind) {
            Some(existing) => existing.1 = direction,
            None => state.transceivers.push((kind, direction)),
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.check(MockOperation::CreateOffer)?;
        sleep(self.script.description_delay).await;
        Ok(self.render(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.check(MockOperation::CreateAnswer)?;
        let has_offer = self
            .state
            .lock()
            .remote
            .as_ref()
            .is_some_and(|remote| remote.sdp_type == SdpType::Offer);
        if !has_offer {
            return Err(NegotiationError::transport(
                "create_answer",
                "no remote offer has been applied",
            ));
        }
        sleep(self.script.description_delay).await;
        Ok(self.render(SdpType::Answer))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        self.check(MockOperation::SetLocalDescription)?;
        self.state.lock().local = Some(description.clone());
        debug!(sdp_type = %description.sdp_type, "Mock transport applied local description");

        let mut timeline = self.scripted_candidates();
        timeline.sort_by_key(|(offset, _)| *offset);
        let split = timeline.partition_point(|(offset, _)| offset.is_zero());
        let delayed = timeline.split_off(split);

        for (_, candidate) in timeline {
            broadcast(&self.subscribers, TransportEvent::CandidateDiscovered(candidate)).await;
        }

        let mut events: Vec<(Duration, TransportEvent)> = delayed
            .into_iter()
            .map(|(offset, candidate)| (offset, TransportEvent::CandidateDiscovered(candidate)))
            .collect();
        if let Some(offset) = self.script.gathering_complete_after {
            events.push((offset, TransportEvent::GatheringComplete));
        }
        events.sort_by_key(|(offset, _)| *offset);

        if !events.is_empty() {
            let subscribers = self.subscribers.clone();
            let start = Instant::now();
            let handle = tokio::spawn(async move {
                for (offset, event) in events {
                    sleep_until(start + offset).await;
                    broadcast(&subscribers, event).await;
                }
            });
            self.track(handle);
        }

        self.maybe_start_connecting();
        Ok(())
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.check(MockOperation::SetRemoteDescription)?;
        self.state.lock().remote = Some(description.clone());
        debug!(sdp_type = %description.sdp_type, "Mock transport applied remote description");
        self.maybe_start_connecting();
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.subscribers.lock().clear();
        debug!("Mock transport closed");
        Ok(())
    }
}
