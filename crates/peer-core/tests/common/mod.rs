//! Shared fixtures for negotiation integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtcpeer_core::ice::IceCandidate;
use rtcpeer_core::{
    CallContract, ConnectionState, LocalSdpReady, MockTransport, MockTransportBuilder,
    NegotiationCore, NegotiationError, SessionId,
};

pub const REMOTE_OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 198.51.100.2\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=sendrecv\r\n";

pub const REMOTE_ANSWER: &str = "v=0\r\n\
o=- 2890844527 2 IN IP4 198.51.100.2\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=sendrecv\r\n";

/// Call contract that records every callback
#[derive(Default)]
pub struct RecordingCall {
    reports: Mutex<Vec<LocalSdpReady>>,
    failures: Mutex<Vec<(SessionId, NegotiationError)>>,
    states: Mutex<Vec<ConnectionState>>,
}

impl RecordingCall {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<LocalSdpReady> {
        self.reports.lock().clone()
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn failures(&self) -> Vec<(SessionId, NegotiationError)> {
        self.failures.lock().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    /// Poll until at least `count` reports were received
    pub async fn wait_for_reports(&self, count: usize) {
        while self.report_count() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl CallContract for RecordingCall {
    async fn on_local_sdp_ready(&self, ready: LocalSdpReady) {
        self.reports.lock().push(ready);
    }

    async fn on_negotiation_failed(&self, session_id: &SessionId, error: &NegotiationError) {
        self.failures.lock().push((session_id.clone(), error.clone()));
    }

    async fn on_connection_state_changed(&self, _session_id: &SessionId, state: ConnectionState) {
        self.states.lock().push(state);
    }
}

/// Host candidate immediately, server-reflexive at 150 ms, relay at 400 ms
pub fn gathering_script() -> MockTransportBuilder {
    MockTransport::builder()
        .with_host_candidate("192.168.1.20", 50000)
        .with_candidate(
            Duration::from_millis(150),
            IceCandidate::server_reflexive("2", "203.0.113.7", 61000, "192.168.1.20", 50000),
        )
        .with_candidate(
            Duration::from_millis(400),
            IceCandidate::relay("3", "198.51.100.9", 3478, "203.0.113.7", 61000),
        )
}

/// Full gathering that completes at 500 ms and connects 100 ms after both
/// descriptions are applied
pub fn connecting_transport() -> Arc<MockTransport> {
    gathering_script()
        .with_gathering_complete_after(Duration::from_millis(500))
        .connect_after(Duration::from_millis(100))
        .build()
}

pub fn core_for(transport: &Arc<MockTransport>, call: &Arc<RecordingCall>) -> NegotiationCore {
    NegotiationCore::new(transport.clone(), call.clone())
}
