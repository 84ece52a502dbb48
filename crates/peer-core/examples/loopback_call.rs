//! Loopback call between two in-process peers
//!
//! Alice dials Bob over a channel-based "signaling server". Each side reports
//! its local SDP as soon as the description is applied; the remaining
//! candidates trickle in afterwards and are logged from the event stream.
//!
//! Run with `RUST_LOG=rtcpeer_core=debug,loopback_call=info cargo run --example loopback_call`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rtcpeer_core::ice::{IceCandidate, IceConfig, IceServerConfig};
use rtcpeer_core::prelude::*;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Forwards local descriptions to the other side
struct SignalingBridge {
    name: &'static str,
    outbound: mpsc::UnboundedSender<SessionDescription>,
}

#[async_trait]
impl CallContract for SignalingBridge {
    async fn on_local_sdp_ready(&self, ready: LocalSdpReady) {
        info!(
            peer = self.name,
            sdp_type = %ready.description.sdp_type,
            candidates = ready.candidates.len(),
            "Sending local description"
        );
        for line in ready.candidate_lines() {
            info!(peer = self.name, %line, "Bundled candidate");
        }
        let _ = self.outbound.send(ready.description);
    }

    async fn on_negotiation_failed(&self, session_id: &SessionId, err: &NegotiationError) {
        error!(peer = self.name, %session_id, error = %err, "Negotiation failed");
    }

    async fn on_connection_state_changed(&self, _session_id: &SessionId, state: ConnectionState) {
        info!(peer = self.name, %state, "Connection state");
    }
}

fn peer_transport(host: &str, public: &str) -> Arc<MockTransport> {
    MockTransport::builder()
        .with_host_candidate(host, 50000)
        .with_candidate(
            Duration::from_millis(120),
            IceCandidate::server_reflexive("2", public, 61000, host, 50000),
        )
        .with_gathering_complete_after(Duration::from_millis(300))
        .connect_after(Duration::from_millis(80))
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ice = IceConfig::new().with_servers(vec![IceServerConfig::stun("stun:stun.example.org:3478")]);
    let config = NegotiationConfig::new()
        .with_media(MediaConfig::audio_video())
        .with_ice(ice);

    let (to_bob, mut bob_inbox) = mpsc::unbounded_channel();
    let (to_alice, mut alice_inbox) = mpsc::unbounded_channel();

    let alice_core = NegotiationCore::new(
        peer_transport("192.168.1.20", "203.0.113.7"),
        Arc::new(SignalingBridge {
            name: "alice",
            outbound: to_bob,
        }),
    );
    let bob_core = NegotiationCore::new(
        peer_transport("192.168.1.30", "203.0.113.8"),
        Arc::new(SignalingBridge {
            name: "bob",
            outbound: to_alice,
        }),
    );

    let registry = NegotiationRegistry::new();
    let alice = NegotiationSession::offerer();
    let bob = NegotiationSession::answerer();
    registry.register(alice.clone(), alice_core.clone()).await?;
    registry.register(bob.clone(), bob_core.clone()).await?;

    // Log trickled candidates on Alice's side
    let mut alice_events = alice_core.subscribe();
    let trickle_log = tokio::spawn(async move {
        while let Ok(event) = alice_events.recv().await {
            if let NegotiationEvent::CandidateGathered {
                candidate,
                trickle: true,
                ..
            } = event
            {
                info!(peer = "alice", candidate = %candidate, "Trickle candidate");
            }
        }
    });

    let alice_done = alice_core.launch(&alice, config.clone()).await?;
    let offer = bob_inbox.recv().await.context("alice never sent an offer")?;

    let bob_done = bob_core
        .launch(&bob, config.with_remote_sdp(offer.sdp))
        .await?;
    let answer = alice_inbox.recv().await.context("bob never sent an answer")?;
    alice_core.on_remote_sdp(&alice, answer).await?;

    let (alice_result, bob_result) = tokio::join!(alice_done.wait(), bob_done.wait());
    alice_result?;
    bob_result?;
    info!("Call established");

    tokio::time::sleep(Duration::from_millis(500)).await;
    info!(
        alice_candidates = alice.candidate_count(),
        alice_trickled = alice.trickle_candidates().len(),
        bob_candidates = bob.candidate_count(),
        "Gathering finished"
    );

    let stopped = registry.stop_all().await;
    let stats = registry.stats().await;
    info!(stopped, total = stats.total_registered, failed = stats.failed, "Call ended");

    trickle_log.abort();
    Ok(())
}
