//! Per-round negotiation driver
//!
//! Each negotiation round runs on its own task. The task is the only writer
//! of the session's state for that round: transport events, remote
//! descriptions and timer expiries are all handled here, one at a time, so
//! the SDP-ready latch and the candidate snapshot are decided on the same
//! execution context as candidate handling.
//!
//! A round can be cancelled while it is suspended in a transport call or a
//! callback. Every session write is stamped with the driver's round, so a
//! round that was re-armed away can no longer touch its successor's state.

use std::sync::Arc;

use chrono::Utc;
use rtcpeer_ice_core::GatheringState;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{NegotiationConfig, SdpReportPolicy};
use crate::contract::{CallContract, LocalSdpReady};
use crate::description::{SdpType, SessionDescription};
use crate::error::{NegotiationError, Result};
use crate::events::{EventEmitter, NegotiationEvent};
use crate::session::{ConnectionState, LocalDescriptionState, NegotiationRole, NegotiationSession};
use crate::transport::{PeerTransport, TransportEvent};

/// Commands queued behind the transport events
#[derive(Debug)]
pub(crate) enum DriverCommand {
    ApplyRemote {
        description: SessionDescription,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle kept by the session to reach its running round
#[derive(Debug, Clone)]
pub(crate) struct RoundControl {
    round: u32,
    commands: mpsc::Sender<DriverCommand>,
    cancel: CancellationToken,
}

impl RoundControl {
    pub(crate) fn new(round: u32, commands: mpsc::Sender<DriverCommand>, cancel: CancellationToken) -> Self {
        Self {
            round,
            commands,
            cancel,
        }
    }

    pub(crate) fn round(&self) -> u32 {
        self.round
    }

    /// Stop the round at its next suspension point
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Hand a remote description to the driver; `None` if the round has ended
    pub(crate) async fn apply_remote(&self, description: SessionDescription) -> Option<Result<()>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(DriverCommand::ApplyRemote { description, reply })
            .await
            .ok()?;
        response.await.ok()
    }
}

/// Receivers and result senders for one round
pub(crate) struct RoundChannels {
    pub transport_events: mpsc::Receiver<TransportEvent>,
    pub commands: mpsc::Receiver<DriverCommand>,
    /// Resolves `launch`
    pub ready: oneshot::Sender<Result<()>>,
    /// Resolves the negotiation completion
    pub completion: oneshot::Sender<Result<()>>,
}

enum Flow {
    Continue,
    Finished,
}

pub(crate) struct RoundDriver {
    session: NegotiationSession,
    transport: Arc<dyn PeerTransport>,
    call: Arc<dyn CallContract>,
    events: EventEmitter,
    config: NegotiationConfig,
    round: u32,
    cancel: CancellationToken,
    ready: Option<oneshot::Sender<Result<()>>>,
    completion: Option<oneshot::Sender<Result<()>>>,
    gathering_deadline: Option<Instant>,
    connection_deadline: Option<Instant>,
}

impl RoundDriver {
    pub(crate) fn new(
        session: NegotiationSession,
        transport: Arc<dyn PeerTransport>,
        call: Arc<dyn CallContract>,
        events: EventEmitter,
        config: NegotiationConfig,
        round: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            transport,
            call,
            events,
            config,
            round,
            cancel,
            ready: None,
            completion: None,
            gathering_deadline: None,
            connection_deadline: None,
        }
    }

    pub(crate) async fn run(mut self, channels: RoundChannels) {
        let RoundChannels {
            mut transport_events,
            mut commands,
            ready,
            completion,
        } = channels;
        let cancel = self.cancel.clone();
        self.ready = Some(ready);
        self.completion = Some(completion);

        if self.session.is_stopped() {
            self.finish_cancelled();
            return;
        }

        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NegotiationError::Cancelled),
            result = self.create_local_description() => result,
        };

        let description = match prepared {
            Ok(description) => description,
            Err(NegotiationError::Cancelled) => {
                self.finish_cancelled();
                return;
            }
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };

        if cancel.is_cancelled() || self.session.is_stopped() {
            self.finish_cancelled();
            return;
        }

        if self.session.mark_local_ready(self.round, description).is_err() {
            self.finish_cancelled();
            return;
        }
        self.gathering_deadline = Some(Instant::now() + self.config.max_ice_gathering_timeout);
        info!(
            session_id = %self.session.id(),
            round = self.round,
            role = %self.session.role(),
            "Local description ready"
        );
        self.events.emit(NegotiationEvent::GatheringStateChanged {
            session_id: self.session.id().clone(),
            round: self.round,
            state: GatheringState::Gathering,
        });

        // Candidates delivered while the local description was being applied
        // are already known and belong in the snapshot.
        while let Ok(event) = transport_events.try_recv() {
            if cancel.is_cancelled() {
                self.finish_cancelled();
                return;
            }
            if let Flow::Finished = self.on_transport_event(event).await {
                return;
            }
        }

        if cancel.is_cancelled() {
            self.finish_cancelled();
            return;
        }
        if self.config.report_policy == SdpReportPolicy::EarlyInvite {
            self.report().await;
        }

        loop {
            let gathering_deadline = self.gathering_deadline;
            let connection_deadline = self.connection_deadline;

            let flow = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.finish_cancelled();
                    Flow::Finished
                }
                event = transport_events.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => self.on_transport_closed().await,
                },
                Some(command) = commands.recv() => {
                    self.on_command(command).await;
                    Flow::Continue
                }
                _ = wait_until(connection_deadline) => {
                    let timeout = self.config.max_connection_state_timeout;
                    self.fail(NegotiationError::ConnectionTimeout { timeout }).await;
                    Flow::Finished
                }
                _ = wait_until(gathering_deadline) => {
                    self.on_gathering_timeout().await;
                    Flow::Continue
                }
            };

            if let Flow::Finished = flow {
                return;
            }
        }
    }

    async fn create_local_description(&mut self) -> Result<SessionDescription> {
        self.transport.configure(&self.config.ice).await?;

        for (kind, direction) in self.config.media.transceivers() {
            debug!(session_id = %self.session.id(), %kind, %direction, "Configuring transceiver");
            self.transport.set_transceiver(kind, direction).await?;
        }

        let description = match self.session.role() {
            NegotiationRole::Offerer => self.transport.create_offer().await?,
            NegotiationRole::Answerer => {
                let sdp = self
                    .config
                    .remote_sdp
                    .clone()
                    .ok_or(NegotiationError::MissingRemoteSdp)?;
                self.apply_remote_description(SessionDescription::offer(sdp)).await?;
                self.transport.create_answer().await?
            }
        };

        self.transport.set_local_description(&description).await?;
        Ok(description)
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.session.check_remote_acceptable()?;
        self.transport.set_remote_description(&description).await?;
        if self.cancel.is_cancelled() {
            return Err(NegotiationError::Cancelled);
        }

        let sdp_type = description.sdp_type;
        self.session.mark_remote_applied(self.round, description)?;
        debug!(session_id = %self.session.id(), round = self.round, %sdp_type, "Remote description applied");
        self.events.emit(NegotiationEvent::RemoteDescriptionApplied {
            session_id: self.session.id().clone(),
            round: self.round,
            sdp_type,
        });

        if self.session.connection_state() == ConnectionState::Connected {
            // Renegotiation on a connection that is already up
            self.resolve_connected();
        } else {
            self.connection_deadline = Some(Instant::now() + self.config.max_connection_state_timeout);
        }
        Ok(())
    }

    /// Fire the at-most-once report with the current candidate snapshot
    async fn report(&mut self) {
        let reported = match self.session.latch_sdp_ready(self.round) {
            Ok(reported) => reported,
            Err(NegotiationError::Cancelled) => {
                debug!(session_id = %self.session.id(), round = self.round, "Round ended before the report");
                return;
            }
            Err(e) => {
                error!(session_id = %self.session.id(), error = %e, "Refusing to report local SDP");
                return;
            }
        };

        info!(
            session_id = %self.session.id(),
            round = reported.round,
            role = %self.session.role(),
            candidates = reported.snapshot.len(),
            gathering = %self.session.ice_gathering_state(),
            "Reporting local SDP"
        );
        self.events.emit(NegotiationEvent::LocalSdpReady {
            session_id: self.session.id().clone(),
            round: reported.round,
            role: self.session.role(),
            candidate_count: reported.snapshot.len(),
        });

        self.call
            .on_local_sdp_ready(LocalSdpReady {
                session_id: self.session.id().clone(),
                role: self.session.role(),
                round: reported.round,
                description: reported.description,
                candidates: reported.snapshot,
                reported_at: Utc::now(),
            })
            .await;

        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Flow {
        match event {
            TransportEvent::CandidateDiscovered(candidate) => {
                let Some(trickle) = self.session.push_candidate(self.round, candidate.clone()) else {
                    return Flow::Continue;
                };
                debug!(
                    session_id = %self.session.id(),
                    round = self.round,
                    candidate = %candidate,
                    trickle,
                    "Candidate gathered"
                );
                self.events.emit(NegotiationEvent::CandidateGathered {
                    session_id: self.session.id().clone(),
                    round: self.round,
                    candidate,
                    trickle,
                });
                Flow::Continue
            }
            TransportEvent::GatheringComplete => {
                if self.session.mark_gathering_complete(self.round) {
                    self.gathering_deadline = None;
                    debug!(
                        session_id = %self.session.id(),
                        round = self.round,
                        candidates = self.session.candidate_count(),
                        "ICE gathering complete"
                    );
                    self.events.emit(NegotiationEvent::GatheringStateChanged {
                        session_id: self.session.id().clone(),
                        round: self.round,
                        state: GatheringState::Complete,
                    });
                    if self.awaiting_report() {
                        self.report().await;
                    }
                }
                Flow::Continue
            }
            TransportEvent::ConnectionStateChanged(state) => self.on_connection_state(state).await,
        }
    }

    async fn on_connection_state(&mut self, state: ConnectionState) -> Flow {
        let Some(previous) = self.session.set_connection_state(self.round, state) else {
            return Flow::Continue;
        };

        debug!(session_id = %self.session.id(), round = self.round, %previous, %state, "Connection state changed");
        self.events.emit(NegotiationEvent::ConnectionStateChanged {
            session_id: self.session.id().clone(),
            round: self.round,
            previous,
            state,
        });
        self.call.on_connection_state_changed(self.session.id(), state).await;
        if self.cancel.is_cancelled() {
            // Picked up at the top of the loop
            return Flow::Continue;
        }

        match state {
            ConnectionState::Connected => {
                self.resolve_connected();
                Flow::Continue
            }
            ConnectionState::Failed | ConnectionState::Closed if self.completion.is_some() => {
                self.fail(NegotiationError::ConnectionFailed { state }).await;
                Flow::Finished
            }
            _ => Flow::Continue,
        }
    }

    async fn on_transport_closed(&mut self) -> Flow {
        if self.completion.is_some() {
            self.fail(NegotiationError::TransportClosed).await;
        } else {
            debug!(session_id = %self.session.id(), round = self.round, "Transport event stream ended");
        }
        Flow::Finished
    }

    async fn on_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::ApplyRemote { description, reply } => {
                let result = self.apply_remote_answer(description).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn apply_remote_answer(&mut self, description: SessionDescription) -> Result<()> {
        match self.session.local_description_state() {
            LocalDescriptionState::Ready | LocalDescriptionState::Applied => {}
            state => {
                return Err(NegotiationError::invalid_state(
                    self.session.id(),
                    format!("cannot apply a remote description while the local one is {:?}", state),
                ))
            }
        }
        if self.session.role() == NegotiationRole::Offerer && description.sdp_type != SdpType::Answer {
            return Err(NegotiationError::invalid_state(
                self.session.id(),
                "the offering side expects an answer",
            ));
        }
        self.apply_remote_description(description).await
    }

    async fn on_gathering_timeout(&mut self) {
        self.gathering_deadline = None;
        if self.session.ice_gathering_state() == GatheringState::Complete {
            return;
        }

        if !self.session.mark_gathering_timed_out(self.round) {
            return;
        }
        let candidate_count = self.session.candidate_count();
        warn!(
            session_id = %self.session.id(),
            round = self.round,
            timeout_ms = self.config.max_ice_gathering_timeout.as_millis() as u64,
            candidates = candidate_count,
            "ICE gathering timed out, continuing with gathered candidates"
        );
        self.events.emit(NegotiationEvent::GatheringTimedOut {
            session_id: self.session.id().clone(),
            round: self.round,
            candidate_count,
        });

        if self.awaiting_report() {
            self.report().await;
        }
    }

    fn awaiting_report(&self) -> bool {
        self.config.report_policy == SdpReportPolicy::AwaitGathering && !self.session.sdp_ready_reported()
    }

    fn resolve_connected(&mut self) {
        self.connection_deadline = None;
        if let Some(completion) = self.completion.take() {
            info!(session_id = %self.session.id(), round = self.round, "Negotiation complete");
            let _ = completion.send(Ok(()));
        }
    }

    async fn fail(&mut self, error: NegotiationError) {
        if self.cancel.is_cancelled() || !self.session.record_failure(self.round, &error) {
            self.finish_cancelled();
            return;
        }
        error!(
            session_id = %self.session.id(),
            round = self.round,
            category = error.category(),
            error = %error,
            "Negotiation failed"
        );
        self.events.emit(NegotiationEvent::NegotiationFailed {
            session_id: self.session.id().clone(),
            round: self.round,
            error: error.clone(),
        });

        // Before the report the failure rejects `launch`; afterwards the call
        // only hears about it through the contract.
        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(Err(error.clone()));
            }
            None => self.call.on_negotiation_failed(self.session.id(), &error).await,
        }
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Err(error));
        }
    }

    fn finish_cancelled(&mut self) {
        debug!(session_id = %self.session.id(), round = self.round, "Negotiation round cancelled");
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(NegotiationError::Cancelled));
        }
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(Err(NegotiationError::Cancelled));
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
