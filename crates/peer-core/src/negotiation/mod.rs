//! The negotiation core
//!
//! [`NegotiationCore`] drives offer/answer rounds for sessions on one
//! [`PeerTransport`], reporting each round's local SDP to the injected
//! [`CallContract`] exactly once and as early as the local description is
//! ready.
//!
//! Two signals come out of a round and they are deliberately separate:
//!
//! - `on_local_sdp_ready` (and [`launch`](NegotiationCore::launch)
//!   resolving) is the time-critical path that unblocks signaling.
//! - [`NegotiationCompletion`] resolves when the connection is established,
//!   or with the fatal error that ended the round.
//!
//! Callers that only care about the first may drop the completion; the round
//! keeps running until the session is stopped or re-armed, or until every
//! clone of the core has been dropped.
//!
//! A core drives exactly one session: the transport's event stream and its
//! teardown belong to a single call leg.

pub(crate) mod driver;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::NegotiationConfig;
use crate::contract::CallContract;
use crate::description::SessionDescription;
use crate::error::{NegotiationError, Result};
use crate::events::{EventEmitter, NegotiationEvent};
use crate::session::{LocalDescriptionState, NegotiationSession, SessionId};
use crate::transport::PeerTransport;

use driver::{RoundChannels, RoundControl, RoundDriver};

/// Queue depth for remote descriptions waiting on the driver
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Resolves when a round reaches `Connected` or fails fatally
#[derive(Debug)]
pub struct NegotiationCompletion {
    session_id: SessionId,
    round: u32,
    rx: oneshot::Receiver<Result<()>>,
}

impl NegotiationCompletion {
    /// Session the round belongs to
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Round this completion tracks
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Wait for the connection to be established
    ///
    /// Returns `Cancelled` if the session was stopped or re-armed first.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(NegotiationError::Cancelled))
    }
}

/// Cancels every round of a core once the last clone is gone
#[derive(Debug)]
struct CoreLifetime {
    token: CancellationToken,
}

impl Drop for CoreLifetime {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Drives negotiation rounds for one session against one transport
///
/// The first session launched binds the core; launching any other session
/// on it is rejected. Call [`stop`](Self::stop) to close the transport.
/// Dropping every clone of the core only ends its running rounds.
#[derive(Clone)]
pub struct NegotiationCore {
    transport: Arc<dyn PeerTransport>,
    call: Arc<dyn CallContract>,
    events: EventEmitter,
    bound: Arc<Mutex<Option<SessionId>>>,
    lifetime: Arc<CoreLifetime>,
}

impl std::fmt::Debug for NegotiationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationCore")
            .field("session_id", &*self.bound.lock())
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl NegotiationCore {
    /// Create a core for `transport` that reports to `call`
    pub fn new(transport: Arc<dyn PeerTransport>, call: Arc<dyn CallContract>) -> Self {
        Self {
            transport,
            call,
            events: EventEmitter::new(),
            bound: Arc::new(Mutex::new(None)),
            lifetime: Arc::new(CoreLifetime {
                token: CancellationToken::new(),
            }),
        }
    }

    /// Session this core is bound to, once one has been launched
    pub fn session_id(&self) -> Option<SessionId> {
        self.bound.lock().clone()
    }

    /// Bind to `session`, or fail if another session already owns the core
    fn bind(&self, session: &NegotiationSession) -> Result<()> {
        let mut bound = self.bound.lock();
        match bound.as_ref() {
            Some(id) if id != session.id() => Err(NegotiationError::invalid_state(
                session.id(),
                format!("negotiation core already drives session {}", id),
            )),
            Some(_) => Ok(()),
            None => {
                *bound = Some(session.id().clone());
                Ok(())
            }
        }
    }

    fn drives_other_session(&self, session: &NegotiationSession) -> bool {
        self.bound.lock().as_ref().is_some_and(|id| id != session.id())
    }

    /// The transport this core drives
    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    /// Subscribe to negotiation events; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<NegotiationEvent> {
        self.events.subscribe()
    }

    /// Start a round and wait until the local SDP has been reported
    ///
    /// Configuration errors and failures while creating or applying the
    /// local description reject here, before anything is reported. On
    /// success the call's `on_local_sdp_ready` has already returned, and the
    /// returned completion tracks the rest of the round.
    pub async fn launch(
        &self,
        session: &NegotiationSession,
        config: NegotiationConfig,
    ) -> Result<NegotiationCompletion> {
        if let Err(e) = config.validate(session.role()) {
            warn!(session_id = %session.id(), error = %e, "Rejecting negotiation configuration");
            return Err(e);
        }
        self.bind(session)?;

        let round = session.begin_local_description()?;
        info!(
            session_id = %session.id(),
            round,
            role = %session.role(),
            media = ?config.media.transceivers(),
            policy = ?config.report_policy,
            "Starting negotiation"
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let cancel = self.lifetime.token.child_token();

        session.install_round(RoundControl::new(round, command_tx, cancel.clone()));

        // Subscribe before any transport call so no event is missed
        let channels = RoundChannels {
            transport_events: self.transport.subscribe(),
            commands: command_rx,
            ready: ready_tx,
            completion: completion_tx,
        };
        let driver = RoundDriver::new(
            session.clone(),
            self.transport.clone(),
            self.call.clone(),
            self.events.clone(),
            config,
            round,
            cancel,
        );
        let span = info_span!("negotiation", session_id = %session.id(), round);
        tokio::spawn(driver.run(channels).instrument(span));

        ready_rx.await.unwrap_or(Err(NegotiationError::Cancelled))?;
        Ok(NegotiationCompletion {
            session_id: session.id().clone(),
            round,
            rx: completion_rx,
        })
    }

    /// Run a round until the connection is established
    ///
    /// The local SDP is reported through the call contract long before this
    /// resolves. Dropping the future after the report does not cancel the
    /// round.
    pub async fn start(&self, session: &NegotiationSession, config: NegotiationConfig) -> Result<()> {
        self.launch(session, config).await?.wait().await
    }

    /// Apply the remote answer (offering side)
    ///
    /// Fails with `DuplicateRemoteDescription` once a remote description has
    /// been applied this round, which is always the case for an answering
    /// session, and with `InvalidState` before the local description is ready.
    pub async fn on_remote_sdp(&self, session: &NegotiationSession, description: SessionDescription) -> Result<()> {
        if self.drives_other_session(session) {
            return Err(NegotiationError::invalid_state(
                session.id(),
                "session is not driven by this negotiation core",
            ));
        }
        session.check_remote_acceptable()?;

        let local_state = session.local_description_state();
        if !matches!(local_state, LocalDescriptionState::Ready | LocalDescriptionState::Applied) {
            return Err(NegotiationError::invalid_state(
                session.id(),
                format!("local description is {:?}; remote description arrived too early", local_state),
            ));
        }

        let control = session
            .round_control()
            .ok_or_else(|| NegotiationError::invalid_state(session.id(), "no negotiation round is running"))?;

        debug!(session_id = %session.id(), round = control.round(), sdp_type = %description.sdp_type, "Applying remote description");
        match control.apply_remote(description).await {
            Some(result) => result,
            None if session.is_stopped() => Err(NegotiationError::Cancelled),
            None => Err(NegotiationError::invalid_state(
                session.id(),
                "negotiation round has already ended",
            )),
        }
    }

    /// Re-arm the session and run a new round on the same transport
    ///
    /// The previous round is cancelled and its SDP-ready latch cleared; the
    /// new round reports its own local SDP once.
    pub async fn renegotiate(
        &self,
        session: &NegotiationSession,
        config: NegotiationConfig,
    ) -> Result<NegotiationCompletion> {
        let round = session.rearm()?;
        info!(session_id = %session.id(), round, "Renegotiating");
        self.launch(session, config).await
    }

    /// Tear the session down
    ///
    /// Safe from any state and any number of times; only the first call
    /// closes the transport. A session that belongs to another core is marked
    /// stopped but this core's transport is left alone.
    pub async fn stop(&self, session: &NegotiationSession) {
        let first = session.mark_stopped();
        if let Some(control) = session.take_round_control() {
            control.cancel();
        }

        if !first {
            debug!(session_id = %session.id(), "Session already stopped");
            return;
        }
        if self.drives_other_session(session) {
            warn!(session_id = %session.id(), "Stopping a session this core does not drive; transport left open");
            return;
        }

        info!(session_id = %session.id(), round = session.round(), "Stopping negotiation");
        if let Err(e) = self.transport.close().await {
            warn!(session_id = %session.id(), error = %e, "Transport close reported an error");
        }
        self.events.emit(NegotiationEvent::Stopped {
            session_id: session.id().clone(),
        });
    }
}
