//! One-call-at-a-time call negotiation.
//!
//! The negotiator is a tagged state machine:
//!
//! ```text
//! Idle ─start_call─▶ Requesting ─call_accepted─▶ Active
//! Idle ─call_initiated─▶ Ringing ─accept─▶ Negotiating ─peer connected─▶ Active
//! ```
//!
//! Every teardown (hangup, `call_ended`, `call_rejected`, reject, local
//! track end, failure) releases media, closes the peer connection and
//! returns to `Idle`, recording a [`CallOutcome`]. Signaling to send is
//! queued in an outbox drained with [`CallNegotiator::take_outbound`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use huddle_shared::{CallKind, ClientEvent, IceCandidate, SessionDescription, UserId};

use crate::error::{CallError, MediaError};
use crate::media::{MediaDevices, MediaStream};
use crate::peer::{PeerConnection, PeerConnectionFactory, PeerEvent, PeerId, PeerState, RtcConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Requesting,
    Ringing,
    Negotiating,
    Active,
}

/// How the last call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Ended,
    Rejected,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// A call waiting for the local user to accept or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub caller_id: UserId,
    pub caller_name: String,
    pub kind: CallKind,
}

struct Ringing {
    call: IncomingCall,
    offer: SessionDescription,
    pending_candidates: Vec<IceCandidate>,
}

/// The live call: media handles plus the peer connection carrying them.
pub struct CallSession {
    remote: UserId,
    kind: CallKind,
    role: CallRole,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    peer: Box<dyn PeerConnection>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl CallSession {
    pub fn remote(&self) -> UserId {
        self.remote
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.id()
    }

    /// Apply a remote candidate now, or hold it until the remote
    /// description is in place.
    async fn offer_candidate(&mut self, candidate: IceCandidate) {
        if self.remote_description_set {
            apply_candidate(self.peer.as_mut(), candidate).await;
        } else {
            self.pending_candidates.push(candidate);
        }
    }

    async fn set_remote(&mut self, desc: SessionDescription) -> Result<(), MediaError> {
        self.peer.set_remote_description(desc).await?;
        self.remote_description_set = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            apply_candidate(self.peer.as_mut(), candidate).await;
        }
        Ok(())
    }
}

enum CallState {
    Idle,
    Requesting(CallSession),
    Ringing(Ringing),
    Negotiating(CallSession),
    Active(CallSession),
}

impl CallState {
    fn session_mut(&mut self) -> Option<&mut CallSession> {
        match self {
            CallState::Requesting(s) | CallState::Negotiating(s) | CallState::Active(s) => Some(s),
            CallState::Idle | CallState::Ringing(_) => None,
        }
    }

    fn session(&self) -> Option<&CallSession> {
        match self {
            CallState::Requesting(s) | CallState::Negotiating(s) | CallState::Active(s) => Some(s),
            CallState::Idle | CallState::Ringing(_) => None,
        }
    }
}

pub struct CallNegotiator {
    me: UserId,
    my_name: String,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
    rtc: RtcConfig,
    state: CallState,
    outbox: Vec<ClientEvent>,
    last_outcome: Option<CallOutcome>,
}

impl CallNegotiator {
    pub fn new(
        me: UserId,
        my_name: impl Into<String>,
        devices: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
        rtc: RtcConfig,
    ) -> Self {
        Self {
            me,
            my_name: my_name.into(),
            devices,
            peers,
            rtc,
            state: CallState::Idle,
            outbox: Vec::new(),
            last_outcome: None,
        }
    }

    pub fn phase(&self) -> CallPhase {
        phase_of(&self.state)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, CallState::Idle)
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.state.session()
    }

    pub fn incoming(&self) -> Option<&IncomingCall> {
        match self.state {
            CallState::Ringing(ref r) => Some(&r.call),
            _ => None,
        }
    }

    pub fn last_outcome(&self) -> Option<&CallOutcome> {
        self.last_outcome.as_ref()
    }

    /// Signaling produced since the last call, in emission order.
    pub fn take_outbound(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.outbox)
    }

    // -----------------------------------------------------------------------
    // Local intents
    // -----------------------------------------------------------------------

    /// Place a call: capture media, build the offer, send `initiate_call`.
    pub async fn start_call(&mut self, remote: UserId, kind: CallKind) -> Result<(), CallError> {
        if !self.is_idle() {
            warn!(remote = %remote, phase = ?self.phase(), "Call refused: already in a call");
            return Err(CallError::Busy);
        }
        if remote == self.me {
            return Err(CallError::SelfCall);
        }

        let local = acquire(self.devices.as_ref(), kind, CallRole::Caller)
            .await
            .map_err(CallError::Media)?;

        let mut peer = match self.peers.create(&self.rtc) {
            Ok(peer) => peer,
            Err(e) => {
                self.devices.stop(&local);
                return Err(self.fail_setup(e));
            }
        };

        let offer = match prepare_offer(peer.as_mut(), &local).await {
            Ok(offer) => offer,
            Err(e) => {
                self.devices.stop(&local);
                peer.close();
                return Err(self.fail_setup(e));
            }
        };

        info!(remote = %remote, kind = %kind, "Placing call");
        self.outbox.push(ClientEvent::InitiateCall {
            receiver_id: remote,
            caller_id: self.me,
            caller_name: self.my_name.clone(),
            call_type: kind,
            offer,
        });
        self.state = CallState::Requesting(CallSession {
            remote,
            kind,
            role: CallRole::Caller,
            local_stream: Some(local),
            remote_stream: None,
            peer,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        });
        Ok(())
    }

    /// Answer the ringing call: capture media, apply the offer, send the answer.
    pub async fn accept(&mut self) -> Result<(), CallError> {
        let ringing = match std::mem::replace(&mut self.state, CallState::Idle) {
            CallState::Ringing(r) => r,
            CallState::Idle => return Err(CallError::NoIncomingCall),
            other => {
                self.state = other;
                return Err(CallError::Busy);
            }
        };
        let caller = ringing.call.caller_id;
        let kind = ringing.call.kind;

        let local = match acquire(self.devices.as_ref(), kind, CallRole::Callee).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(caller = %caller, error = %e, "Media unavailable, declining call");
                self.outbox.push(ClientEvent::RejectCall { caller_id: caller });
                self.last_outcome = Some(CallOutcome::Failed(e.to_string()));
                return Err(CallError::Media(e));
            }
        };

        let peer = match self.peers.create(&self.rtc) {
            Ok(peer) => peer,
            Err(e) => {
                self.devices.stop(&local);
                self.outbox.push(ClientEvent::RejectCall { caller_id: caller });
                return Err(self.fail_setup(e));
            }
        };

        let mut session = CallSession {
            remote: caller,
            kind,
            role: CallRole::Callee,
            local_stream: Some(local),
            remote_stream: None,
            peer,
            remote_description_set: false,
            pending_candidates: ringing.pending_candidates,
        };

        let answer = match prepare_answer(&mut session, ringing.offer).await {
            Ok(answer) => answer,
            Err(e) => {
                if let Some(ref stream) = session.local_stream {
                    self.devices.stop(stream);
                }
                session.peer.close();
                self.outbox.push(ClientEvent::RejectCall { caller_id: caller });
                return Err(self.fail_setup(e));
            }
        };

        info!(caller = %caller, kind = %kind, "Call accepted");
        self.outbox.push(ClientEvent::AcceptCall {
            caller_id: caller,
            answer,
        });
        self.state = CallState::Negotiating(session);
        Ok(())
    }

    /// Decline the ringing call.
    pub fn reject(&mut self) -> Result<(), CallError> {
        match std::mem::replace(&mut self.state, CallState::Idle) {
            CallState::Ringing(r) => {
                self.decline(r);
                Ok(())
            }
            other => {
                self.state = other;
                Err(CallError::NoIncomingCall)
            }
        }
    }

    fn decline(&mut self, ringing: Ringing) {
        info!(caller = %ringing.call.caller_id, "Call rejected locally");
        self.outbox.push(ClientEvent::RejectCall {
            caller_id: ringing.call.caller_id,
        });
        self.last_outcome = Some(CallOutcome::Rejected);
    }

    /// Local hangup. Declines a ringing call; ends any other session.
    pub fn hang_up(&mut self) {
        match std::mem::replace(&mut self.state, CallState::Idle) {
            CallState::Idle => debug!("Hangup with no call"),
            CallState::Ringing(r) => self.decline(r),
            other => {
                self.state = other;
                self.end(CallOutcome::Ended, true);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Server signaling
    // -----------------------------------------------------------------------

    /// `call_initiated`. Returns the call to prompt for, or `None` when we
    /// were busy and declined it automatically.
    pub fn on_call_initiated(
        &mut self,
        caller_id: UserId,
        caller_name: String,
        kind: CallKind,
        offer: SessionDescription,
    ) -> Option<IncomingCall> {
        if !self.is_idle() {
            info!(caller = %caller_id, phase = ?self.phase(), "Busy, declining incoming call");
            self.outbox.push(ClientEvent::RejectCall { caller_id });
            return None;
        }

        info!(caller = %caller_id, kind = %kind, "Incoming call");
        let call = IncomingCall {
            caller_id,
            caller_name,
            kind,
        };
        self.state = CallState::Ringing(Ringing {
            call: call.clone(),
            offer,
            pending_candidates: Vec::new(),
        });
        Some(call)
    }

    /// `call_accepted`: apply the callee's answer.
    pub async fn on_call_accepted(&mut self, answer: SessionDescription) {
        let mut session = match std::mem::replace(&mut self.state, CallState::Idle) {
            CallState::Requesting(s) => s,
            other => {
                debug!(phase = ?phase_of(&other), "Ignoring call_accepted");
                self.state = other;
                return;
            }
        };

        match session.set_remote(answer).await {
            Ok(()) => {
                info!(remote = %session.remote, "Call active");
                self.state = CallState::Active(session);
            }
            Err(e) => {
                warn!(remote = %session.remote, error = %e, "Could not apply answer");
                self.state = CallState::Active(session);
                self.end(CallOutcome::Failed(e.to_string()), true);
            }
        }
    }

    /// `call_rejected`: the callee declined.
    pub fn on_call_rejected(&mut self) {
        if matches!(self.state, CallState::Requesting(_)) {
            info!("Call rejected by remote");
            self.end(CallOutcome::Rejected, false);
        } else {
            debug!(phase = ?self.phase(), "Ignoring call_rejected");
        }
    }

    /// `call_ended`: the remote side hung up (or withdrew a ringing call).
    pub fn on_call_ended(&mut self) {
        match self.phase() {
            CallPhase::Idle => debug!("Ignoring call_ended with no call"),
            CallPhase::Ringing => {
                info!("Incoming call withdrawn");
                self.state = CallState::Idle;
                self.last_outcome = Some(CallOutcome::Ended);
            }
            _ => {
                info!("Call ended by remote");
                self.end(CallOutcome::Ended, false);
            }
        }
    }

    /// Remote ICE candidate. Never assumes it arrives after the answer.
    /// Candidates tagged with a sender other than the current remote are
    /// dropped.
    pub async fn on_remote_candidate(&mut self, sender: Option<UserId>, candidate: IceCandidate) {
        let remote = match self.state {
            CallState::Idle => {
                debug!("Dropping ICE candidate with no call");
                return;
            }
            CallState::Ringing(ref r) => r.call.caller_id,
            CallState::Requesting(ref s) | CallState::Negotiating(ref s) | CallState::Active(ref s) => {
                s.remote
            }
        };
        if let Some(from) = sender.filter(|from| *from != remote) {
            debug!(from = %from, remote = %remote, "Dropping ICE candidate from outside the call");
            return;
        }

        match self.state {
            CallState::Idle => {}
            CallState::Ringing(ref mut r) => r.pending_candidates.push(candidate),
            CallState::Requesting(ref mut s)
            | CallState::Negotiating(ref mut s)
            | CallState::Active(ref mut s) => s.offer_candidate(candidate).await,
        }
    }

    // -----------------------------------------------------------------------
    // Platform events
    // -----------------------------------------------------------------------

    pub fn on_peer_event(&mut self, peer: PeerId, event: PeerEvent) {
        let Some(session) = self.state.session_mut() else {
            debug!(peer, "Peer event with no session");
            return;
        };
        if session.peer.id() != peer {
            debug!(peer, "Peer event from a stale connection");
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.outbox.push(ClientEvent::IceCandidate {
                    receiver_id: session.remote,
                    candidate,
                });
            }
            PeerEvent::RemoteStream(stream) => {
                debug!(stream = %stream.id, "Remote stream attached");
                session.remote_stream = Some(stream);
            }
            PeerEvent::StateChanged(PeerState::Connected) => {
                if let CallState::Negotiating(_) = self.state {
                    if let CallState::Negotiating(s) =
                        std::mem::replace(&mut self.state, CallState::Idle)
                    {
                        info!(remote = %s.remote, "Call active");
                        self.state = CallState::Active(s);
                    }
                }
            }
            PeerEvent::StateChanged(PeerState::Failed) => {
                warn!(peer, "Peer connection failed");
                self.end(CallOutcome::Failed("peer connection failed".into()), true);
            }
            PeerEvent::StateChanged(state) => debug!(peer, state = ?state, "Peer state"),
        }
    }

    /// A local track ended on its own (e.g. the OS stopped a screen share).
    pub fn on_local_track_ended(&mut self, track_id: &str) {
        let ours = self
            .state
            .session()
            .and_then(|s| s.local_stream.as_ref())
            .is_some_and(|stream| stream.has_track(track_id));
        if ours {
            info!(track = track_id, "Local media ended, ending call");
            self.end(CallOutcome::Ended, true);
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn fail_setup(&mut self, e: MediaError) -> CallError {
        warn!(error = %e, "Call setup failed");
        self.last_outcome = Some(CallOutcome::Failed(e.to_string()));
        CallError::Negotiation(e)
    }

    /// Tear the session down and go back to `Idle`.
    fn end(&mut self, outcome: CallOutcome, notify_remote: bool) {
        let Some(mut session) = (match std::mem::replace(&mut self.state, CallState::Idle) {
            CallState::Requesting(s) | CallState::Negotiating(s) | CallState::Active(s) => Some(s),
            CallState::Idle | CallState::Ringing(_) => None,
        }) else {
            return;
        };

        if let Some(stream) = session.local_stream.take() {
            self.devices.stop(&stream);
        }
        session.remote_stream = None;
        session.peer.close();

        if notify_remote {
            self.outbox.push(ClientEvent::EndCall {
                receiver_id: session.remote,
            });
        }
        info!(remote = %session.remote, outcome = ?outcome, "Call torn down");
        self.last_outcome = Some(outcome);
    }
}

fn phase_of(state: &CallState) -> CallPhase {
    match state {
        CallState::Idle => CallPhase::Idle,
        CallState::Requesting(_) => CallPhase::Requesting,
        CallState::Ringing(_) => CallPhase::Ringing,
        CallState::Negotiating(_) => CallPhase::Negotiating,
        CallState::Active(_) => CallPhase::Active,
    }
}

async fn acquire(
    devices: &dyn MediaDevices,
    kind: CallKind,
    role: CallRole,
) -> Result<MediaStream, MediaError> {
    match (kind, role) {
        (CallKind::Voice, _) | (CallKind::Screen, CallRole::Callee) => {
            devices.user_media(true, false).await
        }
        (CallKind::Video, _) => devices.user_media(true, true).await,
        (CallKind::Screen, CallRole::Caller) => {
            let display = devices.display_media().await?;
            // Microphone is optional: the share goes ahead without it.
            match devices.user_media(true, false).await {
                Ok(mic) => Ok(display.merge(mic)),
                Err(e) => {
                    warn!(error = %e, "Sharing screen without microphone");
                    Ok(display)
                }
            }
        }
    }
}

async fn prepare_offer(
    peer: &mut dyn PeerConnection,
    local: &MediaStream,
) -> Result<SessionDescription, MediaError> {
    peer.add_stream(local).await?;
    let offer = peer.create_offer().await?;
    peer.set_local_description(offer.clone()).await?;
    Ok(offer)
}

async fn prepare_answer(
    session: &mut CallSession,
    offer: SessionDescription,
) -> Result<SessionDescription, MediaError> {
    if let Some(ref stream) = session.local_stream {
        session.peer.add_stream(stream).await?;
    }
    session.set_remote(offer).await?;
    let answer = session.peer.create_answer().await?;
    session.peer.set_local_description(answer.clone()).await?;
    Ok(answer)
}

async fn apply_candidate(peer: &mut dyn PeerConnection, candidate: IceCandidate) {
    if let Err(e) = peer.add_ice_candidate(candidate).await {
        warn!(peer = peer.id(), error = %e, "Failed to apply ICE candidate");
    }
}
