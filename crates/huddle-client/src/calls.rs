//! Call task.
//!
//! The [`CallNegotiator`] lives in its own task so media acquisition and
//! SDP work never stall message handling. The client loop forwards local
//! intents and call signaling as [`CallInput`]s; platform events come
//! straight from the media backend. After every step the negotiator's
//! outbox is flushed onto the shared channel.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use huddle_media::{CallError, CallNegotiator, CallOutcome, CallPhase, IncomingCall, MediaEvent};
use huddle_net::ConnectionManager;
use huddle_shared::{CallKind, ServerEvent, UserId};

use crate::error::ClientError;
use crate::events::UiEvent;

pub(crate) type Reply = oneshot::Sender<Result<(), ClientError>>;

pub(crate) enum CallInput {
    Start { to: UserId, kind: CallKind, reply: Reply },
    Accept { reply: Reply },
    Reject { reply: Reply },
    HangUp,
    Signal(ServerEvent),
    /// Hang up whatever is going on, then stop.
    Shutdown { done: oneshot::Sender<()> },
}

/// Published after every step for snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStatus {
    pub phase: CallPhase,
    pub remote: Option<UserId>,
    pub kind: Option<CallKind>,
    pub incoming: Option<IncomingCall>,
    pub last_outcome: Option<CallOutcome>,
}

impl CallStatus {
    fn idle() -> Self {
        Self {
            phase: CallPhase::Idle,
            remote: None,
            kind: None,
            incoming: None,
            last_outcome: None,
        }
    }

    fn of(negotiator: &CallNegotiator) -> Self {
        let session = negotiator.session();
        Self {
            phase: negotiator.phase(),
            remote: session.map(|s| s.remote()),
            kind: session.map(|s| s.kind()),
            incoming: negotiator.incoming().cloned(),
            last_outcome: negotiator.last_outcome().cloned(),
        }
    }
}

pub(crate) struct CallHandle {
    pub input: mpsc::UnboundedSender<CallInput>,
    pub status: watch::Receiver<CallStatus>,
}

pub(crate) fn spawn_call_task(
    negotiator: CallNegotiator,
    media_events: mpsc::UnboundedReceiver<MediaEvent>,
    connection: ConnectionManager,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
) -> CallHandle {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(CallStatus::idle());

    tokio::spawn(run_calls(
        negotiator,
        media_events,
        input_rx,
        connection,
        ui_tx,
        status_tx,
    ));

    CallHandle {
        input: input_tx,
        status: status_rx,
    }
}

async fn run_calls(
    mut negotiator: CallNegotiator,
    mut media_events: mpsc::UnboundedReceiver<MediaEvent>,
    mut input_rx: mpsc::UnboundedReceiver<CallInput>,
    connection: ConnectionManager,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    status_tx: watch::Sender<CallStatus>,
) {
    info!("Call task started");

    loop {
        let before = negotiator.phase();
        let mut pending_reply = None;

        tokio::select! {
            input = input_rx.recv() => match input {
                None => break,
                Some(CallInput::Shutdown { done }) => {
                    negotiator.hang_up();
                    flush(&mut negotiator, &connection);
                    let _ = status_tx.send(CallStatus::of(&negotiator));
                    let _ = done.send(());
                    break;
                }
                Some(input) => pending_reply = handle_input(&mut negotiator, input, &ui_tx).await,
            },

            Some(event) = media_events.recv() => match event {
                MediaEvent::LocalTrackEnded { track_id } => {
                    negotiator.on_local_track_ended(&track_id);
                }
                MediaEvent::Peer { peer, event } => negotiator.on_peer_event(peer, event),
            },
        }

        flush(&mut negotiator, &connection);

        let after = negotiator.phase();
        if after != before {
            info!(from = ?before, to = ?after, "Call phase changed");
            let _ = ui_tx.send(UiEvent::CallPhaseChanged(after));
            if after == CallPhase::Idle {
                if let Some(outcome) = negotiator.last_outcome() {
                    let _ = ui_tx.send(UiEvent::CallEnded(outcome.clone()));
                }
            }
        }
        let _ = status_tx.send(CallStatus::of(&negotiator));

        // Replies go out last so the caller observes the new phase
        if let Some((reply, result)) = pending_reply {
            let _ = reply.send(result.map_err(ClientError::from));
        }
    }

    info!("Call task stopped");
}

/// Apply one input. Returns the reply to send once the step is published.
async fn handle_input(
    negotiator: &mut CallNegotiator,
    input: CallInput,
    ui_tx: &mpsc::UnboundedSender<UiEvent>,
) -> Option<(Reply, Result<(), CallError>)> {
    match input {
        CallInput::Start { to, kind, reply } => {
            let result = negotiator.start_call(to, kind).await;
            Some((reply, result))
        }
        CallInput::Accept { reply } => Some((reply, negotiator.accept().await)),
        CallInput::Reject { reply } => Some((reply, negotiator.reject())),
        CallInput::HangUp => {
            negotiator.hang_up();
            None
        }
        CallInput::Signal(event) => {
            handle_signal(negotiator, event, ui_tx).await;
            None
        }
        CallInput::Shutdown { .. } => None,
    }
}

async fn handle_signal(
    negotiator: &mut CallNegotiator,
    event: ServerEvent,
    ui_tx: &mpsc::UnboundedSender<UiEvent>,
) {
    match event {
        ServerEvent::CallInitiated {
            caller_id,
            caller_name,
            call_type,
            offer,
        } => {
            if let Some(call) = negotiator.on_call_initiated(caller_id, caller_name, call_type, offer)
            {
                let _ = ui_tx.send(UiEvent::IncomingCall(call));
            }
        }
        ServerEvent::CallAccepted { answer } => negotiator.on_call_accepted(answer).await,
        ServerEvent::CallRejected => negotiator.on_call_rejected(),
        ServerEvent::IceCandidate { sender, candidate } => {
            negotiator.on_remote_candidate(sender, candidate).await;
        }
        ServerEvent::CallEnded => negotiator.on_call_ended(),
        other => debug!(event = other.name(), "Not a call signal"),
    }
}

/// Send everything the negotiator queued. A dropped signal is logged and
/// left to the call's own failure handling.
fn flush(negotiator: &mut CallNegotiator, connection: &ConnectionManager) {
    for event in negotiator.take_outbound() {
        let name = event.name();
        if let Err(e) = connection.emit(event) {
            warn!(event = name, error = %e, "Call signal not sent");
        }
    }
}
