//! Scriptable in-memory media platform.
//!
//! [`FakeMedia`] hands out a [`MediaBackend`] whose devices and peer
//! connections record everything done to them, and lets the caller inject
//! platform events (ICE candidates, connection state, track ends).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use huddle_shared::{IceCandidate, SessionDescription};

use crate::error::MediaError;
use crate::media::{MediaBackend, MediaDevices, MediaEvent, MediaStream, MediaTrack, TrackKind};
use crate::peer::{PeerConnection, PeerConnectionFactory, PeerEvent, PeerId, RtcConfig};

/// What a fake peer connection has been through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerRecord {
    pub streams: Vec<String>,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    denied: HashSet<TrackKind>,
    fail_candidates: bool,
    next_id: u64,
    live: Vec<MediaTrack>,
    stopped: Vec<MediaTrack>,
    peers: HashMap<PeerId, PeerRecord>,
    last_peer: Option<PeerId>,
}

impl FakeState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn capture(&mut self, kinds: &[TrackKind]) -> Result<MediaStream, MediaError> {
        if let Some(kind) = kinds.iter().find(|k| self.denied.contains(k)) {
            return Err(MediaError::PermissionDenied(format!("{kind:?} access denied")));
        }
        let stream_id = format!("stream-{}", self.next());
        let mut tracks = Vec::new();
        for kind in kinds {
            let track = MediaTrack {
                id: format!("track-{}", self.next()),
                kind: *kind,
            };
            self.live.push(track.clone());
            tracks.push(track);
        }
        Ok(MediaStream {
            id: stream_id,
            tracks,
        })
    }
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Controller side of the fake platform.
#[derive(Clone)]
pub struct FakeMedia {
    state: Arc<Mutex<FakeState>>,
    events_tx: mpsc::UnboundedSender<MediaEvent>,
}

impl FakeMedia {
    pub fn new() -> (FakeMedia, MediaBackend) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let (events_tx, events) = mpsc::unbounded_channel();
        let backend = MediaBackend {
            devices: Arc::new(FakeDevices {
                state: state.clone(),
            }),
            peers: Arc::new(FakePeerFactory {
                state: state.clone(),
            }),
            events,
        };
        (FakeMedia { state, events_tx }, backend)
    }

    /// Refuse capture of `kind` from now on.
    pub fn deny(&self, kind: TrackKind) {
        lock(&self.state).denied.insert(kind);
    }

    /// Make every `add_ice_candidate` fail.
    pub fn fail_candidates(&self) {
        lock(&self.state).fail_candidates = true;
    }

    /// Tracks captured and not yet stopped.
    pub fn live_tracks(&self) -> Vec<MediaTrack> {
        lock(&self.state).live.clone()
    }

    pub fn stopped_tracks(&self) -> Vec<MediaTrack> {
        lock(&self.state).stopped.clone()
    }

    pub fn last_peer(&self) -> Option<(PeerId, PeerRecord)> {
        let state = lock(&self.state);
        let id = state.last_peer?;
        state.peers.get(&id).map(|p| (id, p.clone()))
    }

    pub fn peer(&self, id: PeerId) -> Option<PeerRecord> {
        lock(&self.state).peers.get(&id).cloned()
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.state).peers.len()
    }

    /// Inject a platform event as if the media stack raised it.
    pub fn raise(&self, event: MediaEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Simulate the OS ending a local track (e.g. "Stop sharing").
    pub fn end_track(&self, track_id: &str) {
        {
            let mut state = lock(&self.state);
            if let Some(pos) = state.live.iter().position(|t| t.id == track_id) {
                let track = state.live.remove(pos);
                state.stopped.push(track);
            }
        }
        self.raise(MediaEvent::LocalTrackEnded {
            track_id: track_id.to_string(),
        });
    }

    pub fn peer_event(&self, peer: PeerId, event: PeerEvent) {
        self.raise(MediaEvent::Peer { peer, event });
    }
}

struct FakeDevices {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self, audio: bool, video: bool) -> Result<MediaStream, MediaError> {
        let mut kinds = Vec::new();
        if audio {
            kinds.push(TrackKind::Audio);
        }
        if video {
            kinds.push(TrackKind::Video);
        }
        lock(&self.state).capture(&kinds)
    }

    async fn display_media(&self) -> Result<MediaStream, MediaError> {
        lock(&self.state).capture(&[TrackKind::Display])
    }

    fn stop(&self, stream: &MediaStream) {
        let mut state = lock(&self.state);
        for track in &stream.tracks {
            if let Some(pos) = state.live.iter().position(|t| t.id == track.id) {
                let track = state.live.remove(pos);
                state.stopped.push(track);
            }
        }
    }
}

struct FakePeerFactory {
    state: Arc<Mutex<FakeState>>,
}

impl PeerConnectionFactory for FakePeerFactory {
    fn create(&self, _config: &RtcConfig) -> Result<Box<dyn PeerConnection>, MediaError> {
        let mut state = lock(&self.state);
        let id = state.next();
        state.peers.insert(id, PeerRecord::default());
        state.last_peer = Some(id);
        Ok(Box::new(FakePeer {
            id,
            state: self.state.clone(),
        }))
    }
}

struct FakePeer {
    id: PeerId,
    state: Arc<Mutex<FakeState>>,
}

impl FakePeer {
    fn with_record<T>(&self, f: impl FnOnce(&mut PeerRecord) -> T) -> Result<T, MediaError> {
        let mut state = lock(&self.state);
        let record = state
            .peers
            .get_mut(&self.id)
            .ok_or_else(|| MediaError::PeerConnection("unknown peer".into()))?;
        if record.closed {
            return Err(MediaError::PeerConnection("peer connection closed".into()));
        }
        Ok(f(record))
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    fn id(&self) -> PeerId {
        self.id
    }

    async fn add_stream(&mut self, stream: &MediaStream) -> Result<(), MediaError> {
        self.with_record(|r| r.streams.push(stream.id.clone()))
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError> {
        let id = self.id;
        self.with_record(|_| SessionDescription::offer(format!("fake-offer-{id}")))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError> {
        let id = self.id;
        self.with_record(|r| r.remote_description.is_some())
            .and_then(|has_remote| {
                if has_remote {
                    Ok(SessionDescription::answer(format!("fake-answer-{id}")))
                } else {
                    Err(MediaError::PeerConnection("no remote offer".into()))
                }
            })
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), MediaError> {
        self.with_record(|r| r.local_description = Some(desc))
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), MediaError> {
        self.with_record(|r| r.remote_description = Some(desc))
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), MediaError> {
        if lock(&self.state).fail_candidates {
            return Err(MediaError::PeerConnection("candidate rejected".into()));
        }
        self.with_record(|r| r.candidates.push(candidate))
    }

    fn close(&mut self) {
        if let Some(record) = lock(&self.state).peers.get_mut(&self.id) {
            record.closed = true;
        }
    }
}
