use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MediaError;
use crate::peer::{PeerConnectionFactory, PeerEvent, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
    Display,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Handle to captured (local) or received (remote) media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Fold another stream's tracks into this one.
    pub fn merge(mut self, other: MediaStream) -> Self {
        self.tracks.extend(other.tracks);
        self
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|t| t.id == track_id)
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

/// Camera, microphone and display capture.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Microphone and/or camera.
    async fn user_media(&self, audio: bool, video: bool) -> Result<MediaStream, MediaError>;

    /// Screen or window capture.
    async fn display_media(&self) -> Result<MediaStream, MediaError>;

    /// Stop every track of `stream` and release the devices behind it.
    fn stop(&self, stream: &MediaStream);
}

/// Asynchronous notifications from the media platform.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// A local track ended without us stopping it (device unplugged, the OS
    /// stopped a screen share).
    LocalTrackEnded { track_id: String },
    Peer { peer: PeerId, event: PeerEvent },
}

/// Everything the client needs from a media platform.
pub struct MediaBackend {
    pub devices: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub events: mpsc::UnboundedReceiver<MediaEvent>,
}
