use async_trait::async_trait;

use huddle_shared::constants::DEFAULT_STUN_SERVER;
use huddle_shared::{IceCandidate, SessionDescription};

use crate::error::MediaError;
use crate::media::MediaStream;

/// Distinguishes peer connections so late events from a closed one can be
/// told apart from the current call's.
pub type PeerId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// ICE gathered a local candidate that the remote side needs.
    LocalCandidate(IceCandidate),
    /// The remote side's media arrived.
    RemoteStream(MediaStream),
    StateChanged(PeerState),
}

/// One direct media session with a remote client.
#[async_trait]
pub trait PeerConnection: Send {
    fn id(&self) -> PeerId;

    async fn add_stream(&mut self, stream: &MediaStream) -> Result<(), MediaError>;

    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), MediaError>;

    fn close(&mut self);
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(&self, config: &RtcConfig) -> Result<Box<dyn PeerConnection>, MediaError>;
}
