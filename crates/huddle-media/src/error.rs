use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Peer connection error: {0}")]
    PeerConnection(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Another call is already in progress")]
    Busy,

    #[error("No incoming call to answer")]
    NoIncomingCall,

    #[error("Cannot call yourself")]
    SelfCall,

    #[error("Could not access media devices: {0}")]
    Media(MediaError),

    #[error("Call negotiation failed: {0}")]
    Negotiation(MediaError),
}
