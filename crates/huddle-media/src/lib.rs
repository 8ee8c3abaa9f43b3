//! Call signaling and media seams.
//!
//! Capture devices and peer connections are platform services; this crate
//! only sees them through [`MediaDevices`] and [`PeerConnection`]. The
//! [`CallNegotiator`] drives them through one pairwise call at a time.

pub mod error;
pub mod fake;
pub mod headless;
pub mod media;
pub mod negotiator;
pub mod peer;

pub use error::{CallError, MediaError};
pub use media::{MediaBackend, MediaDevices, MediaEvent, MediaStream, MediaTrack, TrackKind};
pub use negotiator::{CallNegotiator, CallOutcome, CallPhase, CallRole, CallSession, IncomingCall};
pub use peer::{PeerConnection, PeerConnectionFactory, PeerEvent, PeerId, PeerState, RtcConfig};
