//! Media backend for terminals and servers with no capture hardware.
//!
//! Every capture request fails with [`MediaError::DeviceUnavailable`], so
//! placing or accepting a call surfaces a media-access error and leaves the
//! negotiator idle. Messaging is unaffected.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MediaError;
use crate::media::{MediaBackend, MediaDevices, MediaEvent, MediaStream};
use crate::peer::{PeerConnection, PeerConnectionFactory, RtcConfig};

pub fn headless_backend() -> MediaBackend {
    let (events_tx, events) = mpsc::unbounded_channel();
    MediaBackend {
        devices: Arc::new(HeadlessDevices),
        peers: Arc::new(HeadlessPeers {
            _events_tx: events_tx,
        }),
        events,
    }
}

pub struct HeadlessDevices;

#[async_trait]
impl MediaDevices for HeadlessDevices {
    async fn user_media(&self, _audio: bool, _video: bool) -> Result<MediaStream, MediaError> {
        Err(MediaError::DeviceUnavailable(
            "no camera or microphone in headless mode".into(),
        ))
    }

    async fn display_media(&self) -> Result<MediaStream, MediaError> {
        Err(MediaError::DeviceUnavailable(
            "no display to capture in headless mode".into(),
        ))
    }

    fn stop(&self, _stream: &MediaStream) {}
}

pub struct HeadlessPeers {
    // Held so the backend's event receiver stays open (and silent).
    _events_tx: mpsc::UnboundedSender<MediaEvent>,
}

impl PeerConnectionFactory for HeadlessPeers {
    fn create(&self, _config: &RtcConfig) -> Result<Box<dyn PeerConnection>, MediaError> {
        Err(MediaError::PeerConnection(
            "peer connections are not available in headless mode".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_capture_fails() {
        let backend = headless_backend();
        assert!(matches!(
            backend.devices.user_media(true, false).await,
            Err(MediaError::DeviceUnavailable(_))
        ));
        assert!(backend.devices.display_media().await.is_err());
        assert!(backend.peers.create(&RtcConfig::default()).is_err());
    }
}
