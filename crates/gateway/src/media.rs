//! Narrow contract to the media plane.
//!
//! SDP negotiation, ICE, and codec work live behind this trait; the core
//! only needs three things from a peer connection: an answer for an offer,
//! somewhere to push reverse-track PCM, and (when the peer has a data
//! channel) a second control-message sink to fan out to.

use tokio::sync::mpsc;

use vx_domain::{Error, Result};

/// One peer connection's media surface.
#[async_trait::async_trait]
pub trait MediaPort: Send + Sync {
    /// Answer an SDP offer.
    async fn negotiate(&self, offer_sdp: &str) -> Result<String>;

    /// Sink for outbound track audio (16-bit LE PCM frames). `None` when
    /// no media track is attached; TTS then falls back to the control
    /// channel.
    fn audio_sink(&self) -> Option<mpsc::Sender<Vec<u8>>>;

    /// Sink for serialized control messages on the peer's data channel.
    fn data_sender(&self) -> Option<mpsc::Sender<String>>;
}

/// Creates a [`MediaPort`] per accepted transport.
pub trait MediaFactory: Send + Sync {
    fn open(&self) -> std::sync::Arc<dyn MediaPort>;
}

/// No media stack: offers are refused and audio rides the control channel.
pub struct NullMedia;

#[async_trait::async_trait]
impl MediaPort for NullMedia {
    async fn negotiate(&self, _offer_sdp: &str) -> Result<String> {
        Err(Error::Other("no media stack configured".into()))
    }

    fn audio_sink(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        None
    }

    fn data_sender(&self) -> Option<mpsc::Sender<String>> {
        None
    }
}

pub struct NullMediaFactory;

impl MediaFactory for NullMediaFactory {
    fn open(&self) -> std::sync::Arc<dyn MediaPort> {
        std::sync::Arc::new(NullMedia)
    }
}
