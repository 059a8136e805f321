//! Wire message types and the sink bookkeeping used by C6.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalingMessage {
    #[serde(rename = "SDP")]
    Sdp { sdp_type: SdpType, sdp: String },
    #[serde(rename = "ICE")]
    Ice {
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
        candidate: String,
    },
    #[serde(rename = "TIMESTAMP")]
    Timestamp { timestamp: u64 },
    #[serde(rename = "VIDEO_URL")]
    VideoUrl {
        video_id: String,
        current_time: Option<f64>,
    },
    #[serde(rename = "VIDEO_CONTROL")]
    VideoControl {
        command: VideoControlCommand,
        value: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoControlCommand {
    Play,
    Pause,
    Stop,
    Seek,
}

/// A single logical sink connection: ordered, reliable, at most one active
/// sender at a time. A new connection displaces the previous one (the
/// caller sends a "going away" close frame before swapping the channel).
pub struct SignalingChannel {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalingChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, msg: SignalingMessage) -> Result<(), mpsc::error::SendError<SignalingMessage>> {
        self.tx.send(msg)
    }
}

/// The set of currently attached fallback consumers: a singleton
/// WebSocket sink and an unordered set of SSE observers. Either may be
/// removed at any time on a transport error.
#[derive(Default)]
pub struct SinkRegistry {
    ws_sink: Option<SignalingChannel>,
    sse_observers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new WebSocket sink, returning the previous one (if any)
    /// so the caller can send it a "going away" close frame before
    /// dropping it.
    pub fn set_ws_sink(&mut self, sink: SignalingChannel) -> Option<SignalingChannel> {
        self.ws_sink.replace(sink)
    }

    pub fn take_ws_sink(&mut self) -> Option<SignalingChannel> {
        self.ws_sink.take()
    }

    pub fn has_ws_sink(&self) -> bool {
        self.ws_sink.is_some()
    }

    pub fn send_to_ws(&self, msg: SignalingMessage) -> bool {
        match &self.ws_sink {
            Some(sink) => sink.send(msg).is_ok(),
            None => false,
        }
    }

    pub fn add_sse_observer(&mut self, tx: mpsc::UnboundedSender<Vec<u8>>) {
        self.sse_observers.push(tx);
    }

    pub fn sse_observer_count(&self) -> usize {
        self.sse_observers.len()
    }

    /// Broadcasts a JPEG frame to every SSE observer, dropping any whose
    /// receiver has gone away.
    pub fn broadcast_sse(&mut self, jpeg: &[u8]) {
        self.sse_observers.retain(|tx| tx.send(jpeg.to_vec()).is_ok());
    }
}
