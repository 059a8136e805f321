//! Component error taxonomy, composed into one top-level [`CoreError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("requested lens is not available on this device")]
    LensMissing,

    #[error("camera init failed after retries: {0}")]
    InitFailed(String),

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid plane layout: {0}")]
    InvalidLayout(String),

    #[error("jpeg encode failed: {0}")]
    JpegEncode(String),

    #[error("jpeg decode failed: {0}")]
    JpegDecode(String),
}

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("sdp negotiation failed: {0}")]
    Negotiation(String),

    #[error("peer connection failed")]
    ConnectionFailed,

    #[error("no active peer session")]
    NoSession,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("port {0} is already in use")]
    PortBusy(u16),

    #[error("sink transport error: {0}")]
    SinkTransport(String),

    #[error("malformed signaling message: {0}")]
    SignalingMalformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),
}

/// Top-level error, composed of sibling component errors the way
/// `rust-mjpeg-rtp` keeps `CaptureError`/`ConfigError`/`StreamerError` distinct
/// rather than flattening them into one enum.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
