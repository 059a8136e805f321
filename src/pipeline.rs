//! C7: owns the lifecycle state machine and wires C1-C6 together.
//!
//! Grounded on the root binary's `tokio::spawn`-per-subsystem pattern and
//! `rust-mjpeg-rtp`'s explicit idempotent start/stop bookkeeping.

use crate::camera::{CameraConfig as DeviceConfig, FrameSource};
use crate::config::Config;
use crate::error::PipelineError;
use crate::i420::I420ConverterConfig;
use crate::jpeg::{encode_jpeg_or_drop, JpegEncoderConfig};
use crate::peer::{PeerConfig, PeerNotification, PeerSession};
use crate::router::{FrameRouter, RoutedFrame};
use crate::server::{FallbackServer, ServerConfig, SignalingTransport};
use crate::signaling::{SinkRegistry, VideoControlCommand};
use crate::state::{CameraMode, Lens, PipelineEvent, PipelineState};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

/// Acquire/release seam for the platform wake-lock. The real platform call
/// is out of scope; what matters here is the calling convention (acquire
/// on start, release on stop).
pub trait WakeLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

pub struct NoopWakeLock;
impl WakeLock for NoopWakeLock {
    fn acquire(&self) {}
    fn release(&self) {}
}

struct Inner {
    state: PipelineState,
    peer: Option<Arc<PeerSession>>,
}

/// Routes incoming signaling events from C6 to the active C5 `PeerSession`,
/// and drives the pipeline's own `PipelineState` machine off peer/camera
/// notifications. One `PipelineController` per process.
pub struct PipelineController {
    inner: Mutex<Inner>,
    peer_cfg: PeerConfig,
    ice_timeout: Duration,
    wake_lock: Arc<dyn WakeLock>,
    is_running: AtomicBool,
}

impl PipelineController {
    pub fn new(peer_cfg: PeerConfig, ice_timeout: Duration, wake_lock: Arc<dyn WakeLock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: PipelineState::Stopped,
                peer: None,
            }),
            peer_cfg,
            ice_timeout,
            wake_lock,
            is_running: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> PipelineState {
        self.inner.lock().await.state
    }

    async fn transition(&self, event: PipelineEvent) -> Result<PipelineState, PipelineError> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .state
            .apply(event)
            .map_err(|e| PipelineError::IllegalTransition(e.to_string()))?;
        inner.state = next;
        Ok(next)
    }

    pub fn start(&self) {
        if !self.is_running.swap(true, Ordering::SeqCst) {
            self.wake_lock.acquire();
        }
    }

    /// Idempotent: a second `stop()` while already stopped is a no-op.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        if self.is_running.swap(false, Ordering::SeqCst) {
            self.wake_lock.release();
            let mut inner = self.inner.lock().await;
            if inner.state != PipelineState::Stopped {
                inner.state = inner
                    .state
                    .apply(PipelineEvent::Stop)
                    .map_err(|e| PipelineError::IllegalTransition(e.to_string()))?;
            }
            if let Some(peer) = inner.peer.take() {
                let _ = peer.close().await;
            }
        }
        Ok(())
    }

    /// The first WebSocket sink attempts peer negotiation; building the
    /// `PeerSession` here is what `SinkWebSocketOpenedPeerInitFailed`
    /// degrades from when it errors.
    async fn start_peer_negotiation(&self) -> Result<Arc<PeerSession>, PipelineError> {
        let (session, mut notify_rx) = PeerSession::new(&self.peer_cfg)
            .await
            .map_err(PipelineError::Peer)?;
        let ice_timeout = self.ice_timeout;
        let watched = Arc::clone(&session);
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(ice_timeout);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    notification = notify_rx.recv() => {
                        match notification {
                            Some(PeerNotification::StateChanged(state)) => {
                                info!(?state, "peer state changed");
                            }
                            Some(PeerNotification::IceCandidateLocal(..)) => {}
                            None => break,
                        }
                    }
                    _ = &mut deadline => {
                        if watched.state() != crate::state::PeerState::Connected {
                            warn!("ice negotiation timed out");
                        }
                        break;
                    }
                }
            }
        });
        Ok(session)
    }
}

/// Bridges C6's `SignalingTransport` calls into the active C5 session,
/// and drives `PipelineState` transitions off sink connect/disconnect and
/// peer outcome events.
pub struct PipelineTransport {
    controller: Arc<PipelineController>,
    registry: Arc<Mutex<SinkRegistry>>,
}

impl PipelineTransport {
    pub fn new(controller: Arc<PipelineController>, registry: Arc<Mutex<SinkRegistry>>) -> Self {
        Self { controller, registry }
    }
}

#[async_trait::async_trait]
impl SignalingTransport for PipelineTransport {
    /// This device always originates the session (it owns the video
    /// track); a request on this path means the sink is asking us to
    /// (re)start negotiation, so any incoming SDP text is informational
    /// only and a fresh local offer is produced and returned.
    async fn handle_offer(&self, _sdp: String) -> Result<String, crate::error::ServerError> {
        let peer = self
            .controller
            .start_peer_negotiation()
            .await
            .map_err(|e| crate::error::ServerError::SinkTransport(e.to_string()))?;
        let offer_sdp = peer
            .create_offer()
            .await
            .map_err(|e| crate::error::ServerError::SinkTransport(e.to_string()))?;
        let mut inner = self.controller.inner.lock().await;
        inner.peer = Some(peer);
        Ok(offer_sdp)
    }

    async fn handle_answer(&self, sdp: String) -> Result<(), crate::error::ServerError> {
        let peer = {
            let inner = self.controller.inner.lock().await;
            inner.peer.clone()
        };
        match peer {
            Some(peer) => peer
                .set_remote_answer(sdp)
                .await
                .map_err(|e| crate::error::ServerError::SinkTransport(e.to_string())),
            None => Err(crate::error::ServerError::SinkTransport(
                "no active peer session".to_string(),
            )),
        }
    }

    async fn handle_ice(
        &self,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<(), crate::error::ServerError> {
        let peer = {
            let inner = self.controller.inner.lock().await;
            inner.peer.clone()
        };
        match peer {
            Some(peer) => peer
                .add_remote_ice_candidate(candidate, sdp_mid, sdp_mline_index)
                .await
                .map_err(|e| crate::error::ServerError::SinkTransport(e.to_string())),
            None => Ok(()),
        }
    }

    async fn handle_video_url(&self, video_id: String, current_time: Option<f64>) {
        info!(video_id, ?current_time, "video url received");
    }

    async fn handle_video_control(&self, command: VideoControlCommand, value: Option<f64>) {
        info!(?command, ?value, "video control received");
    }

    async fn on_sink_connected(&self) {
        match self.controller.start_peer_negotiation().await {
            Ok(peer) => {
                match peer.create_offer().await {
                    Ok(offer_sdp) => {
                        let mut inner = self.controller.inner.lock().await;
                        inner.peer = Some(peer);
                        drop(inner);
                        self.registry.lock().await.send_to_ws(
                            crate::signaling::SignalingMessage::Sdp {
                                sdp_type: crate::signaling::SdpType::Offer,
                                sdp: offer_sdp,
                            },
                        );
                        let _ = self
                            .controller
                            .transition(PipelineEvent::SinkWebSocketOpened)
                            .await;
                    }
                    Err(e) => {
                        warn!(error = %e, "offer creation failed, degrading to fallback");
                        let _ = self
                            .controller
                            .transition(PipelineEvent::SinkWebSocketOpenedPeerInitFailed)
                            .await;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "peer session init failed, degrading to fallback");
                let _ = self
                    .controller
                    .transition(PipelineEvent::SinkWebSocketOpenedPeerInitFailed)
                    .await;
            }
        }
    }

    async fn on_sink_disconnected(&self) {
        let mut inner = self.controller.inner.lock().await;
        inner.peer = None;
    }
}

/// Top-level wiring: camera -> router -> (jpeg fallback fan-out, i420
/// injection into the active peer). Runs until `shutdown` resolves.
pub async fn run(
    config: Config,
    lens: Lens,
    wake_lock: Arc<dyn WakeLock>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), PipelineError> {
    let peer_cfg = PeerConfig {
        stun_server: config.webrtc.stun_server.clone(),
        blocked_codecs: config.webrtc.filtered_codecs.clone(),
        target_width: config.webrtc.target_width,
        target_height: config.webrtc.target_height,
        bitrate_bps: config.webrtc.bitrate_bps,
        fps: config.webrtc.fps,
    };
    let controller = Arc::new(PipelineController::new(
        peer_cfg,
        Duration::from_secs(config.webrtc.ice_timeout_secs),
        wake_lock,
    ));
    controller.start();
    controller
        .transition(PipelineEvent::Start)
        .await
        .map_err(|_| PipelineError::IllegalTransition("start".into()))?;

    let device_cfg = DeviceConfig {
        primary_device: config.camera.device.clone(),
        secondary_device: config.camera.second_device.clone(),
        analysis_width: config.camera.analysis_width,
        analysis_height: config.camera.analysis_height,
        open_retry_backoff: config
            .camera
            .open_retry_backoff_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect(),
        lens_close_wait: Duration::from_millis(config.camera.lens_close_wait_ms),
    };
    let (camera, mut frame_rx) = FrameSource::new(device_cfg);
    let camera = Arc::new(camera);
    let camera_ready = camera.camera_ready();

    camera
        .open(CameraMode::Streaming, lens)
        .await
        .map_err(PipelineError::Camera)?;
    camera_ready.notified().await;
    controller
        .transition(PipelineEvent::CameraReady)
        .await
        .map_err(|_| PipelineError::IllegalTransition("camera_ready".into()))?;

    let router = Arc::new(Mutex::new(FrameRouter::new(
        Duration::from_millis(config.router.min_frame_interval_ms),
        8,
    )));
    let (jpeg_tx, _jpeg_rx_placeholder) = broadcast::channel::<Bytes>(8);
    let registry = Arc::new(Mutex::new(SinkRegistry::new()));
    let transport = Arc::new(PipelineTransport::new(
        Arc::clone(&controller),
        Arc::clone(&registry),
    ));

    let server_cfg = ServerConfig {
        bind_ip: config.server.bind_ip.clone(),
        port: config.server.port,
        ws_ping_interval: Duration::from_secs(config.server.ws_ping_interval_secs),
        sse_ping_interval: Duration::from_secs(config.server.sse_ping_interval_secs),
    };
    let server = FallbackServer::new(
        server_cfg,
        Arc::clone(&registry),
        jpeg_tx.clone(),
        transport,
    );
    let listener = server.bind().await.map_err(PipelineError::Server)?;
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            error!(error = %e, "fallback server exited");
        }
    });

    let jpeg_cfg = JpegEncoderConfig {
        quality: config.jpeg.quality,
        target_width: config.jpeg.target_width,
        target_height: config.jpeg.target_height,
    };
    let i420_cfg = I420ConverterConfig {
        target_width: config.webrtc.target_width,
        target_height: config.webrtc.target_height,
    };

    let dispatch_task = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                router.lock().await.dispatch(Instant::now(), &frame);
            }
        })
    };

    let jpeg_fanout_task = {
        let jpeg_rx = router.lock().await.subscribe_jpeg();
        let jpeg_tx = jpeg_tx.clone();
        let registry = Arc::clone(&registry);
        spawn_jpeg_fanout(jpeg_rx, jpeg_tx, registry, jpeg_cfg)
    };

    let i420_inject_task = {
        let i420_rx = router.lock().await.subscribe_i420();
        let controller = Arc::clone(&controller);
        spawn_i420_injection(i420_rx, controller, i420_cfg)
    };

    let _ = shutdown.try_recv();
    tokio::select! {
        _ = &mut shutdown => {}
        _ = server_task => {}
    }

    dispatch_task.abort();
    jpeg_fanout_task.abort();
    i420_inject_task.abort();
    controller.stop().await?;
    let _ = camera.close().await;
    controller
        .transition(PipelineEvent::Drained)
        .await
        .map_err(|_| PipelineError::IllegalTransition("drained".into()))
        .ok();
    Ok(())
}

fn spawn_jpeg_fanout(
    mut jpeg_rx: broadcast::Receiver<Arc<RoutedFrame>>,
    jpeg_tx: broadcast::Sender<Bytes>,
    registry: Arc<Mutex<SinkRegistry>>,
    cfg: JpegEncoderConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match jpeg_rx.recv().await {
                Ok(routed) => {
                    let raw = crate::frame::RawFrame::from(routed.as_ref());
                    if let Some(jpeg) = encode_jpeg_or_drop(&raw, &cfg) {
                        let bytes = jpeg.bytes;
                        let _ = jpeg_tx.send(bytes.clone());
                        registry.lock().await.broadcast_sse(&bytes);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_i420_injection(
    mut i420_rx: broadcast::Receiver<Arc<RoutedFrame>>,
    controller: Arc<PipelineController>,
    _cfg: I420ConverterConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match i420_rx.recv().await {
                Ok(routed) => {
                    let peer = {
                        let inner = controller.inner.lock().await;
                        inner.peer.clone()
                    };
                    if let Some(peer) = peer {
                        let raw = crate::frame::RawFrame::from(routed.as_ref());
                        if let Err(e) = peer.inject_frame(&raw).await {
                            warn!(error = %e, "dropping frame: peer injection failed");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
