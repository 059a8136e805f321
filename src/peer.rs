//! C5: one WebRTC peer connection, SDP/ICE negotiation, codec filtering,
//! and I420 frame injection into the outgoing video track.

use crate::error::PeerError;
use crate::frame::I420Frame;
use crate::i420::{to_i420, I420ConverterConfig};
use crate::sdp_filter::filter_codecs;
use crate::state::{PeerEvent, PeerState};
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate};
use openh264::formats::YUVSlices;
use openh264::OpenH264API;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub struct PeerConfig {
    pub stun_server: String,
    pub blocked_codecs: Vec<String>,
    pub target_width: u32,
    pub target_height: u32,
    pub bitrate_bps: u32,
    pub fps: u32,
}

pub enum PeerNotification {
    IceCandidateLocal(String, Option<String>, Option<u16>),
    StateChanged(PeerState),
}

/// One active session. Owns the `RTCPeerConnection`, the local H.264
/// encoder feeding its video track, and the small state machine from
/// §4.5's transition table.
pub struct PeerSession {
    pc: Arc<RTCPeerConnection>,
    video_track: Arc<TrackLocalStaticSample>,
    encoder: SyncMutex<Encoder>,
    state: SyncMutex<PeerState>,
    i420_cfg: I420ConverterConfig,
    blocked_codecs: Vec<String>,
    notify_tx: mpsc::UnboundedSender<PeerNotification>,
}

impl PeerSession {
    pub async fn new(
        cfg: &PeerConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PeerNotification>), PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(PeerError::WebRtc)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(PeerError::WebRtc)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_network_types(vec![NetworkType::Udp4]);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = vec![RTCIceServer {
            urls: vec![cfg.stun_server.clone()],
            ..Default::default()
        }];
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(PeerError::WebRtc)?,
        );

        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/h264".to_string(),
                ..Default::default()
            },
            "video".to_string(),
            "fitmirror-core".to_string(),
        ));
        pc.add_track(video_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(PeerError::WebRtc)?;

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let ice_tx = notify_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let ice_tx = ice_tx.clone();
            Box::pin(async move {
                if let Some(c) = candidate {
                    if let Ok(init) = c.to_json() {
                        let _ = ice_tx.send(PeerNotification::IceCandidateLocal(
                            init.candidate,
                            init.sdp_mid,
                            init.sdp_mline_index,
                        ));
                    }
                }
            })
        }));

        let state_tx = notify_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            Box::pin(async move {
                let mapped = match s {
                    RTCPeerConnectionState::Connected => Some(PeerState::Connected),
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                        Some(PeerState::Failed)
                    }
                    _ => None,
                };
                if let Some(state) = mapped {
                    let _ = state_tx.send(PeerNotification::StateChanged(state));
                }
            })
        }));

        let encoder_config = EncoderConfig::new()
            .max_frame_rate(FrameRate::from_hz(cfg.fps as f32))
            .bitrate(BitRate::from_bps(cfg.bitrate_bps));
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), encoder_config)
            .map_err(|e| PeerError::Negotiation(e.to_string()))?;

        let session = Arc::new(Self {
            pc,
            video_track,
            encoder: SyncMutex::new(encoder),
            state: SyncMutex::new(PeerState::Idle),
            i420_cfg: I420ConverterConfig {
                target_width: cfg.target_width,
                target_height: cfg.target_height,
            },
            blocked_codecs: cfg.blocked_codecs.clone(),
            notify_tx,
        });

        Ok((session, notify_rx))
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    fn transition(&self, event: PeerEvent) -> Result<PeerState, PeerError> {
        let mut state = self.state.lock();
        let next = state
            .apply(event)
            .map_err(|e| PeerError::Negotiation(e.to_string()))?;
        *state = next;
        Ok(next)
    }

    /// `Idle -> Offering -> AwaitingAnswer`: creates the local offer, sets
    /// it as the local description (unfiltered), and returns the SDP text
    /// filtered for transmission (§4.5's codec-filter algorithm).
    pub async fn create_offer(&self) -> Result<String, PeerError> {
        self.transition(PeerEvent::CreateOffer)?;
        let offer = self.pc.create_offer(None).await.map_err(PeerError::WebRtc)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(PeerError::WebRtc)?;
        self.transition(PeerEvent::OfferCreated)?;
        Ok(filter_codecs(&offer.sdp, &self.blocked_codecs))
    }

    pub async fn set_remote_answer(&self, sdp: String) -> Result<(), PeerError> {
        let desc = RTCSessionDescription::answer(sdp).map_err(PeerError::WebRtc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(PeerError::WebRtc)?;
        self.transition(PeerEvent::AnswerReceived)?;
        Ok(())
    }

    pub async fn add_remote_ice_candidate(
        &self,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate,
            sdp_mid,
            sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(PeerError::WebRtc)?;
        self.transition(PeerEvent::IceCandidateRemote)?;
        Ok(())
    }

    /// `inject_frame`: converts to I420 (C4), encodes H.264, and writes the
    /// resulting sample to the outgoing video track. Encoder/track errors
    /// are local to this frame and do not tear down the session.
    pub async fn inject_frame(&self, frame: &crate::frame::RawFrame) -> Result<(), PeerError> {
        let i420 = to_i420(frame, &self.i420_cfg);
        let encoded = self.encode(&i420)?;
        let duration = Duration::from_secs_f64(1.0 / 30.0);
        self.video_track
            .write_sample(&webrtc::media::Sample {
                data: encoded.into(),
                duration,
                ..Default::default()
            })
            .await
            .map_err(PeerError::WebRtc)?;
        Ok(())
    }

    fn encode(&self, frame: &I420Frame) -> Result<Vec<u8>, PeerError> {
        let mut encoder = self.encoder.lock();
        let w = frame.width as usize;
        let h = frame.height as usize;
        let chroma_stride = w / 2;
        let yuv = YUVSlices::new(
            (&frame.y, &frame.u, &frame.v),
            (w, h),
            (w, chroma_stride, chroma_stride),
        );
        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| PeerError::Negotiation(e.to_string()))?
            .to_vec();
        Ok(to_annex_b(&bitstream))
    }

    pub async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await.map_err(PeerError::WebRtc)?;
        let mut state = self.state.lock();
        *state = PeerState::Closed;
        Ok(())
    }

    pub fn mark_failed(&self) {
        let mut state = self.state.lock();
        *state = PeerState::Failed;
        let _ = self
            .notify_tx
            .send(PeerNotification::StateChanged(PeerState::Failed));
    }
}

/// OpenH264 may emit either Annex-B (start-code) or AVCC (length-prefixed)
/// bitstreams depending on build configuration; WebRTC needs Annex-B, so
/// AVCC buffers are rewritten by replacing each 4-byte length prefix with
/// a `00 00 00 01` start code.
fn to_annex_b(buf: &[u8]) -> Vec<u8> {
    let looks_like_annex_b = buf.len() >= 4
        && buf[0] == 0
        && buf[1] == 0
        && (buf[2] == 1 || (buf[2] == 0 && buf[3] == 1));
    if looks_like_annex_b {
        return buf.to_vec();
    }

    let mut out = Vec::with_capacity(buf.len() + 64);
    let mut i = 0;
    while i + 4 <= buf.len() {
        let nalu_size =
            u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]) as usize;
        i += 4;
        if i + nalu_size > buf.len() {
            break;
        }
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&buf[i..i + nalu_size]);
        i += nalu_size;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_cfg() -> PeerConfig {
        PeerConfig {
            stun_server: "stun:stun.l.google.com:19302".to_string(),
            blocked_codecs: vec!["VP8".to_string(), "AV1".to_string()],
            target_width: 320,
            target_height: 240,
            bitrate_bps: 500_000,
            fps: 10,
        }
    }

    #[tokio::test]
    async fn create_offer_filters_blocked_codecs_from_transmitted_sdp() {
        let (session, _rx) = PeerSession::new(&default_cfg()).await.unwrap();
        let filtered_sdp = session.create_offer().await.unwrap();
        assert!(!filtered_sdp.contains("VP8/90000"));
        assert!(!filtered_sdp.contains("AV1/90000"));
        assert_eq!(session.state(), PeerState::AwaitingAnswer);
    }

    #[tokio::test]
    async fn mark_failed_transitions_state_and_notifies() {
        let (session, mut rx) = PeerSession::new(&default_cfg()).await.unwrap();
        session.mark_failed();
        assert_eq!(session.state(), PeerState::Failed);
        let notification = rx.recv().await.unwrap();
        assert!(matches!(
            notification,
            PeerNotification::StateChanged(PeerState::Failed)
        ));
    }
}
