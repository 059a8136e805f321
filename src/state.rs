//! Enumerated lifecycle states and their legal transitions.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("illegal transition: {from:?} -> {event}")]
pub struct TransitionError {
    pub from: &'static str,
    pub event: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lens {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    PreviewOnly,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Offering,
    AwaitingAnswer,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    CreateOffer,
    OfferCreated,
    AnswerReceived,
    IceCandidateLocal,
    IceCandidateRemote,
    ConnectionEstablished,
    ConnectionFailed,
    Close,
}

impl PeerState {
    /// Applies the transition table of §4.5. Events that carry "(no
    /// change)" as their target leave the state untouched.
    pub fn apply(self, event: PeerEvent) -> Result<Self, TransitionError> {
        use PeerEvent::*;
        use PeerState::*;
        let next = match (self, event) {
            (Idle, CreateOffer) => Offering,
            (Offering, OfferCreated) => AwaitingAnswer,
            (AwaitingAnswer, AnswerReceived) => AwaitingAnswer,
            (_, IceCandidateLocal) => self,
            (_, IceCandidateRemote) => self,
            (AwaitingAnswer, ConnectionEstablished) => Connected,
            (_, ConnectionFailed) => Failed,
            (_, Close) => Closed,
            _ => {
                return Err(TransitionError {
                    from: state_name(self),
                    event: event_name(event),
                })
            }
        };
        Ok(next)
    }
}

fn state_name(s: PeerState) -> &'static str {
    match s {
        PeerState::Idle => "Idle",
        PeerState::Offering => "Offering",
        PeerState::AwaitingAnswer => "AwaitingAnswer",
        PeerState::Connected => "Connected",
        PeerState::Failed => "Failed",
        PeerState::Closed => "Closed",
    }
}

fn event_name(e: PeerEvent) -> &'static str {
    match e {
        PeerEvent::CreateOffer => "create_offer",
        PeerEvent::OfferCreated => "offer_created",
        PeerEvent::AnswerReceived => "answer_received",
        PeerEvent::IceCandidateLocal => "ice_candidate_local",
        PeerEvent::IceCandidateRemote => "ice_candidate_remote",
        PeerEvent::ConnectionEstablished => "connection_established",
        PeerEvent::ConnectionFailed => "connection_failed",
        PeerEvent::Close => "close",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    WaitingForCamera,
    ServerUp,
    PeerNegotiating,
    StreamingWebRTC,
    StreamingFallback,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Start,
    CameraReady,
    SinkWebSocketOpened,
    SinkWebSocketOpenedPeerInitFailed,
    PeerConnected,
    PeerFailed,
    IceTimeout,
    Stop,
    Drained,
}

impl PipelineState {
    pub fn apply(self, event: PipelineEvent) -> Result<Self, TransitionError> {
        use PipelineEvent::*;
        use PipelineState::*;
        let next = match (self, event) {
            (Stopped, Start) => Starting,
            (Starting, CameraReady) => ServerUp,
            (ServerUp, SinkWebSocketOpened) => PeerNegotiating,
            (ServerUp, SinkWebSocketOpenedPeerInitFailed) => StreamingFallback,
            (PeerNegotiating, PeerConnected) => StreamingWebRTC,
            (PeerNegotiating, PeerFailed) => StreamingFallback,
            (PeerNegotiating, IceTimeout) => StreamingFallback,
            (s, Stop) if s != Stopped => Stopping,
            (Stopping, Drained) => Stopped,
            _ => {
                return Err(TransitionError {
                    from: pipeline_state_name(self),
                    event: pipeline_event_name(event),
                })
            }
        };
        Ok(next)
    }
}

fn pipeline_state_name(s: PipelineState) -> &'static str {
    match s {
        PipelineState::Stopped => "Stopped",
        PipelineState::Starting => "Starting",
        PipelineState::WaitingForCamera => "WaitingForCamera",
        PipelineState::ServerUp => "ServerUp",
        PipelineState::PeerNegotiating => "PeerNegotiating",
        PipelineState::StreamingWebRTC => "StreamingWebRTC",
        PipelineState::StreamingFallback => "StreamingFallback",
        PipelineState::Stopping => "Stopping",
    }
}

fn pipeline_event_name(e: PipelineEvent) -> &'static str {
    match e {
        PipelineEvent::Start => "start",
        PipelineEvent::CameraReady => "camera_ready",
        PipelineEvent::SinkWebSocketOpened => "sink_websocket_opened",
        PipelineEvent::SinkWebSocketOpenedPeerInitFailed => {
            "sink_websocket_opened(peer init fails)"
        }
        PipelineEvent::PeerConnected => "peer_connected",
        PipelineEvent::PeerFailed => "peer_failed",
        PipelineEvent::IceTimeout => "ice_timeout",
        PipelineEvent::Stop => "stop",
        PipelineEvent::Drained => "drained",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_happy_path() {
        let s = PeerState::Idle;
        let s = s.apply(PeerEvent::CreateOffer).unwrap();
        assert_eq!(s, PeerState::Offering);
        let s = s.apply(PeerEvent::OfferCreated).unwrap();
        assert_eq!(s, PeerState::AwaitingAnswer);
        let s = s.apply(PeerEvent::AnswerReceived).unwrap();
        assert_eq!(s, PeerState::AwaitingAnswer);
        let s = s.apply(PeerEvent::ConnectionEstablished).unwrap();
        assert_eq!(s, PeerState::Connected);
    }

    #[test]
    fn peer_failure_from_any_state() {
        assert_eq!(
            PeerState::Connected
                .apply(PeerEvent::ConnectionFailed)
                .unwrap(),
            PeerState::Failed
        );
    }

    #[test]
    fn peer_illegal_transition_rejected() {
        assert!(PeerState::Idle.apply(PeerEvent::OfferCreated).is_err());
    }

    #[test]
    fn pipeline_happy_path_to_webrtc() {
        let s = PipelineState::Stopped;
        let s = s.apply(PipelineEvent::Start).unwrap();
        let s = s.apply(PipelineEvent::CameraReady).unwrap();
        assert_eq!(s, PipelineState::ServerUp);
        let s = s.apply(PipelineEvent::SinkWebSocketOpened).unwrap();
        assert_eq!(s, PipelineState::PeerNegotiating);
        let s = s.apply(PipelineEvent::PeerConnected).unwrap();
        assert_eq!(s, PipelineState::StreamingWebRTC);
    }

    #[test]
    fn pipeline_degrades_to_fallback_on_peer_failure() {
        let s = PipelineState::PeerNegotiating;
        assert_eq!(
            s.apply(PipelineEvent::PeerFailed).unwrap(),
            PipelineState::StreamingFallback
        );
        assert_eq!(
            s.apply(PipelineEvent::IceTimeout).unwrap(),
            PipelineState::StreamingFallback
        );
    }

    #[test]
    fn stop_is_reachable_from_any_non_stopped_state() {
        for s in [
            PipelineState::Starting,
            PipelineState::ServerUp,
            PipelineState::PeerNegotiating,
            PipelineState::StreamingWebRTC,
            PipelineState::StreamingFallback,
        ] {
            assert_eq!(
                s.apply(PipelineEvent::Stop).unwrap(),
                PipelineState::Stopping
            );
        }
        assert!(PipelineState::Stopped.apply(PipelineEvent::Stop).is_err());
    }
}
