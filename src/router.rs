//! C2: fans a captured `RawFrame` out to whichever consumers are active,
//! enforcing the minimum inter-frame interval ("keep only latest").

use crate::frame::RawFrame;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub frames_dispatched: u64,
    pub frames_dropped_interval: u64,
    pub frames_dropped_no_consumers: u64,
}

/// Dispatches raw frames to the JPEG (C3) and I420 (C4) consumer channels.
/// Distribution itself is zero-copy: consumers receive an `Arc`-wrapped
/// buffer and copy out only what they need, matching the broadcast
/// distribution pattern used elsewhere for frame fan-out.
pub struct FrameRouter {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
    jpeg_tx: broadcast::Sender<Arc<RoutedFrame>>,
    i420_tx: broadcast::Sender<Arc<RoutedFrame>>,
    dispatched: AtomicU64,
    dropped_interval: AtomicU64,
    dropped_no_consumers: AtomicU64,
}

/// An owned snapshot of a `RawFrame`'s planes, cheap to share via `Arc`
/// across the JPEG and I420 consumer tasks.
pub struct RoutedFrame {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub capture_ts_ns: u64,
    pub y: Bytes,
    pub u: Bytes,
    pub v: Bytes,
    pub y_layout: crate::frame::PlaneLayout,
    pub u_layout: crate::frame::PlaneLayout,
    pub v_layout: crate::frame::PlaneLayout,
}

impl From<&RawFrame> for RoutedFrame {
    fn from(f: &RawFrame) -> Self {
        Self {
            width: f.width,
            height: f.height,
            rotation_degrees: f.rotation_degrees,
            capture_ts_ns: f.capture_ts_ns,
            y: f.y.clone(),
            u: f.u.clone(),
            v: f.v.clone(),
            y_layout: f.y_layout,
            u_layout: f.u_layout,
            v_layout: f.v_layout,
        }
    }
}

impl From<&RoutedFrame> for RawFrame {
    fn from(f: &RoutedFrame) -> Self {
        Self {
            width: f.width,
            height: f.height,
            rotation_degrees: f.rotation_degrees,
            capture_ts_ns: f.capture_ts_ns,
            y: f.y.clone(),
            u: f.u.clone(),
            v: f.v.clone(),
            y_layout: f.y_layout,
            u_layout: f.u_layout,
            v_layout: f.v_layout,
        }
    }
}

impl FrameRouter {
    pub fn new(min_interval: Duration, capacity: usize) -> Self {
        let (jpeg_tx, _) = broadcast::channel(capacity);
        let (i420_tx, _) = broadcast::channel(capacity);
        Self {
            min_interval,
            last_dispatch: None,
            jpeg_tx,
            i420_tx,
            dispatched: AtomicU64::new(0),
            dropped_interval: AtomicU64::new(0),
            dropped_no_consumers: AtomicU64::new(0),
        }
    }

    pub fn subscribe_jpeg(&self) -> broadcast::Receiver<Arc<RoutedFrame>> {
        self.jpeg_tx.subscribe()
    }

    pub fn subscribe_i420(&self) -> broadcast::Receiver<Arc<RoutedFrame>> {
        self.i420_tx.subscribe()
    }

    /// Dispatches `frame` to every active consumer, synchronously. Returns
    /// `true` when the frame was dispatched, `false` when it was dropped
    /// (either the minimum interval hasn't elapsed, or no consumer is
    /// attached). The frame is released the moment this call returns.
    pub fn dispatch(&mut self, now: Instant, frame: &RawFrame) -> bool {
        if let Some(last) = self.last_dispatch {
            if now.duration_since(last) < self.min_interval {
                self.dropped_interval.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        if self.jpeg_tx.receiver_count() == 0 && self.i420_tx.receiver_count() == 0 {
            self.dropped_no_consumers.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let routed = Arc::new(RoutedFrame::from(frame));
        // A SendError just means no receiver is currently subscribed on
        // that particular channel; the other channel may still have one.
        let _ = self.jpeg_tx.send(Arc::clone(&routed));
        let _ = self.i420_tx.send(routed);

        self.last_dispatch = Some(now);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            frames_dispatched: self.dispatched.load(Ordering::Relaxed),
            frames_dropped_interval: self.dropped_interval.load(Ordering::Relaxed),
            frames_dropped_no_consumers: self.dropped_no_consumers.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let s = self.stats();
        debug!(
            dispatched = s.frames_dispatched,
            dropped_interval = s.frames_dropped_interval,
            dropped_no_consumers = s.frames_dropped_no_consumers,
            "frame router stats"
        );
    }
}
