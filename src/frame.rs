//! Core frame types shared by the capture, conversion, and transport stages.

use bytes::Bytes;

/// Row- and pixel-stride for one plane of a captured frame. A stride equal
/// to the plane width with `pixel_stride == 1` means no padding at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl PlaneLayout {
    pub fn tight(width: usize) -> Self {
        Self {
            row_stride: width,
            pixel_stride: 1,
        }
    }
}

/// One captured YUV frame, as handed from the camera to the router.
///
/// Single-reader semantics: a `RawFrame` is borrowed for the duration of one
/// dispatch call and must not be retained past it. Consumers that need the
/// pixel data afterward copy it before the dispatch call returns.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub capture_ts_ns: u64,
    pub y: Bytes,
    pub u: Bytes,
    pub v: Bytes,
    pub y_layout: PlaneLayout,
    pub u_layout: PlaneLayout,
    pub v_layout: PlaneLayout,
}

impl RawFrame {
    /// `true` when every plane is laid out with no row padding and no pixel
    /// interleave — the fast bulk-copy case in §4.3/§4.4's three-case logic.
    pub fn is_tight(&self) -> bool {
        let chroma_w = (self.width / 2) as usize;
        self.y_layout == PlaneLayout::tight(self.width as usize)
            && self.u_layout == PlaneLayout::tight(chroma_w)
            && self.v_layout == PlaneLayout::tight(chroma_w)
    }
}

/// A compressed JPEG image ready for fallback transport.
#[derive(Debug, Clone)]
pub struct EncodedJpeg {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

/// A planar I420 (4:2:0) frame with no row padding, ready for injection into
/// the outgoing WebRTC video track.
#[derive(Debug, Clone)]
pub struct I420Frame {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub timestamp_ns: u64,
    pub y: Bytes,
    pub u: Bytes,
    pub v: Bytes,
}

impl I420Frame {
    pub fn y_size(width: u32, height: u32) -> usize {
        (width * height) as usize
    }

    pub fn chroma_size(width: u32, height: u32) -> usize {
        ((width / 2) * (height / 2)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_layout_matches_plain_width() {
        let layout = PlaneLayout::tight(320);
        assert_eq!(layout.row_stride, 320);
        assert_eq!(layout.pixel_stride, 1);
    }

    #[test]
    fn is_tight_detects_padded_row_stride() {
        let frame = RawFrame {
            width: 320,
            height: 240,
            rotation_degrees: 0,
            capture_ts_ns: 1,
            y: Bytes::from(vec![0u8; 352 * 240]),
            u: Bytes::from(vec![0u8; 160 * 120]),
            v: Bytes::from(vec![0u8; 160 * 120]),
            y_layout: PlaneLayout {
                row_stride: 352,
                pixel_stride: 1,
            },
            u_layout: PlaneLayout::tight(160),
            v_layout: PlaneLayout::tight(160),
        };
        assert!(!frame.is_tight());
    }
}
