//! C4: RawFrame -> I420Frame, cropped/scaled to the streaming resolution.

use crate::frame::{I420Frame, PlaneLayout, RawFrame};
use crate::planes::copy_plane;
use bytes::Bytes;

pub struct I420ConverterConfig {
    pub target_width: u32,
    pub target_height: u32,
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Nearest-neighbor resample of one tightly packed plane from
/// `(src_w, src_h)` to `(dst_w, dst_h)`.
fn resample_plane(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    if src_w == dst_w && src_h == dst_h {
        return src.to_vec();
    }
    let mut out = vec![0u8; dst_w * dst_h];
    for row in 0..dst_h {
        let src_row = (row * src_h / dst_h.max(1)).min(src_h.saturating_sub(1));
        for col in 0..dst_w {
            let src_col = (col * src_w / dst_w.max(1)).min(src_w.saturating_sub(1));
            out[row * dst_w + col] = src[src_row * src_w + src_col];
        }
    }
    out
}

/// Converts a `RawFrame` into a stride-correct `I420Frame`, copying each
/// plane with the three-case logic in [`crate::planes`] and then
/// resampling to `cfg.target_{width,height}` when the source doesn't
/// already match (§4.4).
pub fn to_i420(frame: &RawFrame, cfg: &I420ConverterConfig) -> I420Frame {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let cw = w / 2;
    let ch = h / 2;

    let y = copy_plane(&frame.y, frame.y_layout, w, h);
    let u = copy_plane(&frame.u, frame.u_layout, cw, ch);
    let v = copy_plane(&frame.v, frame.v_layout, cw, ch);

    let target_w = cfg.target_width as usize;
    let target_h = cfg.target_height as usize;
    let target_cw = target_w / 2;
    let target_ch = target_h / 2;

    let (y, u, v) = if w == target_w && h == target_h {
        (y, u, v)
    } else {
        (
            resample_plane(&y, w, h, target_w, target_h),
            resample_plane(&u, cw, ch, target_cw, target_ch),
            resample_plane(&v, cw, ch, target_cw, target_ch),
        )
    };

    I420Frame {
        width: cfg.target_width,
        height: cfg.target_height,
        rotation_degrees: 0,
        timestamp_ns: now_ns(),
        y: Bytes::from(y),
        u: Bytes::from(u),
        v: Bytes::from(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32) -> RawFrame {
        let w = width as usize;
        let h = height as usize;
        let cw = w / 2;
        let ch = h / 2;
        RawFrame {
            width,
            height,
            rotation_degrees: 0,
            capture_ts_ns: 1,
            y: Bytes::from(vec![16u8; w * h]),
            u: Bytes::from(vec![128u8; cw * ch]),
            v: Bytes::from(vec![128u8; cw * ch]),
            y_layout: PlaneLayout::tight(w),
            u_layout: PlaneLayout::tight(cw),
            v_layout: PlaneLayout::tight(cw),
        }
    }

    #[test]
    fn output_plane_sizes_match_target() {
        let frame = solid_frame(640, 480);
        let cfg = I420ConverterConfig {
            target_width: 320,
            target_height: 240,
        };
        let out = to_i420(&frame, &cfg);
        assert_eq!(out.y.len(), 320 * 240);
        assert_eq!(out.u.len(), 160 * 120);
        assert_eq!(out.v.len(), 160 * 120);
        assert_eq!(out.rotation_degrees, 0);
    }

    #[test]
    fn no_resample_when_already_target_size() {
        let frame = solid_frame(320, 240);
        let cfg = I420ConverterConfig {
            target_width: 320,
            target_height: 240,
        };
        let out = to_i420(&frame, &cfg);
        assert!(out.y.iter().all(|&b| b == 16));
    }
}
