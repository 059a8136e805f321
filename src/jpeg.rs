//! C3: YUV -> scaled JPEG for fallback streaming.

use crate::error::FrameError;
use crate::frame::{EncodedJpeg, RawFrame};
use crate::planes::copy_plane;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgb};
use tracing::warn;

pub struct JpegEncoderConfig {
    pub quality: u8,
    pub target_width: u32,
    pub target_height: u32,
}

/// Interleaves a `RawFrame`'s U/V planes into an NV21-style buffer
/// (`y` followed by interleaved `v`, `u`), using the same three-case
/// stride logic named in §4.3/§4.4.
fn to_nv21(frame: &RawFrame) -> Vec<u8> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let cw = w / 2;
    let ch = h / 2;

    let y = copy_plane(&frame.y, frame.y_layout, w, h);
    let u = copy_plane(&frame.u, frame.u_layout, cw, ch);
    let v = copy_plane(&frame.v, frame.v_layout, cw, ch);

    let mut nv21 = Vec::with_capacity(w * h + cw * ch * 2);
    nv21.extend_from_slice(&y);
    for i in 0..(cw * ch) {
        nv21.push(v[i]);
        nv21.push(u[i]);
    }
    nv21
}

fn nv21_to_rgb(nv21: &[u8], width: u32, height: u32) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = &nv21[..w * h];
    let vu_plane = &nv21[w * h..];

    let mut img = ImageBuffer::new(width, height);
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col] as f32;
            let uv_row = row / 2;
            let uv_col = col / 2;
            let vu_idx = (uv_row * (w / 2) + uv_col) * 2;
            let v = vu_plane[vu_idx] as f32 - 128.0;
            let u = vu_plane[vu_idx + 1] as f32 - 128.0;

            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            img.put_pixel(col as u32, row as u32, Rgb([r, g, b]));
        }
    }
    img
}

fn encode_rgb(img: &ImageBuffer<Rgb<u8>, Vec<u8>>, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| FrameError::JpegEncode(e.to_string()))?;
    Ok(out)
}

/// Runs the algorithm of §4.3: interleave, encode at source size, and (if
/// the source exceeds the target bounds) decode-resample-reencode once.
pub fn encode_jpeg(frame: &RawFrame, cfg: &JpegEncoderConfig) -> Result<EncodedJpeg, FrameError> {
    let nv21 = to_nv21(frame);
    let rgb = nv21_to_rgb(&nv21, frame.width, frame.height);
    let first_pass = encode_rgb(&rgb, cfg.quality)?;

    if frame.width <= cfg.target_width && frame.height <= cfg.target_height {
        return Ok(EncodedJpeg {
            bytes: Bytes::from(first_pass),
            width: frame.width,
            height: frame.height,
            quality: cfg.quality,
        });
    }

    let decoded = image::load_from_memory(&first_pass)
        .map_err(|e| FrameError::JpegDecode(e.to_string()))?;
    let scale = (cfg.target_width as f32 / frame.width as f32)
        .min(cfg.target_height as f32 / frame.height as f32);
    let new_w = ((frame.width as f32 * scale).round() as u32).max(1);
    let new_h = ((frame.height as f32 * scale).round() as u32).max(1);
    let resized = DynamicImage::from(decoded).resize_exact(new_w, new_h, FilterType::Triangle);
    let second_pass = encode_rgb(&resized.to_rgb8(), cfg.quality)?;

    Ok(EncodedJpeg {
        bytes: Bytes::from(second_pass),
        width: new_w,
        height: new_h,
        quality: cfg.quality,
    })
}

/// Encodes a frame, logging and dropping it on failure per §4.3/§7
/// ("encoding failures are logged and the frame is dropped; they are not
/// fatal").
pub fn encode_jpeg_or_drop(frame: &RawFrame, cfg: &JpegEncoderConfig) -> Option<EncodedJpeg> {
    match encode_jpeg(frame, cfg) {
        Ok(jpeg) => Some(jpeg),
        Err(e) => {
            warn!(error = %e, "dropping frame: jpeg encode failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PlaneLayout;

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
            y: Bytes::from(vec![128u8; w * h]),
            u: Bytes::from(vec![128u8; cw * ch]),
            v: Bytes::from(vec![128u8; cw * ch]),
            y_layout: PlaneLayout::tight(w),
            u_layout: PlaneLayout::tight(cw),
            v_layout: PlaneLayout::tight(cw),
        }
    }

    #[test]
    fn fast_path_when_already_within_target() {
        let frame = solid_frame(320, 240);
        let cfg = JpegEncoderConfig {
            quality: 45,
            target_width: 320,
            target_height: 240,
        };
        let jpeg = encode_jpeg(&frame, &cfg).unwrap();
        assert_eq!(jpeg.width, 320);
        assert_eq!(jpeg.height, 240);
    }

    #[test]
    fn scales_down_larger_sources() {
        let frame = solid_frame(640, 480);
        let cfg = JpegEncoderConfig {
            quality: 45,
            target_width: 320,
            target_height: 240,
        };
        let jpeg = encode_jpeg(&frame, &cfg).unwrap();
        assert_eq!(jpeg.width, 320);
        assert_eq!(jpeg.height, 240);
    }

    #[test]
    fn odd_row_stride_decodes_without_panicking() {
        // Y row_stride padded to 352 at width 320 (§8 scenario 6).
        let w = 320usize;
        let h = 240usize;
        let mut y = vec![128u8; 352 * h];
        for row in 0..h {
            y[row * 352..row * 352 + w].fill(200);
        }
        let frame = RawFrame {
            width: w as u32,
            height: h as u32,
            rotation_degrees: 0,
            capture_ts_ns: 1,
            y: Bytes::from(y),
            u: Bytes::from(vec![128u8; (w / 2) * (h / 2)]),
            v: Bytes::from(vec![128u8; (w / 2) * (h / 2)]),
            y_layout: PlaneLayout {
                row_stride: 352,
                pixel_stride: 1,
            },
            u_layout: PlaneLayout::tight(w / 2),
            v_layout: PlaneLayout::tight(w / 2),
        };
        let cfg = JpegEncoderConfig {
            quality: 45,
            target_width: 320,
            target_height: 240,
        };
        let jpeg = encode_jpeg(&frame, &cfg).unwrap();
        assert_eq!(jpeg.width, 320);
        assert_eq!(jpeg.height, 240);
    }
}
