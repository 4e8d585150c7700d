//! Frame annotation
//!
//! Reassembled payloads are decoded, stamped with a small diagnostic
//! label carrying the frame number, normalized to the delivery
//! resolution, and re-encoded as JPEG before broadcast. A payload that
//! does not decode as an image is discarded by the caller; corrupt
//! frames are expected on a lossy transport and are not an error.
//!
//! The label is drawn with a built-in 3x5 pixel glyph set rather than a
//! font rasterizer; it only ever renders digits and a handful of
//! capital letters.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

/// Width frames are normalized to before broadcast
pub const FRAME_WIDTH: u32 = 640;

/// Height frames are normalized to before broadcast
pub const FRAME_HEIGHT: u32 = 480;

const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEST_LABEL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_SCALE: u32 = 4;

/// Decode a reassembled payload, overlay the frame number, re-encode
///
/// Returns `None` when the payload is not a decodable image; the frame
/// is then dropped silently by the caller.
pub fn annotate_frame(payload: &[u8], frame_num: u32, quality: u8) -> Option<Bytes> {
    let decoded = image::load_from_memory(payload).ok()?;
    let mut frame = normalize(decoded);

    draw_label(
        &mut frame,
        &format!("FRAME {frame_num}"),
        20,
        20,
        LABEL_SCALE,
        LABEL_COLOR,
    );

    encode_jpeg(&frame, quality)
}

/// Synthesize the one-time test frame sent to new video subscribers
///
/// A flat gray image with a centered red label, proving the transport
/// end to end before real frames arrive.
pub fn test_frame(quality: u8) -> Option<Bytes> {
    let mut frame = RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([128, 128, 128]));

    let text = "TEST FRAME";
    let width = text_width(text, LABEL_SCALE);
    let x = (FRAME_WIDTH.saturating_sub(width)) / 2;
    let y = FRAME_HEIGHT / 2 - GLYPH_H * LABEL_SCALE / 2;
    draw_label(&mut frame, text, x, y, LABEL_SCALE, TEST_LABEL_COLOR);

    encode_jpeg(&frame, quality)
}

fn normalize(decoded: DynamicImage) -> RgbImage {
    let rgb = decoded.to_rgb8();
    if rgb.dimensions() == (FRAME_WIDTH, FRAME_HEIGHT) {
        rgb
    } else {
        image::imageops::resize(&rgb, FRAME_WIDTH, FRAME_HEIGHT, FilterType::Triangle)
    }
}

fn encode_jpeg(frame: &RgbImage, quality: u8) -> Option<Bytes> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    match encoder.encode_image(frame) {
        Ok(()) => Some(Bytes::from(out)),
        Err(e) => {
            tracing::debug!(error = %e, "JPEG encode failed");
            None
        }
    }
}

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;

/// 3x5 bitmap glyphs, one row per byte, low three bits used
fn glyph(c: char) -> [u8; 5] {
    match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'E' => [0b111, 0b100, 0b111, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b111, 0b100, 0b100],
        'M' => [0b101, 0b111, 0b101, 0b101, 0b101],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        _ => [0; 5],
    }
}

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * (GLYPH_W + 1) * scale
}

fn draw_label(frame: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let (width, height) = frame.dimensions();
    let mut pen_x = x;

    for c in text.chars() {
        let rows = glyph(c.to_ascii_uppercase());
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = pen_x + col * scale + dx;
                        let py = y + row as u32 * scale + dy;
                        if px < width && py < height {
                            frame.put_pixel(px, py, color);
                        }
                    }
                }
            }
        }
        pen_x += (GLYPH_W + 1) * scale;
    }
}

/// True if the bytes start with a JPEG start-of-image marker
pub fn looks_like_jpeg(payload: &[u8]) -> bool {
    payload.starts_with(&[0xFF, 0xD8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    #[test]
    fn test_test_frame_is_decodable_jpeg() {
        let jpeg = test_frame(70).expect("synthetic frame must encode");

        assert!(looks_like_jpeg(&jpeg));
        let decoded =
            image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), FRAME_WIDTH);
        assert_eq!(decoded.height(), FRAME_HEIGHT);
    }

    #[test]
    fn test_annotate_roundtrip() {
        let source = test_frame(90).unwrap();

        let annotated = annotate_frame(&source, 17, 70).expect("valid JPEG must annotate");
        assert!(looks_like_jpeg(&annotated));

        let decoded = image::load_from_memory(&annotated).unwrap();
        assert_eq!(decoded.width(), FRAME_WIDTH);
        assert_eq!(decoded.height(), FRAME_HEIGHT);
    }

    #[test]
    fn test_annotate_rejects_garbage() {
        assert!(annotate_frame(b"definitely not an image", 1, 70).is_none());
        assert!(annotate_frame(&[], 1, 70).is_none());
    }

    #[test]
    fn test_label_changes_pixels() {
        let mut labeled = RgbImage::from_pixel(64, 32, Rgb([0, 0, 0]));
        draw_label(&mut labeled, "8", 2, 2, 2, Rgb([255, 255, 255]));

        let lit = labeled.pixels().filter(|p| p.0 != [0, 0, 0]).count();
        assert!(lit > 0, "glyph drawing must touch pixels");
    }

    #[test]
    fn test_label_clipped_at_edges() {
        let mut frame = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        // Pen starts near the edge; drawing must not panic
        draw_label(&mut frame, "888", 6, 6, 2, Rgb([255, 255, 255]));
    }
}
