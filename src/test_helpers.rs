//! Shared test utilities: synthetic image payloads.
//!
//! Tests never ship binary fixtures; every image is encoded on the fly from
//! a generated gradient so dimensions and formats are exactly what the test
//! asked for.

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, Frame, ImageEncoder, RgbImage, RgbaImage};
use std::io::Cursor;

/// A small gradient so encoders have real detail to work with.
fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

/// Encode a synthetic JPEG with the given dimensions.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut buf = Vec::new();
    JpegEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// Encode a synthetic PNG with the given dimensions.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// Encode a synthetic GIF. `frames > 1` yields an animated file.
pub fn gif_bytes(width: u32, height: u32, frames: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = GifEncoder::new(&mut buf);
        for i in 0..frames {
            let frame = RgbaImage::from_fn(width, height, |x, y| {
                image::Rgba([(x % 256) as u8, (y % 256) as u8, (i * 40) as u8, 255])
            });
            encoder.encode_frame(Frame::new(frame)).unwrap();
        }
    }
    buf.into_inner()
}
