#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use s3_webp_converter::services::storage::MemoryObjectStore;
use s3_webp_converter::services::transcoder::WebpTranscoder;
use s3_webp_converter::{ConverterConfig, Pipeline};
use std::io::Cursor;
use std::sync::Arc;

pub fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format)
        .expect("encode test image");
    out
}

/// Opaque gradient, so the lossy encoder has something to do.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

/// Half-transparent pixels; fully opaque alpha would be dropped by the encoder.
pub fn png_with_alpha(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 200, if (x + y) % 2 == 0 { 0 } else { 128 }])
    });
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

pub fn setup_pipeline(store: Arc<MemoryObjectStore>, config: ConverterConfig) -> Pipeline {
    let _ = tracing_subscriber::fmt::try_init();
    Pipeline::new(config, store, Arc::new(WebpTranscoder::new())).expect("valid config")
}
