use std::io::Cursor;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};

use crate::error::MediaError;

/// Decode uploaded image bytes (format sniffed from content) to RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(MediaError::invalid_media("empty image upload").into());
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| MediaError::invalid_media(format!("undecodable image: {e}")))?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(|e| MediaError::io(format!("jpeg encode failed: {e}")))
        .context("encode annotated image")?;
    Ok(buf)
}

/// Resize to exactly `width` x `height`; a no-op copy when already that size.
pub fn resize_exact(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    image::imageops::resize(image, width, height, FilterType::Triangle)
}
