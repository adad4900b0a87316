//! Perceptual fingerprinting (difference hash)
//!
//! Each image is decoded once, converted to grayscale and reduced to three
//! grids (8, 16 and 32 rows). Every pixel is compared with its right-hand
//! neighbour and the resulting bits are packed MSB-first into a hex string.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid hash size {0}: must be a positive multiple of 2")]
    InvalidSize(u32),
}

pub type FingerprintResult<T> = Result<T, FingerprintError>;

const SUPPORTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Gif];

/// The three fingerprint widths stored for every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub hash16: String,
    pub hash64: String,
    pub hash256: String,
}

fn decode(image_bytes: &[u8]) -> FingerprintResult<DynamicImage> {
    let format = image::guess_format(image_bytes)?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(FingerprintError::UnsupportedFormat(format!("{:?}", format)));
    }
    Ok(image::load_from_memory_with_format(image_bytes, format)?)
}

/// dhash of an already decoded grayscale image.
fn dhash(gray: &GrayImage, size: u32) -> FingerprintResult<String> {
    // size*size must be a whole number of bytes
    if size == 0 || (size * size) % 8 != 0 {
        return Err(FingerprintError::InvalidSize(size));
    }

    let resized = image::imageops::resize(gray, size + 1, size, FilterType::Lanczos3);

    let mut bytes = Vec::with_capacity((size * size / 8) as usize);
    let mut current = 0u8;
    let mut filled = 0;
    for row in 0..size {
        for col in 0..size {
            let left = resized.get_pixel(col, row).0[0];
            let right = resized.get_pixel(col + 1, row).0[0];
            current = (current << 1) | u8::from(left > right);
            filled += 1;
            if filled == 8 {
                bytes.push(current);
                current = 0;
                filled = 0;
            }
        }
    }

    Ok(hex::encode(bytes))
}

/// Fingerprint raw image bytes at a single grid size.
pub fn fingerprint(image_bytes: &[u8], size: u32) -> FingerprintResult<String> {
    let gray = decode(image_bytes)?.to_luma8();
    dhash(&gray, size)
}

/// Fingerprint raw image bytes at all three stored widths.
pub fn fingerprint_all(image_bytes: &[u8]) -> FingerprintResult<Fingerprints> {
    let gray = decode(image_bytes)?.to_luma8();
    Ok(Fingerprints {
        hash16: dhash(&gray, 8)?,
        hash64: dhash(&gray, 16)?,
        hash256: dhash(&gray, 32)?,
    })
}

/// An all-zero hash marks a blank or broken decode and is never matched.
pub fn is_blank(hash: &str) -> bool {
    !hash.is_empty() && hash.bytes().all(|b| b == b'0')
}
