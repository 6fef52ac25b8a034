//! Image preprocessing for detection and recognition

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};

use super::FaceRect;

/// Decode uploaded bytes into an 8-bit grayscale image, EXIF orientation applied
pub fn decode_grayscale(data: &[u8]) -> Result<GrayImage> {
    let image = decode_image(data)?;
    Ok(image.to_luma8())
}

/// Decode image from bytes with EXIF orientation handling
/// This ensures images are correctly oriented regardless of how they were captured
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data).context("Failed to decode image")?;

    Ok(apply_exif_orientation(data, image))
}

/// Copy the face region out of the frame
pub fn crop_face(image: &GrayImage, rect: &FaceRect) -> GrayImage {
    image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Apply EXIF orientation to correct image rotation
/// Mobile phones often store images with EXIF orientation tags instead of rotating pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // See https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}
