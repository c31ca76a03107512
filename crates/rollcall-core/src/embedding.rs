//! Pixel embedding fallback for strategies that only localize faces.
//!
//! Crop, resize to a fixed square canvas, scale to [0, 1], flatten. Sensitive
//! to pose, lighting and crop tightness, so scores run well below ArcFace.

use crate::types::{Embedding, FaceBox};
use image::imageops::{self, FilterType};
use image::RgbImage;

pub const FALLBACK_INPUT_SIZE: u32 = 128;
pub const FALLBACK_MODEL_VERSION: &str = "pixel-128x128";

/// Build a pixel embedding of `face` at the default 128×128 canvas.
pub fn simple_embedding(image: &RgbImage, face: &FaceBox) -> Embedding {
    simple_embedding_sized(image, face, FALLBACK_INPUT_SIZE)
}

/// Build a pixel embedding of `face` on a `size`×`size` canvas.
///
/// The output is row-major, channel-last, of length `size * size * 3`.
/// The box is clamped to the image first; an empty crop yields a zero vector.
pub fn simple_embedding_sized(image: &RgbImage, face: &FaceBox, size: u32) -> Embedding {
    let len = (size * size * 3) as usize;
    let tag = model_version_for(size);

    let x0 = face.x_min.max(0) as u32;
    let y0 = face.y_min.max(0) as u32;
    let x1 = (face.x_max.max(0) as u32).min(image.width());
    let y1 = (face.y_max.max(0) as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 || size == 0 {
        return Embedding::new(vec![0.0; len], tag);
    }

    let crop = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    let resized = imageops::resize(&crop, size, size, FilterType::Triangle);

    let values: Vec<f32> = resized.as_raw().iter().map(|&p| p as f32 / 255.0).collect();
    debug_assert_eq!(values.len(), len);

    Embedding::new(values, tag)
}

fn model_version_for(size: u32) -> String {
    if size == FALLBACK_INPUT_SIZE {
        FALLBACK_MODEL_VERSION.to_string()
    } else {
        format!("pixel-{size}x{size}")
    }
}
