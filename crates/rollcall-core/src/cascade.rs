//! SeetaFace funnel-structured cascade detector, backed by `rustface`.

use crate::geometry::FaceCandidate;
use image::{imageops, RgbImage};
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};

/// SeetaFace frontal model, compiled into the binary.
static BUNDLED_MODEL: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/model/seeta_fd_frontal_v1.0.bin"
));

const CASCADE_MIN_FACE_SIZE: u32 = 40;
const CASCADE_SCORE_THRESHOLD: f64 = 2.0;
const CASCADE_PYRAMID_SCALE: f32 = 0.8;
const CASCADE_WINDOW_STEP: u32 = 4;

/// Constant confidence reported for every cascade hit. Cascade scores are
/// unbounded classifier sums, so they are not passed through.
pub const CASCADE_CONFIDENCE: f32 = 0.8;

pub struct FaceCascade {
    model: rustface::Model,
}

impl FaceCascade {
    /// Cascade backed by the bundled SeetaFace model. Needs no files at runtime.
    pub fn bundled() -> Self {
        let model = rustface::read_model(Cursor::new(BUNDLED_MODEL))
            .expect("bundled SeetaFace model is embedded at build time");
        tracing::debug!(bytes = BUNDLED_MODEL.len(), "loaded bundled SeetaFace cascade model");
        Self { model }
    }

    /// Detect frontal faces on the grayscale version of `image`.
    ///
    /// Returns `None` if the underlying detector panicked.
    pub fn detect(&self, image: &RgbImage) -> Option<Vec<FaceCandidate>> {
        let (width, height) = image.dimensions();
        if width.min(height) < CASCADE_MIN_FACE_SIZE {
            return Some(Vec::new());
        }

        let gray = imageops::grayscale(image);
        let model = self.model.clone();

        // rustface asserts on its inputs instead of returning errors.
        panic::catch_unwind(AssertUnwindSafe(move || {
            let mut detector = rustface::create_detector_with_model(model);
            detector.set_min_face_size(CASCADE_MIN_FACE_SIZE);
            detector.set_score_thresh(CASCADE_SCORE_THRESHOLD);
            detector.set_pyramid_scale_factor(CASCADE_PYRAMID_SCALE);
            detector.set_slide_window_step(CASCADE_WINDOW_STEP, CASCADE_WINDOW_STEP);

            detector
                .detect(&rustface::ImageData::new(gray.as_raw(), width, height))
                .iter()
                .map(|face| {
                    let bbox = face.bbox();
                    FaceCandidate {
                        x: bbox.x() as f32,
                        y: bbox.y() as f32,
                        width: bbox.width() as f32,
                        height: bbox.height() as f32,
                        confidence: CASCADE_CONFIDENCE,
                        landmarks: None,
                    }
                })
                .collect()
        }))
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn faces_fixture() -> RgbImage {
        image::open(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/faces.png"))
            .unwrap()
            .to_rgb8()
    }

    #[test]
    fn test_blank_image_has_no_faces() {
        let cascade = FaceCascade::bundled();
        let blank = RgbImage::from_pixel(320, 240, Rgb([200, 200, 200]));
        assert!(cascade.detect(&blank).unwrap().is_empty());
    }

    #[test]
    fn test_small_image_short_circuits() {
        let cascade = FaceCascade::bundled();
        let tiny = RgbImage::from_pixel(30, 200, Rgb([10, 10, 10]));
        assert!(cascade.detect(&tiny).unwrap().is_empty());
    }

    #[test]
    fn test_detects_faces_in_group_photo() {
        let cascade = FaceCascade::bundled();
        let image = faces_fixture();
        let faces = cascade.detect(&image).unwrap();
        assert!(!faces.is_empty());
        for face in &faces {
            assert_eq!(face.confidence, CASCADE_CONFIDENCE);
            assert!(face.landmarks.is_none());
            assert!(face.width > 0.0 && face.height > 0.0);
        }
    }
}
