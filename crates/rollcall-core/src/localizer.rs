//! UltraFace (RFB-320) general-purpose face localizer via ONNX Runtime.
//!
//! Produces bounding boxes only; no landmarks and no native embedding.

use crate::detector::DetectorError;
use crate::geometry::{nms, FaceCandidate};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ULTRAFACE_INPUT_WIDTH: u32 = 320;
const ULTRAFACE_INPUT_HEIGHT: u32 = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;
const ULTRAFACE_TOP_K: usize = 20;
/// Class index of "face" in the [background, face] score pair.
const ULTRAFACE_FG_IDX: usize = 1;

/// UltraFace-based face localizer.
pub struct FaceLocalizer {
    session: Session,
    /// (scores, boxes) output indices.
    output_indices: (usize, usize),
    min_confidence: f32,
}

impl FaceLocalizer {
    /// Load the UltraFace ONNX model. Faces scoring below `min_confidence` are discarded.
    pub fn load(model_path: &str, min_confidence: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let output_indices = match (
            output_names.iter().position(|n| n == "scores"),
            output_names.iter().position(|n| n == "boxes"),
        ) {
            (Some(s), Some(b)) => (s, b),
            _ => (0, 1),
        };

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            min_confidence,
            "loaded UltraFace model"
        );

        Ok(Self {
            session,
            output_indices,
            min_confidence,
        })
    }

    /// Locate faces in a color image, returning candidates sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceCandidate>, DetectorError> {
        let input = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (scores_idx, boxes_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(scores, boxes, image.width(), image.height(), self.min_confidence);
        let mut kept = nms(candidates, ULTRAFACE_NMS_THRESHOLD);
        kept.truncate(ULTRAFACE_TOP_K);
        Ok(kept)
    }
}

/// Stretch-resize to 320×240 and normalize into a NCHW tensor.
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
        image,
        ULTRAFACE_INPUT_WIDTH,
        ULTRAFACE_INPUT_HEIGHT,
        FilterType::Triangle,
    );
    Array4::from_shape_fn(
        (1, 3, ULTRAFACE_INPUT_HEIGHT as usize, ULTRAFACE_INPUT_WIDTH as usize),
        |(_, c, y, x)| {
            (resized.get_pixel(x as u32, y as u32)[c] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD
        },
    )
}

/// Decode `[N, 2]` scores and `[N, 4]` normalized corner boxes into image space.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    image_width: u32,
    image_height: u32,
    min_confidence: f32,
) -> Vec<FaceCandidate> {
    let (w, h) = (image_width as f32, image_height as f32);

    scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(s, _)| s[ULTRAFACE_FG_IDX] >= min_confidence)
        .map(|(s, b)| {
            let x1 = b[0].clamp(0.0, 1.0) * w;
            let y1 = b[1].clamp(0.0, 1.0) * h;
            let x2 = b[2].clamp(0.0, 1.0) * w;
            let y2 = b[3].clamp(0.0, 1.0) * h;
            FaceCandidate {
                x: x1,
                y: y1,
                width: (x2 - x1).max(0.0),
                height: (y2 - y1).max(0.0),
                confidence: s[ULTRAFACE_FG_IDX],
                landmarks: None,
            }
        })
        .collect()
}
