//! Raw model boxes, non-maximum suppression, and conversion to pixel boxes.

use crate::types::FaceBox;

/// Float-precision face box as decoded from a model, before clamping.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceCandidate {
    /// Clamp to the image and round to integer pixels.
    ///
    /// Returns `None` when nothing of the box survives inside the image.
    pub fn to_face_box(&self, image_width: u32, image_height: u32) -> Option<FaceBox> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return None;
        }
        let x_min = self.x.floor().clamp(0.0, image_width as f32) as i32;
        let y_min = self.y.floor().clamp(0.0, image_height as f32) as i32;
        let x_max = (self.x + self.width).ceil().clamp(0.0, image_width as f32) as i32;
        let y_max = (self.y + self.height).ceil().clamp(0.0, image_height as f32) as i32;

        if x_max > x_min && y_max > y_min {
            Some(FaceBox { x_min, y_min, x_max, y_max })
        } else {
            None
        }
    }
}

/// Non-Maximum Suppression: remove overlapping detections.
pub fn nms(mut detections: Vec<FaceCandidate>, iou_threshold: f32) -> Vec<FaceCandidate> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two boxes.
pub fn iou(a: &FaceCandidate, b: &FaceCandidate) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
