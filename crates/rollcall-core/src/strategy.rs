//! Interchangeable face detection strategies.
//!
//! Exactly one strategy backs a [`crate::FaceEngine`]. Ranked by quality:
//! face analysis (SCRFD + ArcFace), localizer (UltraFace + pixel embedding),
//! cascade (SeetaFace + pixel embedding).

use crate::cascade::FaceCascade;
use crate::detector::{DetectorError, FaceDetector};
use crate::embedding::simple_embedding_sized;
use crate::geometry::FaceCandidate;
use crate::localizer::FaceLocalizer;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Detection, Embedding};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0} runtime lock poisoned")]
    Poisoned(StrategyKind),
    #[error("cascade detector aborted")]
    CascadeAborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    FaceAnalysis,
    Localizer,
    Cascade,
}

impl StrategyKind {
    /// All strategies, highest quality first.
    pub const PRIORITY: [StrategyKind; 3] = [
        StrategyKind::FaceAnalysis,
        StrategyKind::Localizer,
        StrategyKind::Cascade,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::FaceAnalysis => "face-analysis",
            StrategyKind::Localizer => "localizer",
            StrategyKind::Cascade => "cascade",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StrategyKind::FaceAnalysis => "SCRFD + ArcFace",
            StrategyKind::Localizer => "UltraFace + pixel embedding",
            StrategyKind::Cascade => "SeetaFace cascade + pixel embedding",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A face detection capability: image in, detections out.
///
/// Implementations must be callable concurrently through `&self`.
pub trait DetectionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, StrategyError>;
}

/// SCRFD detection with landmarks, aligned ArcFace embedding per face.
pub struct FaceAnalysisStrategy {
    models: Mutex<(FaceDetector, FaceRecognizer)>,
}

impl FaceAnalysisStrategy {
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, StrategyError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self {
            models: Mutex::new((detector, recognizer)),
        })
    }
}

impl DetectionStrategy for FaceAnalysisStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FaceAnalysis
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, StrategyError> {
        let mut guard = self
            .models
            .lock()
            .map_err(|_| StrategyError::Poisoned(self.kind()))?;
        let (detector, recognizer) = &mut *guard;

        let candidates = detector.detect(image)?;
        Ok(with_recognizer_embeddings(image, candidates, |img, landmarks| {
            recognizer.extract(img, landmarks)
        }))
    }
}

/// Attach a recognizer embedding to each candidate. A face whose embedding
/// fails is logged and skipped; the rest of the frame is kept.
fn with_recognizer_embeddings<F>(
    image: &RgbImage,
    candidates: Vec<FaceCandidate>,
    mut extract: F,
) -> Vec<Detection>
where
    F: FnMut(&RgbImage, Option<&[(f32, f32); 5]>) -> Result<Embedding, RecognizerError>,
{
    let mut detections = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(bbox) = candidate.to_face_box(image.width(), image.height()) else {
            continue;
        };
        let embedding = match extract(image, candidate.landmarks.as_ref()) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, ?bbox, "skipping face without embedding");
                continue;
            }
        };
        detections.push(Detection {
            bbox,
            embedding,
            confidence: candidate.confidence,
            landmarks: candidate.landmarks,
        });
    }
    detections
}

/// UltraFace boxes, pixel embedding of each crop.
pub struct LocalizerStrategy {
    localizer: Mutex<FaceLocalizer>,
    embedding_size: u32,
}

impl LocalizerStrategy {
    pub fn load(
        model_path: &str,
        min_confidence: f32,
        embedding_size: u32,
    ) -> Result<Self, StrategyError> {
        Ok(Self {
            localizer: Mutex::new(FaceLocalizer::load(model_path, min_confidence)?),
            embedding_size,
        })
    }
}

impl DetectionStrategy for LocalizerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Localizer
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, StrategyError> {
        let candidates = self
            .localizer
            .lock()
            .map_err(|_| StrategyError::Poisoned(self.kind()))?
            .detect(image)?;
        Ok(with_pixel_embeddings(image, candidates, self.embedding_size))
    }
}

/// SeetaFace cascade boxes, pixel embedding of each crop.
///
/// Uses the bundled model, so it constructs on any install.
pub struct CascadeStrategy {
    cascade: FaceCascade,
    embedding_size: u32,
}

impl CascadeStrategy {
    pub fn new(embedding_size: u32) -> Self {
        Self {
            cascade: FaceCascade::bundled(),
            embedding_size,
        }
    }
}

impl DetectionStrategy for CascadeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cascade
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, StrategyError> {
        let candidates = self
            .cascade
            .detect(image)
            .ok_or(StrategyError::CascadeAborted)?;
        Ok(with_pixel_embeddings(image, candidates, self.embedding_size))
    }
}

fn with_pixel_embeddings(
    image: &RgbImage,
    candidates: Vec<FaceCandidate>,
    size: u32,
) -> Vec<Detection> {
    candidates
        .into_iter()
        .filter_map(|c| {
            let bbox = c.to_face_box(image.width(), image.height())?;
            Some(Detection {
                bbox,
                embedding: simple_embedding_sized(image, &bbox, size),
                confidence: c.confidence,
                landmarks: None,
            })
        })
        .collect()
}
