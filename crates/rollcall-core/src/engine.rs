//! Face engine: one detection strategy plus the verification / identification
//! decision layer.
//!
//! Construct once at startup and share by reference. Nothing inside mutates
//! after construction except the strategy's own model runtime.

use crate::config::EngineConfig;
use crate::strategy::{
    CascadeStrategy, DetectionStrategy, FaceAnalysisStrategy, LocalizerStrategy, StrategyError,
    StrategyKind,
};
use crate::types::{Detection, Embedding, IdentityKey, IdentityMatch, Verification};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Diagnostics descriptor for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Human-readable name of the active strategy.
    pub engine: String,
    pub strategy: StrategyKind,
    /// SCRFD and ArcFace model files are present.
    pub face_analysis_available: bool,
    /// UltraFace model file is present.
    pub localizer_available: bool,
}

pub struct FaceEngine {
    strategy: Box<dyn DetectionStrategy>,
    config: EngineConfig,
}

impl FaceEngine {
    /// Select the best strategy that initializes, starting from the configured
    /// preference. Failures are logged and fall through; the cascade always
    /// constructs, so this never fails.
    pub fn new(config: EngineConfig) -> Self {
        let mut selected: Option<Box<dyn DetectionStrategy>> = None;

        for &kind in config.strategy.candidates() {
            match load_strategy(kind, &config) {
                Ok(strategy) => {
                    selected = Some(strategy);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = %kind,
                        error = %e,
                        "strategy initialization failed; trying next"
                    );
                }
            }
        }

        let strategy = selected
            .unwrap_or_else(|| Box::new(CascadeStrategy::new(config.fallback_input_size)));

        tracing::info!(
            strategy = %strategy.kind(),
            engine = strategy.kind().label(),
            "face engine ready"
        );

        Self { strategy, config }
    }

    /// Use an explicit strategy instead of availability-based selection.
    pub fn with_strategy(strategy: Box<dyn DetectionStrategy>, config: EngineConfig) -> Self {
        Self { strategy, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Detect faces. Strategy errors are logged and reported as no faces.
    pub fn detect(&self, image: &RgbImage) -> Vec<Detection> {
        if image.width() == 0 || image.height() == 0 {
            return Vec::new();
        }

        match self.strategy.detect(image) {
            Ok(detections) => {
                tracing::debug!(
                    count = detections.len(),
                    strategy = %self.strategy.kind(),
                    "detect"
                );
                detections
            }
            Err(e) => {
                tracing::warn!(
                    strategy = %self.strategy.kind(),
                    error = %e,
                    "detection failed; reporting no faces"
                );
                Vec::new()
            }
        }
    }

    /// Pick the detection to enroll from an image: highest confidence, first on ties.
    pub fn enroll(&self, image: &RgbImage) -> Option<Detection> {
        self.detect(image).into_iter().reduce(|best, d| {
            if d.confidence > best.confidence {
                d
            } else {
                best
            }
        })
    }

    /// 1:1 check of a detected embedding against one stored embedding.
    pub fn verify(&self, detected: &Embedding, stored: &Embedding, threshold: f32) -> Verification {
        verify(detected, stored, threshold)
    }

    /// [`verify`](Self::verify) at the configured verification threshold.
    pub fn verify_default(&self, detected: &Embedding, stored: &Embedding) -> Verification {
        verify(detected, stored, self.config.verify_threshold)
    }

    /// 1:N roll-call. Detects once, then keeps each face's best candidate if
    /// it clears `threshold`. Output follows detection order; unmatched faces
    /// are dropped.
    pub fn identify(
        &self,
        image: &RgbImage,
        candidates: &BTreeMap<IdentityKey, Embedding>,
        threshold: f32,
    ) -> Vec<IdentityMatch> {
        if candidates.is_empty() {
            return Vec::new();
        }

        self.detect(image)
            .into_iter()
            .filter_map(|detection| {
                let (identity, score) = best_match(&detection.embedding, candidates, threshold)?;
                Some(IdentityMatch {
                    identity,
                    score,
                    bbox: detection.bbox,
                    confidence: detection.confidence,
                })
            })
            .collect()
    }

    /// [`identify`](Self::identify) at the configured identification threshold.
    pub fn identify_default(
        &self,
        image: &RgbImage,
        candidates: &BTreeMap<IdentityKey, Embedding>,
    ) -> Vec<IdentityMatch> {
        self.identify(image, candidates, self.config.identify_threshold)
    }

    pub fn engine_info(&self) -> EngineInfo {
        let kind = self.strategy.kind();
        EngineInfo {
            engine: kind.label().to_string(),
            strategy: kind,
            face_analysis_available: Path::new(&self.config.scrfd_model_path()).exists()
                && Path::new(&self.config.arcface_model_path()).exists(),
            localizer_available: Path::new(&self.config.ultraface_model_path()).exists(),
        }
    }
}

fn load_strategy(
    kind: StrategyKind,
    config: &EngineConfig,
) -> Result<Box<dyn DetectionStrategy>, StrategyError> {
    let strategy: Box<dyn DetectionStrategy> = match kind {
        StrategyKind::FaceAnalysis => Box::new(FaceAnalysisStrategy::load(
            &config.scrfd_model_path(),
            &config.arcface_model_path(),
        )?),
        StrategyKind::Localizer => Box::new(LocalizerStrategy::load(
            &config.ultraface_model_path(),
            config.detection_confidence,
            config.fallback_input_size,
        )?),
        StrategyKind::Cascade => Box::new(CascadeStrategy::new(config.fallback_input_size)),
    };
    Ok(strategy)
}

/// 1:1 verification: `is_match = score >= threshold`.
///
/// Embeddings from different producers are never compared; they score 0.0.
pub fn verify(detected: &Embedding, stored: &Embedding, threshold: f32) -> Verification {
    if !detected.is_compatible(stored) {
        tracing::warn!(
            detected_len = detected.len(),
            stored_len = stored.len(),
            detected_model = ?detected.model_version,
            stored_model = ?stored.model_version,
            "embeddings come from different producers; treating as non-match"
        );
        return Verification {
            is_match: false,
            score: 0.0,
        };
    }

    let score = detected.similarity(stored);
    Verification {
        is_match: score >= threshold,
        score,
    }
}

/// Best candidate for one query embedding, if its score clears `threshold`.
///
/// Ties keep the lowest identity key. Incompatible candidates are skipped.
pub fn best_match(
    query: &Embedding,
    candidates: &BTreeMap<IdentityKey, Embedding>,
    threshold: f32,
) -> Option<(IdentityKey, f32)> {
    let mut best: Option<(&IdentityKey, f32)> = None;

    for (identity, embedding) in candidates {
        if !query.is_compatible(embedding) {
            tracing::warn!(
                %identity,
                query_model = ?query.model_version,
                stored_model = ?embedding.model_version,
                "skipping candidate enrolled under a different embedding producer"
            );
            continue;
        }
        let score = query.similarity(embedding);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((identity, score));
        }
    }

    best.filter(|&(_, score)| score >= threshold)
        .map(|(identity, score)| (identity.clone(), score))
}
