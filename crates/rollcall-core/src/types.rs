use serde::{Deserialize, Serialize};
use std::fmt;

/// Added to each L2 norm so an all-zero embedding compares as 0.0.
const NORM_EPSILON: f32 = 1e-8;

/// Opaque identity key supplied by the caller (student number, database id, ...).
///
/// Ordered so that identification ties resolve to the lowest key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for IdentityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for IdentityKey {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

/// Integer pixel box of a detected face. Always non-empty: `x_max > x_min`, `y_max > y_min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl FaceBox {
    pub fn width(&self) -> u32 {
        (self.x_max - self.x_min) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y_max - self.y_min) as u32
    }
}

/// Face embedding vector. Length depends on the producer: 512 for ArcFace,
/// 128×128×3 for the pixel fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Producer of this embedding (e.g., "w600k_r50", "pixel-128x128").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_version: impl Into<String>) -> Self {
        Self {
            values,
            model_version: Some(model_version.into()),
        }
    }

    /// Embedding with no producer tag.
    pub fn untagged(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Each vector is L2-normalized with a small epsilon on the norm, then
    /// dotted. Returns 0.0 when lengths differ or either vector is empty.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = (norm_a.sqrt() + NORM_EPSILON) * (norm_b.sqrt() + NORM_EPSILON);
        let sim = dot / denom;
        if sim.is_finite() {
            sim.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Whether two embeddings live in the same feature space.
    ///
    /// Lengths must match; producer tags must match when both are present.
    pub fn is_compatible(&self, other: &Embedding) -> bool {
        if self.values.len() != other.values.len() {
            return false;
        }
        match (&self.model_version, &other.model_version) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Cosine similarity over optional inputs; an absent side scores 0.0.
pub fn similarity(a: Option<&Embedding>, b: Option<&Embedding>) -> f32 {
    match (a, b) {
        (Some(a), Some(b)) => a.similarity(b),
        _ => 0.0,
    }
}

/// One face found in an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: FaceBox,
    pub embedding: Embedding,
    /// Strategy-defined scale. The cascade strategy emits a constant.
    pub confidence: f32,
    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    /// Only the face-analysis strategy populates these.
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Outcome of a 1:1 verification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub is_match: bool,
    /// Cosine similarity [-1, 1].
    pub score: f32,
}

/// One identified face from a 1:N roll-call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMatch {
    pub identity: IdentityKey,
    pub score: f32,
    pub bbox: FaceBox,
    pub confidence: f32,
}
