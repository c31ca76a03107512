//! rollcall-core — Face detection and matching engine for attendance roll-call.
//!
//! One of three detection strategies is selected at startup (SCRFD + ArcFace,
//! UltraFace, or a SeetaFace cascade), and faces are verified 1:1 or
//! identified 1:N against stored embeddings by cosine similarity.

pub mod alignment;
pub mod cascade;
pub mod config;
pub mod detector;
pub mod embedding;
pub mod engine;
pub mod geometry;
pub mod localizer;
pub mod recognizer;
pub mod strategy;
pub mod types;

pub use config::{EngineConfig, StrategyPreference};
pub use engine::{EngineInfo, FaceEngine};
pub use strategy::{DetectionStrategy, StrategyError, StrategyKind};
pub use types::{
    similarity, Detection, Embedding, FaceBox, IdentityKey, IdentityMatch, Verification,
};

pub use image::RgbImage;
