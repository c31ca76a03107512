use crate::embedding::FALLBACK_INPUT_SIZE;
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_VERIFY_THRESHOLD: f32 = 0.6;
pub const DEFAULT_IDENTIFY_THRESHOLD: f32 = 0.5;
pub const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.5;

/// Highest-quality strategy the engine may pick. Selection still degrades
/// below this when a strategy cannot initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyPreference {
    #[default]
    Auto,
    FaceAnalysis,
    Localizer,
    Cascade,
}

impl StrategyPreference {
    /// Strategies to try, in order.
    pub fn candidates(self) -> &'static [StrategyKind] {
        let start = match self {
            StrategyPreference::Auto | StrategyPreference::FaceAnalysis => 0,
            StrategyPreference::Localizer => 1,
            StrategyPreference::Cascade => 2,
        };
        &StrategyKind::PRIORITY[start..]
    }
}

impl FromStr for StrategyPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "face-analysis" | "insightface" | "scrfd" => Ok(Self::FaceAnalysis),
            "localizer" | "ultraface" => Ok(Self::Localizer),
            "cascade" | "seetaface" => Ok(Self::Cascade),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Face engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: StrategyPreference,
    /// Directory containing the model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for 1:1 verification.
    pub verify_threshold: f32,
    /// Cosine similarity threshold for 1:N identification (looser).
    pub identify_threshold: f32,
    /// Minimum localizer score for a box to count as a face.
    pub detection_confidence: f32,
    /// Side of the square canvas used by the pixel embedding fallback.
    pub fallback_input_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyPreference::Auto,
            model_dir: PathBuf::from("models"),
            verify_threshold: DEFAULT_VERIFY_THRESHOLD,
            identify_threshold: DEFAULT_IDENTIFY_THRESHOLD,
            detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
            fallback_input_size: FALLBACK_INPUT_SIZE,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ROLLCALL_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `ROLLCALL_*` environment variables on top of `self`.
    /// Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(strategy) = env_parse::<StrategyPreference>("ROLLCALL_STRATEGY") {
            self.strategy = strategy;
        }
        if let Ok(dir) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        self.verify_threshold =
            env_parse("ROLLCALL_VERIFY_THRESHOLD").unwrap_or(self.verify_threshold);
        self.identify_threshold =
            env_parse("ROLLCALL_IDENTIFY_THRESHOLD").unwrap_or(self.identify_threshold);
        self.detection_confidence =
            env_parse("ROLLCALL_DETECTION_CONFIDENCE").unwrap_or(self.detection_confidence);
        self
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_path("w600k_r50.onnx")
    }

    /// Path to the UltraFace localization model.
    pub fn ultraface_model_path(&self) -> String {
        self.model_path("version-RFB-320.onnx")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.verify_threshold, 0.6);
        assert_eq!(cfg.identify_threshold, 0.5);
        assert_eq!(cfg.fallback_input_size, 128);
        assert_eq!(cfg.strategy, StrategyPreference::Auto);
    }

    #[test]
    fn test_preference_candidates() {
        assert_eq!(StrategyPreference::Auto.candidates().len(), 3);
        assert_eq!(
            StrategyPreference::Localizer.candidates(),
            &[StrategyKind::Localizer, StrategyKind::Cascade]
        );
        assert_eq!(StrategyPreference::Cascade.candidates(), &[StrategyKind::Cascade]);
    }

    #[test]
    fn test_preference_parse() {
        assert_eq!(
            "insightface".parse::<StrategyPreference>(),
            Ok(StrategyPreference::FaceAnalysis)
        );
        assert_eq!(" Cascade ".parse::<StrategyPreference>(), Ok(StrategyPreference::Cascade));
        assert!("mediapipe2".parse::<StrategyPreference>().is_err());
    }

    #[test]
    fn test_model_paths() {
        let cfg = EngineConfig {
            model_dir: PathBuf::from("/opt/rollcall/models"),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.scrfd_model_path(), "/opt/rollcall/models/det_10g.onnx");
        assert_eq!(cfg.ultraface_model_path(), "/opt/rollcall/models/version-RFB-320.onnx");
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"strategy":"localizer","verify_threshold":0.7}"#).unwrap();
        assert_eq!(cfg.strategy, StrategyPreference::Localizer);
        assert_eq!(cfg.verify_threshold, 0.7);
        assert_eq!(cfg.identify_threshold, 0.5);
    }
}
