use anyhow::Context;
use rollcall_core::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Sqlite,
}

/// CLI configuration: `rollcall.toml` (or `$ROLLCALL_CONFIG`), then
/// `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub store: StoreBackend,
    /// Directory for the file store.
    pub encodings_dir: PathBuf,
    /// Database path for the SQLite store.
    pub db_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            store: StoreBackend::File,
            encodings_dir: PathBuf::from("data/face_encodings"),
            db_path: PathBuf::from("data/attendance.db"),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let base = if path.exists() {
            Self::from_file(&path)?
        } else {
            if let Some(p) = explicit {
                anyhow::bail!("config file not found: {}", p.display());
            }
            Self::default()
        };

        Ok(base.with_env_overrides())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn with_env_overrides(mut self) -> Self {
        self.engine = self.engine.with_env_overrides();
        match std::env::var("ROLLCALL_STORE").as_deref() {
            Ok("sqlite") => self.store = StoreBackend::Sqlite,
            Ok("file") => self.store = StoreBackend::File,
            Ok(other) => tracing::warn!(value = other, "ignoring unknown ROLLCALL_STORE"),
            Err(_) => {}
        }
        if let Ok(dir) = std::env::var("ROLLCALL_ENCODINGS_DIR") {
            self.encodings_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::StrategyPreference;

    #[test]
    fn test_parse_toml() {
        let cfg: Config = toml::from_str(
            r#"
            store = "sqlite"
            db_path = "/var/lib/rollcall/attendance.db"

            [engine]
            strategy = "cascade"
            identify_threshold = 0.45
            "#,
        )
        .unwrap();
        assert_eq!(cfg.store, StoreBackend::Sqlite);
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/rollcall/attendance.db"));
        assert_eq!(cfg.engine.strategy, StrategyPreference::Cascade);
        assert_eq!(cfg.engine.identify_threshold, 0.45);
        assert_eq!(cfg.engine.verify_threshold, 0.6);
        assert_eq!(cfg.encodings_dir, PathBuf::from("data/face_encodings"));
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.store, StoreBackend::File);
        assert_eq!(cfg.engine.identify_threshold, 0.5);
    }
}
