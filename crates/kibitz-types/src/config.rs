use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{KibitzError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub corpus: String,
    pub positions: String,
    pub labelled: String,
    pub scored: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            corpus: "data/games.pgn".into(),
            positions: "data/positions_extracted.csv".into(),
            labelled: "data/positions_labelled.csv".into(),
            scored: "data/positions_scored.csv".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub target_count: usize,
    /// Games with fewer half-moves than this are skipped.
    pub min_plies: usize,
    /// Smallest ply index a sample may be drawn from.
    pub min_ply_index: usize,
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            target_count: 300,
            min_plies: 10,
            min_ply_index: 5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub path: String,
    pub args: Vec<String>,
    /// Search time handed to the engine per evaluation.
    pub time_budget_ms: u64,
    /// Hard wall-clock limit per evaluation, after which the call fails.
    pub call_timeout_ms: u64,
    pub threads: usize,
    pub hash_mb: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: "stockfish".into(),
            args: Vec::new(),
            time_budget_ms: 100,
            call_timeout_ms: 5_000,
            threads: 1,
            hash_mb: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
    pub log_file: Option<String>,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KibitzConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ops: OpsConfig,
}

impl KibitzConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            KibitzError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            KibitzError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampler.target_count == 0 {
            return Err(KibitzError::Configuration(
                "sampler.target_count must be greater than zero".into(),
            ));
        }
        if self.sampler.min_ply_index >= self.sampler.min_plies {
            return Err(KibitzError::Configuration(
                "sampler.min_ply_index must be smaller than sampler.min_plies".into(),
            ));
        }
        if self.engine.time_budget_ms == 0 {
            return Err(KibitzError::Configuration(
                "engine.time_budget_ms must be greater than zero".into(),
            ));
        }
        if self.engine.call_timeout_ms < self.engine.time_budget_ms {
            return Err(KibitzError::Configuration(
                "engine.call_timeout_ms must not be shorter than engine.time_budget_ms".into(),
            ));
        }
        if self.engine.threads == 0 || self.engine.hash_mb == 0 {
            return Err(KibitzError::Configuration(
                "engine.threads and engine.hash_mb must be greater than zero".into(),
            ));
        }
        if self.engine.path.trim().is_empty() {
            return Err(KibitzError::Configuration(
                "engine.path must name an executable".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_kibitz_config_from_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let temp_path = dir.path().join("kibitz-config-test.toml");
        let mut config = KibitzConfig::default();
        config.sampler.seed = Some(7);
        config.sampler.target_count = 42;
        config.engine.path = "/opt/stockfish/stockfish".into();
        config.ops.log_file = Some("kibitz.log".into());

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = KibitzConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.sampler.seed, Some(7));
        assert_eq!(loaded.sampler.target_count, 42);
        assert_eq!(loaded.engine.path, config.engine.path);
        assert_eq!(loaded.ops.log_file.as_deref(), Some("kibitz.log"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let doc = "[engine]\npath = \"sf\"\ntime_budget_ms = 250\n";
        let loaded: KibitzConfig = toml::from_str(doc).expect("parse partial config");
        assert_eq!(loaded.engine.path, "sf");
        assert_eq!(loaded.engine.time_budget_ms, 250);
        assert_eq!(loaded.engine.call_timeout_ms, 5_000);
        assert_eq!(loaded.sampler.min_plies, 10);
        assert_eq!(loaded.paths.labelled, "data/positions_labelled.csv");
    }

    #[test]
    fn shipped_config_is_valid() {
        let shipped: KibitzConfig =
            toml::from_str(include_str!("../../../configs/kibitz.toml")).expect("parse shipped");
        shipped.validate().expect("shipped config validates");
        assert_eq!(shipped.engine.time_budget_ms, 100);
        assert!(shipped.sampler.seed.is_none());
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let err = KibitzConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, KibitzError::Configuration(_)));
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = KibitzConfig::default();
        assert!(config.validate().is_ok());

        config.sampler.target_count = 0;
        assert!(config.validate().is_err());
        config.sampler.target_count = 10;
        config.sampler.min_ply_index = 10;
        assert!(config.validate().is_err());
        config.sampler.min_ply_index = 5;
        config.engine.time_budget_ms = 0;
        assert!(config.validate().is_err());
        config.engine.time_budget_ms = 200;
        config.engine.call_timeout_ms = 100;
        assert!(config.validate().is_err());
        config.engine.call_timeout_ms = 1_000;
        config.engine.threads = 0;
        assert!(config.validate().is_err());
        config.engine.threads = 1;
        config.engine.path = "  ".into();
        assert!(config.validate().is_err());
        config.engine.path = "stockfish".into();
        assert!(config.validate().is_ok());
    }
}
