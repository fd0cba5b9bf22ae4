use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::{DEFAULT_MAX_WORDS_PER_TRANSFER, DEFAULT_READ_TIMEOUT_MS};
use super::detector::ReadoutSettings;
use super::error::ConfigError;
use super::parameters::DetectorParameters;

/// Structure representing the application configuration. Contains pathing, transfer limits
/// and the detector parameters. Configs are seralizable and deserializable to YAML using
/// serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scaler_path: PathBuf,
    pub spectrum_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub n_frames: u64,
    pub max_words_per_transfer: usize,
    pub read_timeout_ms: u64,
    pub detector: DetectorParameters,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            scaler_path: PathBuf::from("None"),
            spectrum_path: None,
            output_path: PathBuf::from("None"),
            n_frames: 0,
            max_words_per_transfer: DEFAULT_MAX_WORDS_PER_TRANSFER,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            detector: DetectorParameters::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn readout_settings(&self) -> ReadoutSettings {
        ReadoutSettings {
            max_words_per_transfer: self.max_words_per_transfer,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// The output file, if its parent directory exists
    pub fn get_output_file(&self) -> Result<PathBuf, ConfigError> {
        match self.output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                Err(ConfigError::BadFilePath(parent.to_path_buf()))
            }
            _ => Ok(self.output_path.clone()),
        }
    }
}
