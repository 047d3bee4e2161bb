use std::{fs::File, io::BufReader, num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    device::Device,
    precision::{OptLevel, Precision},
    training::ClipGradNorm,
    Result,
};

/// Which mixed precision path the trainer takes, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmpMode {
    #[default]
    None,
    Amp,
    Apex,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    #[default]
    GradientDescent,
    Adam,
}

/// Settings of a training run, usually read from a JSON file.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub learning_rate: f32,
    pub optimizer: OptimizerConfig,
    pub seed: Option<u64>,
    pub deterministic: bool,
    pub amp_mode: AmpMode,
    pub opt_level: OptLevel,
    pub clip_grad_norm: Option<ClipGradNorm>,
    pub device: Device,
    pub non_blocking: bool,
    /// Number of synthetic samples the demo trains on.
    pub samples: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: NonZeroUsize::new(20).unwrap_or(NonZeroUsize::MIN),
            batch_size: NonZeroUsize::new(16).unwrap_or(NonZeroUsize::MIN),
            learning_rate: 0.5,
            optimizer: OptimizerConfig::default(),
            seed: Some(42),
            deterministic: false,
            amp_mode: AmpMode::None,
            opt_level: OptLevel::default(),
            clip_grad_norm: None,
            device: Device::Cpu,
            non_blocking: false,
            samples: 256,
        }
    }
}

impl TrainingConfig {
    /// Reads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// The precision the configured trainer runs at. `opt_level` only matters for `apex`.
    pub fn precision(&self) -> Precision {
        match self.amp_mode {
            AmpMode::None => Precision::Full,
            AmpMode::Amp => Precision::native(),
            AmpMode::Apex => Precision::apex(self.opt_level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: TrainingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert!(matches!(config.precision(), Precision::Full));
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "epochs": 3,
            "batch_size": 4,
            "learning_rate": 0.01,
            "optimizer": { "kind": "adam" },
            "seed": 7,
            "deterministic": true,
            "amp_mode": "apex",
            "opt_level": "O2",
            "clip_grad_norm": { "max_norm": 1.0 },
            "device": "cpu"
        }"#;

        let config: TrainingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.epochs.get(), 3);
        assert_eq!(config.optimizer, OptimizerConfig::Adam);
        assert_eq!(config.clip_grad_norm, Some(ClipGradNorm::new(1.)));
        assert!(matches!(
            config.precision(),
            Precision::Apex(apex) if apex.opt_level() == OptLevel::O2
        ));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(serde_json::from_str::<TrainingConfig>(r#"{ "epochs": 0 }"#).is_err());
        assert!(serde_json::from_str::<TrainingConfig>(r#"{ "device": "xla:a" }"#).is_err());
        assert!(serde_json::from_str::<TrainingConfig>(r#"{ "amp_mode": "fp8" }"#).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            TrainingConfig::from_file("/definitely/not/here.json"),
            Err(crate::EngineErr::Io(_))
        ));
    }
}
