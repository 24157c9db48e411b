//! Engine defaults, loaded from `data/fee_engine.json`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fee ratio ceiling given to a plan created on first access.
    pub default_max_fee_ratio: Decimal,
    /// Interval lower limits given to a plan created on first access.
    pub default_intervals: Vec<Decimal>,
    /// (x, y) pairs evaluated by the formula dry-run.
    pub validation_samples: Vec<FormulaSample>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FormulaSample {
    pub x: f64,
    pub y: f64,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/fee_engine.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        if !(Decimal::ZERO..=Decimal::ONE).contains(&config.default_max_fee_ratio) {
            anyhow::bail!(
                "{path}: default_max_fee_ratio {} is outside [0, 1]",
                config.default_max_fee_ratio
            );
        }
        if config.validation_samples.is_empty() {
            anyhow::bail!("{path}: validation_samples must not be empty");
        }
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            default_max_fee_ratio: Decimal::new(5, 2),
            default_intervals: vec![Decimal::ZERO],
            validation_samples: vec![
                FormulaSample { x: 0.0,   y: 0.0 },
                FormulaSample { x: 0.0,   y: 1.0 },
                FormulaSample { x: 1.0,   y: 0.0 },
                FormulaSample { x: 1.0,   y: 1.0 },
                FormulaSample { x: 100.0, y: 0.5 },
            ],
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_test()
    }
}
