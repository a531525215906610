//! Simulator configuration loaded from JSON

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::architecture::{ColumnRegisters, PeArrayConfig};
use crate::error::{SimError, SimResult};
use crate::memory::{Dram, GlobalBuffer};
use crate::search::FixedAxis;
use crate::stripes::PrecisionGranularity;
use crate::tactical::BitTactical;

fn default_bits_first_stage() -> u32 {
    2
}

fn default_pe_serial_bits() -> u32 {
    1
}

/// Compute-time variant and its options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelConfig {
    Pragmatic {
        #[serde(default = "default_bits_first_stage")]
        bits_first_stage: u32,
        #[serde(default)]
        column_registers: ColumnRegisters,
        #[serde(default)]
        diffy: bool,
        #[serde(default)]
        tactical: bool,
    },
    DynamicStripes {
        #[serde(default)]
        granularity: PrecisionGranularity,
        #[serde(default)]
        column_registers: ColumnRegisters,
        #[serde(default)]
        diffy: bool,
        #[serde(default)]
        tactical: bool,
    },
    Loom {
        #[serde(default = "default_pe_serial_bits")]
        pe_serial_bits: u32,
        #[serde(default)]
        minor_bit: bool,
        #[serde(default)]
        dynamic_weights: bool,
        #[serde(default)]
        column_registers: ColumnRegisters,
    },
    Laconic,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Pragmatic {
            bits_first_stage: default_bits_first_stage(),
            column_registers: ColumnRegisters::One,
            diffy: false,
            tactical: false,
        }
    }
}

impl ModelConfig {
    /// Needs a weight scheduler
    pub fn tactical(&self) -> bool {
        matches!(
            self,
            ModelConfig::Pragmatic { tactical: true, .. } | ModelConfig::DynamicStripes { tactical: true, .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    #[default]
    Cycles,
    Potentials,
    Sparsity,
    BitSparsity,
    /// Ideal-cycle search over array shapes
    Search,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Cycles => "cycles",
            Task::Potentials => "potentials",
            Task::Sparsity => "sparsity",
            Task::BitSparsity => "bit_sparsity",
            Task::Search => "search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunConfig {
    /// Worker threads, 0 for the rayon default
    #[serde(default)]
    pub threads: usize,
    /// Simulate only the first image of every layer
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub task: Task,
    /// Axis the search task keeps fixed
    #[serde(default)]
    pub search_fixed: FixedAxis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimConfig {
    #[serde(default)]
    pub array: PeArrayConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub dram: Dram,
    #[serde(default)]
    pub gbuffer: GlobalBuffer,
    #[serde(default)]
    pub tactical: Option<BitTactical>,
    #[serde(default)]
    pub run: RunConfig,
}

impl SimConfig {
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> SimResult<()> {
        self.array.validate()?;
        self.dram.validate()?;
        self.gbuffer.validate()?;

        match &self.model {
            ModelConfig::Pragmatic { bits_first_stage, .. } if *bits_first_stage > 8 => {
                return Err(SimError::config(format!(
                    "first stage shifter takes at most 8 bits, got {}",
                    bits_first_stage
                )));
            }
            ModelConfig::Loom { pe_serial_bits, .. } if *pe_serial_bits == 0 || *pe_serial_bits > 16 => {
                return Err(SimError::config(format!(
                    "serial bits per PE must be within 1..=16, got {}",
                    pe_serial_bits
                )));
            }
            _ => {}
        }

        if self.model.tactical() {
            match &self.tactical {
                None => return Err(SimError::config("tactical model needs a \"tactical\" scheduler section")),
                Some(t) if t.lookahead_h == 0 => {
                    return Err(SimError::config("scheduler lookahead must be positive"));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tactical::SearchShape;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = SimConfig::from_json("{}").unwrap();
        assert_eq!(config.array, PeArrayConfig::default());
        assert_eq!(config.model, ModelConfig::default());
        assert_eq!(config.run.task, Task::Cycles);
        assert!(config.tactical.is_none());
    }

    #[test]
    fn test_tagged_model() {
        let json = r#"{
            "array": { "lanes": 16, "columns": 4, "rows": 4, "tiles": 2, "pe_width": 16 },
            "model": { "type": "DynamicStripes", "granularity": "Sip", "column_registers": "Two" },
            "run": { "threads": 2, "fast_mode": true, "task": "bit_sparsity" }
        }"#;
        let config = SimConfig::from_json(json).unwrap();
        assert_eq!(
            config.model,
            ModelConfig::DynamicStripes {
                granularity: PrecisionGranularity::Sip,
                column_registers: ColumnRegisters::Two,
                diffy: false,
                tactical: false,
            }
        );
        assert_eq!(config.run.task, Task::BitSparsity);
        assert_eq!(config.array.tiles, 2);
    }

    #[test]
    fn test_tactical_needs_scheduler() {
        let json = r#"{ "model": { "type": "Pragmatic", "tactical": true } }"#;
        assert!(matches!(SimConfig::from_json(json), Err(SimError::Config { .. })));

        let mut config = SimConfig {
            model: ModelConfig::Pragmatic {
                bits_first_stage: 2,
                column_registers: ColumnRegisters::One,
                diffy: false,
                tactical: true,
            },
            tactical: Some(BitTactical::new(0, 1, SearchShape::T)),
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
        config.tactical = Some(BitTactical::new(2, 5, SearchShape::T));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_lanes = r#"{ "array": { "lanes": 0, "columns": 1, "rows": 1, "tiles": 1, "pe_width": 16 } }"#;
        assert!(SimConfig::from_json(zero_lanes).is_err());
        let shifter = r#"{ "model": { "type": "Pragmatic", "bits_first_stage": 9 } }"#;
        assert!(SimConfig::from_json(shifter).is_err());
        let loom = r#"{ "model": { "type": "Loom", "pe_serial_bits": 0 } }"#;
        assert!(SimConfig::from_json(loom).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = SimConfig {
            model: ModelConfig::Laconic,
            ..SimConfig::default()
        };
        let back = SimConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
