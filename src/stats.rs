//! Per-layer result records
//!
//! Each simulator task produces one [`Stats`] per network. Records are
//! collected in a [`Statistics`] value owned by the caller and exported as
//! JSON.

use serde::{Deserialize, Serialize};

use crate::dataflow::ImageStats;

/// Timing and traffic of one layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Cycles of every simulated image
    pub cycles: Vec<u64>,
    pub avg_cycles: f64,
    /// Cycles with no column ever stalling
    pub baseline_cycles: u64,
    pub act_on_chip: u64,
    pub wgt_on_chip: u64,
    pub act_off_chip: u64,
    pub wgt_off_chip: u64,
    pub bank_conflicts: u64,
    pub outputs: u64,
    pub scheduled_pe: u64,
    pub idle_pe: u64,
    pub idle_lanes: u64,
    pub idle_pes: u64,
    pub idle_pes_tiles: u64,
}

impl CycleStats {
    /// Fold per-image results; traffic counters are summed over images
    pub fn from_images(images: &[ImageStats], baseline_cycles: u64) -> Self {
        let cycles: Vec<u64> = images.iter().map(|i| i.cycles).collect();
        let avg_cycles = if cycles.is_empty() {
            0.0
        } else {
            cycles.iter().sum::<u64>() as f64 / cycles.len() as f64
        };

        let mut stats = Self {
            cycles,
            avg_cycles,
            baseline_cycles,
            ..Self::default()
        };
        for image in images {
            stats.act_on_chip += image.act_on_chip;
            stats.wgt_on_chip += image.wgt_on_chip;
            stats.act_off_chip += image.act_off_chip;
            stats.wgt_off_chip += image.wgt_off_chip;
            stats.bank_conflicts += image.bank_conflicts;
            stats.outputs += image.outputs;
            stats.scheduled_pe += image.scheduled_pe;
            stats.idle_pe += image.idle_pe;
        }
        stats
    }
}

/// Work a bit-serial design would do relative to bit-parallel multipliers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PotentialStats {
    pub act_prec: u32,
    pub wgt_prec: u32,
    pub work_reduction: f64,
    pub speedup: f64,
    /// Multiply-accumulates performed
    pub parallel_mult: u64,
    /// One-bit multiplications spent on them
    pub bit_mult: u64,
}

impl PotentialStats {
    /// `network_width` squared one-bit products make one parallel multiply
    pub fn new(act_prec: u32, wgt_prec: u32, parallel_mult: u64, bit_mult: u64, network_width: u32) -> Self {
        let full = parallel_mult as f64 * (network_width * network_width) as f64;
        let (work_reduction, speedup) = if full == 0.0 {
            (0.0, 1.0)
        } else {
            (100.0 - bit_mult as f64 / full * 100.0, full / bit_mult.max(1) as f64)
        };
        Self {
            act_prec,
            wgt_prec,
            work_reduction,
            speedup,
            parallel_mult,
            bit_mult,
        }
    }
}

/// Zero values (or zero bits) over total
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparsityStats {
    pub act_sparsity: f64,
    pub zero_act: u64,
    pub total_act: u64,
    pub wgt_sparsity: f64,
    pub zero_wgt: u64,
    pub total_wgt: u64,
    /// Only when gradients are present and the network is simulated backward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_sparsity: Option<f64>,
}

impl SparsityStats {
    pub fn new(zero_act: u64, total_act: u64, zero_wgt: u64, total_wgt: u64) -> Self {
        Self {
            act_sparsity: percent(zero_act, total_act),
            zero_act,
            total_act,
            wgt_sparsity: percent(zero_wgt, total_wgt),
            zero_wgt,
            total_wgt,
            grad_sparsity: None,
        }
    }
}

/// Best array shape found for a layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub lanes: u32,
    pub columns: u32,
    pub rows: u32,
    pub ideal_cycles: u64,
    /// Ideal cycles of the configured array
    pub default_cycles: u64,
}

pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerMetrics {
    Cycles(CycleStats),
    Potentials(PotentialStats),
    Sparsity(SparsityStats),
    Search(SearchStats),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    /// Wall time spent simulating the layer
    pub time_ms: f64,
    pub metrics: LayerMetrics,
}

/// Results of one task over one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub task_name: String,
    pub net_name: String,
    pub arch: String,
    /// Suffix describing the architecture configuration
    pub filename: String,
    pub header: String,
    pub layers: Vec<LayerStats>,
}

impl Stats {
    pub fn new(task_name: impl Into<String>, net_name: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            net_name: net_name.into(),
            arch: arch.into(),
            filename: String::new(),
            header: String::new(),
            layers: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, time_ms: f64, metrics: LayerMetrics) {
        self.layers.push(LayerStats {
            name: name.into(),
            time_ms,
            metrics,
        });
    }

    /// Sum of average cycles over the layers timed
    pub fn total_cycles(&self) -> f64 {
        self.layers
            .iter()
            .filter_map(|l| match &l.metrics {
                LayerMetrics::Cycles(c) => Some(c.avg_cycles),
                _ => None,
            })
            .sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Every run of a session, in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    runs: Vec<Stats>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stats: Stats) {
        self.runs.push(stats);
    }

    pub fn runs(&self) -> &[Stats] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.runs)
    }
}
