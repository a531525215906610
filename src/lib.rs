//! Bit-Serial Accelerator Simulator
//!
//! This library estimates how many cycles, memory accesses and one-bit
//! multiplications a bit-serial neural network accelerator spends on each
//! layer of a network. An output-stationary controller tiles windows and
//! filters over a PE array and streams them into one of several compute
//! models (Bit-Pragmatic, Dynamic-Stripes, Loom and Laconic).
//!
//! # Example
//!
//! ```rust
//! use bitserial_sim::{simulate, Network, SimConfig, Task};
//!
//! let network = Network::from_json(r#"{
//!     "name": "tiny",
//!     "layers": [{
//!         "name": "fc1",
//!         "layer_type": "InnerProduct",
//!         "filters": 1, "kx": 1, "ky": 1,
//!         "activations": { "shape": [1, 2, 1, 1], "data": [0, 2] },
//!         "weights": { "shape": [1, 2, 1, 1], "data": [3, 4] }
//!     }]
//! }"#).unwrap();
//!
//! let mut config = SimConfig::default();
//! config.run.task = Task::Sparsity;
//! let stats = simulate(&config, &network).unwrap();
//! assert_eq!(stats.layers.len(), 1);
//! ```

pub mod architecture;
pub mod bits;
pub mod buffer;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod laconic;
pub mod layer;
pub mod loom;
pub mod memory;
pub mod pragmatic;
pub mod search;
pub mod simulator;
pub mod stats;
pub mod stripes;
pub mod tactical;
pub mod tensor;

use std::path::Path;

pub use architecture::{Architecture, ColumnRegisters, LayerParams, PeArrayConfig};
pub use config::{ModelConfig, RunConfig, SimConfig, Task};
pub use dataflow::{ControlConfig, ImageStats, OutputStationary};
pub use error::{SimError, SimResult};
pub use laconic::Laconic;
pub use layer::{Layer, LayerType, Network, Precision};
pub use loom::Loom;
pub use memory::{Dram, GlobalBuffer};
pub use pragmatic::BitPragmatic;
pub use search::FixedAxis;
pub use simulator::Simulator;
pub use stats::{LayerMetrics, Statistics, Stats};
pub use stripes::{DynamicStripes, PrecisionGranularity};
pub use tactical::{BitTactical, SearchShape};
pub use tensor::Tensor;

/// Run the task selected in `config` over `network`
pub fn simulate(config: &SimConfig, network: &Network) -> SimResult<Stats> {
    simulator::run(config, network)
}

/// Load a configuration and a network from JSON files and simulate
pub fn simulate_files(config: impl AsRef<Path>, network: impl AsRef<Path>) -> SimResult<Stats> {
    let config = SimConfig::from_file(config)?;
    let network = Network::from_file(network)?;
    simulate(&config, &network)
}
