//! Layer and network descriptors consumed by the simulator

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::tensor::Tensor;

/// Kind of layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerType {
    Convolution,
    InnerProduct,
    /// Recurrent layer, timed as fully-connected with the batch axis holding
    /// sequence steps
    Lstm,
}

/// Fixed-point precision of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub total: u32,
    pub integer: u32,
    pub fraction: u32,
}

impl Precision {
    pub fn new(total: u32, integer: u32, fraction: u32) -> Self {
        Self {
            total,
            integer,
            fraction,
        }
    }

    /// Bits carrying magnitude and fraction
    pub fn bits(&self) -> u32 {
        self.integer + self.fraction
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.total == 0 || self.total > 16 {
            return Err(SimError::precision(format!(
                "total precision must be within 1..=16, got {}",
                self.total
            )));
        }
        if self.bits() > self.total {
            return Err(SimError::precision(format!(
                "{} integer and {} fraction bits exceed {} total bits",
                self.integer, self.fraction, self.total
            )));
        }
        Ok(())
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::new(16, 14, 2)
    }
}

fn default_signed() -> bool {
    true
}

fn default_stride() -> usize {
    1
}

/// Immutable per-layer descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub layer_type: LayerType,
    /// Number of filters
    pub filters: usize,
    pub kx: usize,
    pub ky: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
    #[serde(default)]
    pub act_precision: Precision,
    #[serde(default)]
    pub wgt_precision: Precision,
    #[serde(default = "default_signed")]
    pub signed_act: bool,
    #[serde(default = "default_signed")]
    pub signed_wgt: bool,
    pub activations: Tensor,
    pub weights: Tensor,
    #[serde(default)]
    pub gradients: Option<Tensor>,
}

impl Layer {
    /// Fully-connected and recurrent layers use the linear dataflow
    pub fn is_linear(&self) -> bool {
        matches!(self.layer_type, LayerType::InnerProduct | LayerType::Lstm)
    }

    pub fn validate(&self) -> SimResult<()> {
        self.act_precision.validate()?;
        self.wgt_precision.validate()?;
        self.activations.validate()?;
        self.weights.validate()?;

        if self.stride == 0 {
            return Err(SimError::config(format!("layer {}: stride must be positive", self.name)));
        }
        if self.weights.batch() != self.filters {
            return Err(SimError::shape(format!(
                "layer {}: {} filters declared, weights hold {}",
                self.name,
                self.filters,
                self.weights.batch()
            )));
        }
        if self.activations.batch() == 0 || self.filters == 0 {
            return Err(SimError::shape(format!("layer {}: empty tensors", self.name)));
        }

        if self.is_linear() {
            let act_channels = self.activations.len() / self.activations.batch();
            if act_channels != self.weights.channels() * self.weights.nx() * self.weights.ny() {
                return Err(SimError::shape(format!(
                    "layer {}: {} input values do not match {} weight channels",
                    self.name,
                    act_channels,
                    self.weights.channels()
                )));
            }
        } else {
            if self.weights.nx() != self.kx || self.weights.ny() != self.ky {
                return Err(SimError::shape(format!(
                    "layer {}: kernel {}x{} does not match weights {:?}",
                    self.name, self.kx, self.ky, self.weights.shape
                )));
            }
            let nx = self.activations.nx() + 2 * self.padding;
            let ny = self.activations.ny() + 2 * self.padding;
            if nx < self.kx || ny < self.ky {
                return Err(SimError::shape(format!(
                    "layer {}: kernel larger than padded input",
                    self.name
                )));
            }
            if self.weights.channels() == 0 || self.activations.channels() % self.weights.channels() != 0 {
                return Err(SimError::shape(format!(
                    "layer {}: {} input channels not divisible by {} weight channels",
                    self.name,
                    self.activations.channels(),
                    self.weights.channels()
                )));
            }
        }
        Ok(())
    }
}

/// Ordered list of layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub layers: Vec<Layer>,
    #[serde(default = "default_signed")]
    pub forward: bool,
    #[serde(default)]
    pub backward: bool,
    /// Data words are 8 bits wide instead of 16
    #[serde(default)]
    pub int8: bool,
}

impl Network {
    pub fn new(name: impl Into<String>, layers: Vec<Layer>) -> Self {
        Self {
            name: name.into(),
            layers,
            forward: true,
            backward: false,
            int8: false,
        }
    }

    pub fn network_width(&self) -> u32 {
        if self.int8 {
            8
        } else {
            16
        }
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        let network: Network = serde_json::from_str(json)?;
        for layer in &network.layers {
            layer.validate()?;
        }
        Ok(network)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn conv_layer(act: Tensor, wgt: Tensor, stride: usize, padding: usize) -> Layer {
        Layer {
            name: "conv".to_string(),
            layer_type: LayerType::Convolution,
            filters: wgt.batch(),
            kx: wgt.nx(),
            ky: wgt.ny(),
            stride,
            padding,
            act_precision: Precision::default(),
            wgt_precision: Precision::default(),
            signed_act: false,
            signed_wgt: true,
            activations: act,
            weights: wgt,
            gradients: None,
        }
    }

    pub(crate) fn fc_layer(act: Tensor, wgt: Tensor) -> Layer {
        Layer {
            name: "fc".to_string(),
            layer_type: LayerType::InnerProduct,
            filters: wgt.batch(),
            kx: 1,
            ky: 1,
            stride: 1,
            padding: 0,
            act_precision: Precision::default(),
            wgt_precision: Precision::default(),
            signed_act: false,
            signed_wgt: true,
            activations: act,
            weights: wgt,
            gradients: None,
        }
    }

    #[test]
    fn test_precision_validation() {
        assert!(Precision::new(16, 14, 2).validate().is_ok());
        assert!(matches!(
            Precision::new(0, 0, 0).validate(),
            Err(SimError::Precision { .. })
        ));
        assert!(Precision::new(8, 6, 4).validate().is_err());
    }

    #[test]
    fn test_layer_validation() {
        let act = Tensor::zeros([1, 2, 4, 4]);
        let wgt = Tensor::zeros([3, 2, 2, 2]);
        assert!(conv_layer(act.clone(), wgt.clone(), 1, 0).validate().is_ok());
        assert!(conv_layer(act.clone(), wgt.clone(), 0, 0).validate().is_err());

        let mut layer = conv_layer(act, wgt, 1, 0);
        layer.filters = 4;
        assert!(matches!(layer.validate(), Err(SimError::Shape { .. })));
    }

    #[test]
    fn test_fc_validation() {
        let layer = fc_layer(Tensor::zeros([1, 8, 1, 1]), Tensor::zeros([4, 8, 1, 1]));
        assert!(layer.is_linear());
        assert!(layer.validate().is_ok());

        let bad = fc_layer(Tensor::zeros([1, 6, 1, 1]), Tensor::zeros([4, 8, 1, 1]));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_network_json() {
        let json = r#"{
            "name": "tiny",
            "layers": [{
                "name": "fc1",
                "layer_type": "InnerProduct",
                "filters": 1,
                "kx": 1,
                "ky": 1,
                "activations": { "shape": [1, 2, 1, 1], "data": [1, 2] },
                "weights": { "shape": [1, 2, 1, 1], "data": [3, 4] }
            }]
        }"#;
        let net = Network::from_json(json).unwrap();
        assert_eq!(net.layers.len(), 1);
        assert_eq!(net.network_width(), 16);
        assert!(net.forward);
        assert_eq!(net.layers[0].stride, 1);
    }
}
