//! Minimal 4-D tensor holding fixed-point activations and weights
//!
//! Data is stored row-major over `[batch, channel, x, y]`. Fully-connected
//! data uses unit spatial dimensions.

use serde::{Deserialize, Serialize};

use crate::bits::{magnitude_mask, sign_mask};
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: [usize; 4],
    pub data: Vec<u16>,
}

impl Tensor {
    pub fn new(shape: [usize; 4], data: Vec<u16>) -> SimResult<Self> {
        let tensor = Self { shape, data };
        tensor.validate()?;
        Ok(tensor)
    }

    pub fn zeros(shape: [usize; 4]) -> Self {
        Self {
            shape,
            data: vec![0; shape.iter().product()],
        }
    }

    /// Check that the data length matches the shape
    pub fn validate(&self) -> SimResult<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(SimError::shape(format!(
                "shape {:?} needs {} values, got {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn batch(&self) -> usize {
        self.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.shape[1]
    }

    pub fn nx(&self) -> usize {
        self.shape[2]
    }

    pub fn ny(&self) -> usize {
        self.shape[3]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn index(&self, n: usize, c: usize, x: usize, y: usize) -> usize {
        ((n * self.shape[1] + c) * self.shape[2] + x) * self.shape[3] + y
    }

    pub fn get(&self, n: usize, c: usize, x: usize, y: usize) -> u16 {
        self.data[self.index(n, c, x, y)]
    }

    pub fn set(&mut self, n: usize, c: usize, x: usize, y: usize, value: u16) {
        let idx = self.index(n, c, x, y);
        self.data[idx] = value;
    }

    /// Surround both spatial dimensions with `padding` zeros
    pub fn zero_pad(&self, padding: usize) -> Tensor {
        if padding == 0 {
            return self.clone();
        }
        let [batch, channels, nx, ny] = self.shape;
        let mut padded = Tensor::zeros([batch, channels, nx + 2 * padding, ny + 2 * padding]);
        for n in 0..batch {
            for c in 0..channels {
                for x in 0..nx {
                    for y in 0..ny {
                        padded.set(n, c, x + padding, y + padding, self.get(n, c, x, y));
                    }
                }
            }
        }
        padded
    }

    /// Flatten channels and spatial dimensions into the channel axis
    pub fn reshape_to_2d(&mut self) {
        let [batch, channels, nx, ny] = self.shape;
        self.shape = [batch, channels * nx * ny, 1, 1];
    }

    /// Reinterpret two's complement values of `prec` bits as sign-magnitude.
    /// Magnitudes beyond `prec - 1` bits saturate.
    pub fn sign_magnitude_representation(&mut self, prec: u32) {
        let sign = sign_mask(prec);
        let magnitude = magnitude_mask(prec);
        for value in self.data.iter_mut() {
            let two_comp = *value as i16;
            let abs = two_comp.unsigned_abs().min(magnitude);
            *value = if two_comp < 0 { abs | sign } else { abs };
        }
    }

    /// Keep only the magnitude of two's complement values of `prec` bits
    pub fn powers_of_two_representation(&mut self, prec: u32) {
        let mask = magnitude_mask(prec);
        for value in self.data.iter_mut() {
            *value = (*value as i16).unsigned_abs() & mask;
        }
    }

    pub fn count_zeros(&self) -> usize {
        self.data.iter().filter(|&&v| v == 0).count()
    }

    pub fn count_zero_bits(&self, width: u32) -> u64 {
        self.data
            .iter()
            .map(|&v| (width - (v as u32 & ((1u32 << width) - 1)).count_ones()) as u64)
            .sum()
    }
}
