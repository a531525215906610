//! Exhaustive bit-count variant, potentials only

use crate::architecture::{ArchCore, Architecture, PeArrayConfig, SimContext, TileData};
use crate::bits::effectual_bits;
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone)]
pub struct Laconic {
    core: ArchCore,
}

impl Laconic {
    pub fn new(array: PeArrayConfig) -> Self {
        Self {
            core: ArchCore::new(array),
        }
    }

    /// Mask keeping the magnitude and fraction bits of a precision
    fn magnitude_mask(bits: u32) -> u16 {
        match bits {
            0 | 1 => 0,
            b if b > 16 => u16::MAX >> 1,
            b => ((1u32 << (b - 1)) - 1) as u16,
        }
    }
}

impl Architecture for Laconic {
    fn core(&self) -> &ArchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ArchCore {
        &mut self.core
    }

    fn name(&self) -> String {
        "Laconic".to_string()
    }

    fn filename_pot(&self) -> String {
        String::new()
    }

    fn header_pot(&self) -> String {
        String::new()
    }

    fn diffy(&self) -> bool {
        false
    }

    fn schedule(&self) -> bool {
        false
    }

    fn process_tiles(&mut self, _tiles: &[TileData<'_>], _ctx: &SimContext) -> SimResult<()> {
        Err(SimError::unsupported("Laconic only models potentials, not cycles"))
    }

    fn compute_bits(&self, act: u16, wgt: u16) -> u16 {
        let act_bits = act & Self::magnitude_mask(self.core.params.act_prec);
        let wgt_bits = wgt & Self::magnitude_mask(self.core.params.wgt_prec);
        effectual_bits(act_bits) as u16 * effectual_bits(wgt_bits) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::LayerParams;

    #[test]
    fn test_compute_bits() {
        let mut arch = Laconic::new(PeArrayConfig::default());
        arch.configure_layer(LayerParams {
            act_prec: 8,
            wgt_prec: 4,
            ..LayerParams::default()
        });
        assert_eq!(arch.compute_bits(0b0111, 0b0011), 6);
        // Bits above the magnitude are ignored
        assert_eq!(arch.compute_bits(0x80 | 0b1, 0b1000 | 0b1), 1);
        assert_eq!(arch.compute_bits(0, 0b1), 0);
    }

    #[test]
    fn test_cycles_unsupported() {
        let mut arch = Laconic::new(PeArrayConfig::default());
        let result = arch.process_tiles(&[], &SimContext::new());
        assert!(matches!(result, Err(SimError::Unsupported { .. })));
    }
}
