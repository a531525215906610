//! Sign-magnitude serial variant
//!
//! Activations stream `pe_serial_bits` bits per cycle and weights one bit
//! per cycle. Both operands may be trimmed to the bits a group actually
//! needs.

use crate::architecture::{ArchCore, Architecture, ColumnRegisters, PeArrayConfig, SimContext, TileData};
use crate::bits::{min_max, sign_mask};
use crate::error::SimResult;
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct Loom {
    core: ArchCore,
    pe_serial_bits: u32,
    /// Trim zero bits below the lowest set bit too
    minor_bit: bool,
    dynamic_weights: bool,
    registers: ColumnRegisters,
}

impl Loom {
    pub fn new(
        array: PeArrayConfig,
        pe_serial_bits: u32,
        minor_bit: bool,
        dynamic_weights: bool,
        registers: ColumnRegisters,
    ) -> Self {
        Self {
            core: ArchCore::new(array),
            pe_serial_bits: pe_serial_bits.max(1),
            minor_bit,
            dynamic_weights,
            registers,
        }
    }

    /// Bits needed by a sign-magnitude value of `prec` bits
    pub fn value_width(&self, value: u16, prec: u32) -> u64 {
        let mask = sign_mask(prec);
        let negative = value & mask != 0;
        let (min_bit, mut max_bit) = min_max(value & !mask);
        if negative {
            max_bit += 1;
        }

        if self.minor_bit {
            if min_bit > max_bit {
                0
            } else {
                (max_bit - min_bit) as u64 + 1
            }
        } else {
            max_bit as u64 + 1
        }
    }

    fn act_width(&self, tiles: &[TileData<'_>], column: usize) -> Option<u64> {
        let prec = self.core.params.act_prec;
        tiles
            .iter()
            .filter(|t| t.valid && column < t.windows)
            .map(|t| {
                (0..t.cost_rows())
                    .flat_map(|row| t.row_acts(column, row))
                    .map(|act| self.value_width(act, prec))
                    .max()
                    .unwrap_or(0)
            })
            .max()
    }

    fn wgt_width(&self, tiles: &[TileData<'_>]) -> u64 {
        let prec = self.core.params.wgt_prec;
        if !self.dynamic_weights {
            return prec as u64;
        }
        tiles
            .iter()
            .filter(|t| t.valid)
            .flat_map(|t| t.weights[..t.filters * t.lanes].iter())
            .map(|w| self.value_width(w.value, prec))
            .max()
            .unwrap_or(0)
    }

    fn cost(&self, act_width: u64, wgt_width: u64) -> u64 {
        (act_width.div_ceil(self.pe_serial_bits as u64) * wgt_width).max(1)
    }
}

impl Architecture for Loom {
    fn core(&self) -> &ArchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ArchCore {
        &mut self.core
    }

    fn name(&self) -> String {
        if self.dynamic_weights {
            "DynLoom".to_string()
        } else {
            "Loom".to_string()
        }
    }

    fn filename(&self) -> String {
        format!(
            "{}_PSB{}{}",
            self.core.filename(),
            self.pe_serial_bits,
            if self.minor_bit { "_MB" } else { "" }
        )
    }

    fn header(&self) -> String {
        let mut header = self.core.header();
        header += &format!("Number of activations processing bits per PE: {}\n", self.pe_serial_bits);
        if self.minor_bit {
            header += "Trim bits from the bottom\n";
        }
        header
    }

    fn filename_pot(&self) -> String {
        if self.minor_bit { "_minor" } else { "" }.to_string()
    }

    fn header_pot(&self) -> String {
        if self.minor_bit { "Trim bits from the bottom\n" } else { "" }.to_string()
    }

    fn diffy(&self) -> bool {
        false
    }

    fn schedule(&self) -> bool {
        false
    }

    fn convert_data(&self, data: &mut Tensor, prec: u32) {
        data.sign_magnitude_representation(prec);
    }

    fn process_tiles(&mut self, tiles: &[TileData<'_>], ctx: &SimContext) -> SimResult<()> {
        let wgt_width = self.wgt_width(tiles);

        if self.core.params.linear {
            if let Some(act_width) = self.act_width(tiles, 0) {
                let cost = self.cost(act_width, wgt_width);
                self.core.issue_linear(cost);
            }
        } else {
            for column in 0..self.core.params.ef_columns as usize {
                if let Some(act_width) = self.act_width(tiles, column) {
                    let cost = self.cost(act_width, wgt_width);
                    self.core.add_column_cost(column, cost);
                }
            }
            self.core.sync(self.registers, ctx);
        }

        self.core.record_activity(tiles);
        Ok(())
    }

    fn compute_bits(&self, act: u16, wgt: u16) -> u16 {
        let act_width = self.value_width(act, self.core.params.act_prec);
        let wgt_width = if self.dynamic_weights {
            self.value_width(wgt, self.core.params.wgt_prec)
        } else {
            self.core.params.wgt_prec as u64
        };
        (act_width * wgt_width) as u16
    }
}
