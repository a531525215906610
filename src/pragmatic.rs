//! Offset-counting variant
//!
//! Activations are booth-recoded and each lane keeps a queue of the offsets
//! of its remaining digits. Every cycle a two-stage shifter takes the lowest
//! pending offset and consumes, in all lanes, the digits that fall within
//! the first-stage reach above it.

use std::collections::VecDeque;

use crate::architecture::{ArchCore, Architecture, ColumnRegisters, PeArrayConfig, SimContext, TileData};
use crate::bits::{bit_offsets, booth_encoding};
use crate::error::SimResult;
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct BitPragmatic {
    core: ArchCore,
    bits_first_stage: u32,
    registers: ColumnRegisters,
    diffy: bool,
    tactical: bool,
}

impl BitPragmatic {
    pub fn new(
        array: PeArrayConfig,
        bits_first_stage: u32,
        registers: ColumnRegisters,
        diffy: bool,
        tactical: bool,
    ) -> Self {
        Self {
            core: ArchCore::new(array),
            bits_first_stage,
            registers,
            diffy,
            tactical,
        }
    }

    /// Digit offsets of one activation slice, lowest first
    fn lane_offsets(&self, act: u16, blk: usize) -> VecDeque<u8> {
        let value = if self.diffy { (act as i16).unsigned_abs() } else { act };
        let encoded = booth_encoding(value);
        let blks = self.core.act_blks();
        if blks == 1 {
            return bit_offsets(encoded).collect();
        }
        let width = self.core.array.pe_width as usize;
        bit_offsets(encoded)
            .filter(|&o| (o as usize / width).min(blks - 1) == blk)
            .map(|o| o - (blk * width) as u8)
            .collect()
    }

    /// Cycles for one PE to drain its lane queues; idle PEs still take one
    pub fn pe_cycles(mut offsets: Vec<VecDeque<u8>>, bits_first_stage: u32) -> u64 {
        let max_offset_first_stage = ((1u32 << bits_first_stage) - 1) as u8;
        let mut cycles = 0;

        loop {
            let Some(two_stage_offset) = offsets.iter().filter_map(|q| q.front().copied()).min() else {
                break;
            };
            let max_offset = two_stage_offset.saturating_add(max_offset_first_stage);
            for lane in offsets.iter_mut() {
                if lane.front().is_some_and(|&o| o <= max_offset) {
                    lane.pop_front();
                }
            }
            cycles += 1;
        }

        cycles.max(1)
    }

    fn row_cycles(&self, tile: &TileData<'_>, column: usize, row: usize, blk: usize) -> u64 {
        let offsets = tile.row_acts(column, row).map(|act| self.lane_offsets(act, blk)).collect();
        Self::pe_cycles(offsets, self.bits_first_stage)
    }

    /// Slowest row of `column` over every valid tile, `None` if no tile
    /// has a window there
    fn column_cycles(&self, tiles: &[TileData<'_>], column: usize, blk: usize) -> Option<u64> {
        tiles
            .iter()
            .filter(|t| t.valid && column < t.windows)
            .flat_map(|t| (0..t.cost_rows()).map(move |row| self.row_cycles(t, column, row, blk)))
            .max()
    }
}

impl Architecture for BitPragmatic {
    fn core(&self) -> &ArchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ArchCore {
        &mut self.core
    }

    fn name(&self) -> String {
        let base = if self.tactical { "BitTacticalP" } else { "BitPragmatic" };
        if self.diffy {
            format!("{}Diffy", base)
        } else {
            base.to_string()
        }
    }

    fn filename(&self) -> String {
        format!(
            "{}_B{}{}",
            self.core.filename(),
            self.bits_first_stage,
            match self.registers {
                ColumnRegisters::One => "",
                ColumnRegisters::Two => "_CR2",
            }
        )
    }

    fn header(&self) -> String {
        let mut header = self.core.header();
        header += &format!("Number of bits for first stage shifter: {}\n", self.bits_first_stage);
        header += &format!(
            "Number of run-ahead registers per column: {}\n",
            match self.registers {
                ColumnRegisters::One => 1,
                ColumnRegisters::Two => 2,
            }
        );
        header
    }

    fn filename_pot(&self) -> String {
        String::new()
    }

    fn header_pot(&self) -> String {
        String::new()
    }

    fn diffy(&self) -> bool {
        self.diffy
    }

    fn schedule(&self) -> bool {
        self.tactical
    }

    fn convert_data(&self, data: &mut Tensor, prec: u32) {
        if !self.diffy {
            data.powers_of_two_representation(prec);
        }
    }

    fn process_tiles(&mut self, tiles: &[TileData<'_>], ctx: &SimContext) -> SimResult<()> {
        let blks = self.core.act_blks();

        if self.core.params.linear {
            let cost = (0..blks)
                .filter_map(|blk| self.column_cycles(tiles, 0, blk))
                .max();
            if let Some(cost) = cost {
                self.core.issue_linear(cost);
            }
        } else {
            for column in 0..self.core.params.ef_columns as usize {
                for blk in 0..blks {
                    if let Some(cost) = self.column_cycles(tiles, column, blk) {
                        self.core.add_block_cost(column, blk, cost);
                    }
                }
            }
            self.core.sync(self.registers, ctx);
        }

        self.core.record_activity(tiles);
        Ok(())
    }

    /// One-bit products of one pair: booth digits of the activation times
    /// the weight width, so `bit_mult` counts single-bit multiplications.
    fn compute_bits(&self, act: u16, _wgt: u16) -> u16 {
        let width = match self.core.params.network_width {
            0 => 16,
            w => w as u16,
        };
        let bits = booth_encoding(act).count_ones() as u16 * width;
        bits.max(1)
    }
}
