//! Dynamic per-group precision variant
//!
//! A group of activations is processed serially over the span of bit
//! positions its values actually use. A group cannot finish before its
//! activations were fetched, one on-chip row per cycle. Rows read by the
//! previous step are still resident and cost nothing.

use serde::{Deserialize, Serialize};

use crate::architecture::{ArchCore, Architecture, ColumnRegisters, LayerParams, PeArrayConfig, SimContext, TileData};
use crate::bits::min_max;
use crate::error::SimResult;
use crate::tensor::Tensor;

/// Set of activations sharing one detected precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PrecisionGranularity {
    /// Every column of the step
    #[default]
    Tile,
    /// Each column on its own
    Sip,
}

#[derive(Debug, Clone)]
pub struct DynamicStripes {
    core: ArchCore,
    granularity: PrecisionGranularity,
    registers: ColumnRegisters,
    diffy: bool,
    tactical: bool,
    /// On-chip rows read by the previous step
    resident: Vec<u64>,
}

/// Running lowest and highest set bit of a group
#[derive(Debug, Clone, Copy)]
struct BitSpan {
    min_bit: u8,
    max_bit: u8,
}

impl BitSpan {
    fn empty() -> Self {
        Self { min_bit: 16, max_bit: 0 }
    }

    fn add(&mut self, value: u16) {
        let (min_bit, max_bit) = min_max(value);
        self.min_bit = self.min_bit.min(min_bit);
        self.max_bit = self.max_bit.max(max_bit);
    }

    fn merge(&mut self, other: BitSpan) {
        self.min_bit = self.min_bit.min(other.min_bit);
        self.max_bit = self.max_bit.max(other.max_bit);
    }

    /// Bits to process; an all-zero group still takes one
    fn width(&self) -> u64 {
        if self.min_bit > self.max_bit {
            1
        } else {
            (self.max_bit - self.min_bit) as u64 + 1
        }
    }
}

impl DynamicStripes {
    pub fn new(
        array: PeArrayConfig,
        granularity: PrecisionGranularity,
        registers: ColumnRegisters,
        diffy: bool,
        tactical: bool,
    ) -> Self {
        Self {
            core: ArchCore::new(array),
            granularity,
            registers,
            diffy,
            tactical,
            resident: Vec::new(),
        }
    }

    fn magnitude(&self, act: u16) -> u16 {
        if self.diffy {
            (act as i16).unsigned_abs()
        } else {
            act
        }
    }

    fn column_span(&self, tiles: &[TileData<'_>], column: usize) -> Option<BitSpan> {
        let mut span = BitSpan::empty();
        let mut any = false;
        for tile in tiles.iter().filter(|t| t.valid && column < t.windows) {
            any = true;
            for row in 0..tile.cost_rows() {
                for act in tile.row_acts(column, row) {
                    span.add(self.magnitude(act));
                }
            }
        }
        any.then_some(span)
    }

    /// On-chip rows this step reads that the previous step did not.
    ///
    /// A tile at buffer time 0 starts a new pass over a window buffer, so
    /// nothing is resident yet.
    fn fill_cycles(&mut self, tiles: &[TileData<'_>], columns: usize) -> u64 {
        if tiles.iter().any(|t| t.valid && t.time == 0) {
            self.resident.clear();
        }
        let mut rows: Vec<u64> = Vec::new();
        for tile in tiles.iter().filter(|t| t.valid) {
            for column in 0..columns.min(tile.windows) {
                for row in 0..tile.cost_rows() {
                    for lane in 0..tile.lanes {
                        if let Some(nm_row) = tile.nm_row(column, row, lane) {
                            if !rows.contains(&nm_row) {
                                rows.push(nm_row);
                            }
                        }
                    }
                }
            }
        }
        let fill = rows.iter().filter(|r| !self.resident.contains(r)).count() as u64;
        self.resident = rows;
        fill
    }

    fn granularity_name(&self) -> &'static str {
        match self.granularity {
            PrecisionGranularity::Tile => "Tile",
            PrecisionGranularity::Sip => "SIP",
        }
    }
}

impl Architecture for DynamicStripes {
    fn core(&self) -> &ArchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ArchCore {
        &mut self.core
    }

    fn name(&self) -> String {
        let base = if self.tactical { "BitTacticalE" } else { "DynamicStripes" };
        if self.diffy {
            format!("{}Diffy", base)
        } else {
            base.to_string()
        }
    }

    fn filename(&self) -> String {
        format!("{}_PG_{}", self.core.filename(), self.granularity_name())
    }

    fn header(&self) -> String {
        let mut header = self.core.header();
        header += &format!("Dynamic Precision granularity: {}\n", self.granularity_name());
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

    fn configure_layer(&mut self, params: LayerParams) {
        self.core.configure(params);
        self.resident.clear();
    }

    fn convert_data(&self, data: &mut Tensor, prec: u32) {
        if !self.diffy {
            data.powers_of_two_representation(prec);
        }
    }

    fn process_tiles(&mut self, tiles: &[TileData<'_>], ctx: &SimContext) -> SimResult<()> {
        let linear = self.core.params.linear;
        let columns = if linear { 1 } else { self.core.params.ef_columns as usize };
        let fill = self.fill_cycles(tiles, columns);

        let spans: Vec<Option<BitSpan>> = (0..columns).map(|c| self.column_span(tiles, c)).collect();
        let tile_span = spans.iter().flatten().fold(BitSpan::empty(), |mut acc, s| {
            acc.merge(*s);
            acc
        });

        let costs: Vec<Option<u64>> = spans
            .iter()
            .map(|span| {
                span.map(|s| {
                    let bits = match self.granularity {
                        PrecisionGranularity::Tile => tile_span.width(),
                        PrecisionGranularity::Sip => s.width(),
                    };
                    bits.max(fill)
                })
            })
            .collect();

        if linear {
            if let Some(cost) = costs[0] {
                self.core.issue_linear(cost);
            }
        } else {
            for (column, cost) in costs.into_iter().enumerate() {
                if let Some(cost) = cost {
                    self.core.add_column_cost(column, cost);
                }
            }
            self.core.sync(self.registers, ctx);
        }

        self.core.record_activity(tiles);
        Ok(())
    }

    fn compute_bits(&self, _act: u16, _wgt: u16) -> u16 {
        let width = match self.core.params.network_width {
            0 => 16,
            w => w,
        };
        (self.core.params.act_prec * width).max(1) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferEntry, WindowBuffer};
    use pretty_assertions::assert_eq;

    fn stripes(granularity: PrecisionGranularity) -> DynamicStripes {
        let mut arch = DynamicStripes::new(
            PeArrayConfig::new(2, 2, 1, 1, 16),
            granularity,
            ColumnRegisters::Two,
            false,
            false,
        );
        arch.configure_layer(LayerParams {
            act_prec: 8,
            wgt_prec: 8,
            act_blks: 1,
            wgt_blks: 1,
            network_width: 16,
            signed_act: false,
            signed_wgt: true,
            linear: false,
            ef_columns: 2,
        });
        arch
    }

    fn window_buffer(values: [u16; 4], rows: [u64; 4]) -> WindowBuffer {
        let mut wb = WindowBuffer::new(1, 4, 0);
        for pos in 0..4 {
            wb.set(0, pos, BufferEntry::new(values[pos], 0, (pos % 2) as u16), rows[pos]);
        }
        wb
    }

    fn tile<'a>(weights: &'a [BufferEntry], wb: &'a WindowBuffer) -> TileData<'a> {
        TileData {
            valid: true,
            time: 0,
            windows: 2,
            filters: 1,
            lanes: 2,
            weights,
            window_buffer: wb,
            scheduled: false,
            linear: false,
            ef_columns: 2,
        }
    }

    #[test]
    fn test_span_width() {
        let mut span = BitSpan::empty();
        assert_eq!(span.width(), 1);
        span.add(0b0110);
        assert_eq!(span.width(), 2);
        span.add(0b1000_0000);
        assert_eq!(span.width(), 7);
    }

    #[test]
    fn test_sip_granularity() {
        let weights = vec![BufferEntry::new(1, 0, 0); 2];
        // Column 0 spans bits 0..=3, column 1 only bit 0
        let wb = window_buffer([0b1000, 0b1, 0b1, 0], [0, 0, 0, 0]);
        let ctx = SimContext::new();

        let mut sip = stripes(PrecisionGranularity::Sip);
        sip.process_tiles(&[tile(&weights, &wb)], &ctx).unwrap();
        assert_eq!(sip.core().column_cycles(), &[4, 1]);

        let mut whole = stripes(PrecisionGranularity::Tile);
        whole.process_tiles(&[tile(&weights, &wb)], &ctx).unwrap();
        assert_eq!(whole.core().column_cycles(), &[4, 4]);
    }

    #[test]
    fn test_fill_cycles_bound() {
        let weights = vec![BufferEntry::new(1, 0, 0); 2];
        // Four distinct rows outweigh a one-bit span
        let wb = window_buffer([1, 1, 1, 1], [0, 1, 2, 3]);
        let ctx = SimContext::new();
        let mut arch = stripes(PrecisionGranularity::Sip);
        arch.process_tiles(&[tile(&weights, &wb)], &ctx).unwrap();
        assert_eq!(arch.core().column_cycles(), &[4, 4]);
    }

    #[test]
    fn test_resident_rows_skip_fill() {
        let weights = vec![BufferEntry::new(1, 0, 0); 2];
        let mut wb = WindowBuffer::new(2, 4, 0);
        for time in 0..2 {
            for pos in 0..4 {
                wb.set(time, pos, BufferEntry::new(1, time as u32, (pos % 2) as u16), pos as u64);
            }
        }
        let ctx = SimContext::new();
        let mut arch = stripes(PrecisionGranularity::Sip);

        arch.process_tiles(&[tile(&weights, &wb)], &ctx).unwrap();
        assert_eq!(arch.core().column_cycles(), &[4, 4]);

        // Same rows again: only the one-bit span is paid
        let second = TileData { time: 1, ..tile(&weights, &wb) };
        arch.process_tiles(&[second], &ctx).unwrap();
        assert_eq!(arch.core().column_cycles(), &[5, 5]);

        // A new pass over the buffer refetches every row
        arch.process_tiles(&[tile(&weights, &wb)], &ctx).unwrap();
        assert_eq!(arch.core().column_cycles(), &[9, 9]);
    }

    #[test]
    fn test_configure_layer_drops_resident_rows() {
        let weights = vec![BufferEntry::new(1, 0, 0); 2];
        let wb = window_buffer([1, 1, 1, 1], [0, 1, 2, 3]);
        let ctx = SimContext::new();
        let mut arch = stripes(PrecisionGranularity::Sip);
        arch.process_tiles(&[tile(&weights, &wb)], &ctx).unwrap();
        assert_eq!(arch.resident.len(), 4);
        arch.configure_layer(LayerParams::default());
        assert!(arch.resident.is_empty());
    }

    #[test]
    fn test_compute_bits() {
        let arch = stripes(PrecisionGranularity::Tile);
        assert_eq!(arch.compute_bits(3, 3), 128);
        assert_eq!(arch.name(), "DynamicStripes");
        assert_eq!(arch.filename(), "_L2_C2_R1_T1_BP16_PG_Tile");
    }
}
