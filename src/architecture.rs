//! Processing-element array model
//!
//! [`Architecture`] is the seam between the dataflow controller and the
//! bit-serial compute-time variants. The controller feeds one batch of tiles
//! per step through [`Architecture::process_tiles`]; the variant turns the
//! tile data into per-column cycle costs and [`ArchCore`] keeps the columns
//! synchronized and drives the ready/done state machine against the
//! [`SimContext`] cycle.

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferEntry, WindowBuffer};
use crate::error::{SimError, SimResult};
use crate::memory::NULL_ADDR;
use crate::tensor::Tensor;

/// Structural configuration of the PE array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeArrayConfig {
    /// Concurrent one-bit multiplications per PE
    pub lanes: u32,
    /// Windows processed in parallel
    pub columns: u32,
    /// Filters processed in parallel
    pub rows: u32,
    /// Row groups processed in parallel
    pub tiles: u32,
    /// PE input bit-width
    pub pe_width: u32,
}

impl PeArrayConfig {
    pub fn new(lanes: u32, columns: u32, rows: u32, tiles: u32, pe_width: u32) -> Self {
        Self {
            lanes,
            columns,
            rows,
            tiles,
            pe_width,
        }
    }

    /// Total one-bit multipliers in the array
    pub fn multipliers(&self) -> u64 {
        self.lanes as u64 * self.columns as u64 * self.rows as u64 * self.tiles as u64
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.lanes == 0 || self.columns == 0 || self.rows == 0 || self.tiles == 0 {
            return Err(SimError::config("lanes, columns, rows and tiles must be positive"));
        }
        if self.pe_width == 0 || self.pe_width > 16 {
            return Err(SimError::config(format!(
                "PE width must be within 1..=16, got {}",
                self.pe_width
            )));
        }
        Ok(())
    }

    /// Ideal cycle count when no column ever stalls
    pub fn ideal_cycles(&self, windows: u64, channels: u64, filters: u64, kx: u64, ky: u64) -> u64 {
        windows.div_ceil(self.columns as u64)
            * channels.div_ceil(self.lanes as u64)
            * filters.div_ceil(self.rows as u64 * self.tiles as u64)
            * kx
            * ky
    }

    /// Multipliers left without work over a whole layer
    pub fn idle_lanes(&self, windows: u64, channels: u64, filters: u64, kx: u64, ky: u64) -> u64 {
        let steps = windows.div_ceil(self.columns as u64)
            * channels.div_ceil(self.lanes as u64)
            * filters.div_ceil(self.rows as u64 * self.tiles as u64);
        (steps * self.multipliers() - windows * channels * filters) * kx * ky
    }

    /// PEs left without work over a whole layer.
    ///
    /// With `with_tiles` the rows of every tile form one filter batch. A
    /// single-window layer only occupies one column.
    pub fn idle_pes(
        &self,
        windows: u64,
        channels: u64,
        filters: u64,
        kx: u64,
        ky: u64,
        with_tiles: bool,
    ) -> u64 {
        let rows = if with_tiles {
            self.rows as u64 * self.tiles as u64
        } else {
            self.rows as u64
        };
        let filter_chunks = filters.div_ceil(rows);
        let idle = if windows == 1 {
            filter_chunks * rows - filters
        } else {
            let columns = self.columns as u64;
            filter_chunks * windows.div_ceil(columns) * rows * columns - windows * filters
        };
        idle * channels.div_ceil(self.lanes as u64) * kx * ky
    }
}

impl Default for PeArrayConfig {
    fn default() -> Self {
        Self::new(16, 16, 16, 1, 16)
    }
}

/// Per-layer configuration handed to the architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerParams {
    pub act_prec: u32,
    pub wgt_prec: u32,
    /// Activation slices of `pe_width` bits
    pub act_blks: u32,
    /// Weight slices of `pe_width` bits
    pub wgt_blks: u32,
    pub network_width: u32,
    pub signed_act: bool,
    pub signed_wgt: bool,
    pub linear: bool,
    /// Columns actually usable for this layer
    pub ef_columns: u32,
}

/// Simulation-wide cycle shared by the controller and the architecture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimContext {
    pub global_cycle: u64,
}

impl SimContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) {
        self.global_cycle += 1;
    }

    /// Move forward to `cycle`, never backwards
    pub fn advance_to(&mut self, cycle: u64) {
        self.global_cycle = self.global_cycle.max(cycle);
    }
}

/// Column synchronization policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColumnRegisters {
    /// Columns stay lock-stepped with the slowest one
    #[default]
    One,
    /// Columns run ahead, each starts a tile after the previous tile ends
    Two,
}

/// Counters and synchronization state shared by every variant
#[derive(Debug, Clone, Default)]
pub struct ArchCore {
    pub array: PeArrayConfig,
    pub params: LayerParams,
    column_cycles: Vec<u64>,
    column_index: usize,
    end_previous_pallet: u64,
    cycles: u64,
    ready_cycle: u64,
    done_cycle: u64,
    scheduled_pe: u64,
    idle_pe: u64,
}

impl ArchCore {
    pub fn new(array: PeArrayConfig) -> Self {
        Self {
            array,
            ..Self::default()
        }
    }

    /// Reset every counter for a new layer
    pub fn configure(&mut self, params: LayerParams) {
        let counters = if params.linear {
            params.ef_columns
        } else {
            params.ef_columns * params.act_blks.max(1)
        };
        self.params = params;
        self.column_cycles = vec![0; counters as usize];
        self.column_index = 0;
        self.end_previous_pallet = 0;
        self.cycles = 0;
        self.ready_cycle = 0;
        self.done_cycle = 0;
        self.scheduled_pe = 0;
        self.idle_pe = 0;
    }

    pub fn act_blks(&self) -> usize {
        self.params.act_blks.max(1) as usize
    }

    pub fn column_cycles(&self) -> &[u64] {
        &self.column_cycles
    }

    /// Charge `cost` cycles to one activation slice of a column
    pub fn add_block_cost(&mut self, column: usize, blk: usize, cost: u64) {
        let idx = column * self.act_blks() + blk;
        self.column_cycles[idx] += cost;
    }

    /// Charge `cost` cycles to every slice of a column
    pub fn add_column_cost(&mut self, column: usize, cost: u64) {
        for blk in 0..self.act_blks() {
            self.add_block_cost(column, blk, cost);
        }
    }

    fn slowest_column(&self) -> u64 {
        self.column_cycles.iter().copied().max().unwrap_or(0)
    }

    /// Lock all columns to the slowest one
    pub fn sync_one_register(&mut self) {
        let slowest = self.slowest_column();
        self.column_cycles.iter_mut().for_each(|c| *c = slowest);
        self.cycles = slowest;
        self.ready_cycle = slowest;
        self.done_cycle = slowest;
    }

    /// Floor every column at the end of the previous tile plus one
    pub fn sync_two_registers(&mut self, ctx: &SimContext) {
        let floor = self.end_previous_pallet + 1;
        for c in self.column_cycles.iter_mut() {
            if *c < floor {
                *c = floor;
            }
        }
        self.end_previous_pallet = self.slowest_column();
        self.cycles = self.end_previous_pallet;
        self.ready_cycle = ctx.global_cycle + 1;
        self.done_cycle = self.end_previous_pallet;
    }

    pub fn sync(&mut self, registers: ColumnRegisters, ctx: &SimContext) {
        match registers {
            ColumnRegisters::One => self.sync_one_register(),
            ColumnRegisters::Two => self.sync_two_registers(ctx),
        }
    }

    /// Issue one channel block of a linear layer on the next free column.
    ///
    /// One block issues per cycle; a block waits until its column has
    /// finished the previous one.
    pub fn issue_linear(&mut self, cost: u64) {
        let column = self.column_index;
        if self.cycles < self.column_cycles[column] {
            self.cycles = self.column_cycles[column];
        }
        self.column_cycles[column] = self.cycles + cost;
        self.cycles += 1;
        self.column_index = (column + 1) % self.column_cycles.len();
        self.ready_cycle = self.cycles;
        self.done_cycle = self.slowest_column();
    }

    pub fn record_activity(&mut self, tiles: &[TileData<'_>]) {
        let active: u64 = tiles
            .iter()
            .filter(|t| t.valid)
            .map(|t| (t.windows * t.filters) as u64)
            .sum();
        let capacity = self.params.ef_columns.max(1) as u64 * self.array.rows as u64 * self.array.tiles as u64;
        self.scheduled_pe += active;
        self.idle_pe += capacity.saturating_sub(active);
    }

    pub fn scheduled_pe(&self) -> u64 {
        self.scheduled_pe
    }

    pub fn idle_pe(&self) -> u64 {
        self.idle_pe
    }

    pub fn filename(&self) -> String {
        format!(
            "_L{}_C{}_R{}_T{}_BP{}",
            self.array.lanes, self.array.columns, self.array.rows, self.array.tiles, self.array.pe_width
        )
    }

    pub fn header(&self) -> String {
        let mut header = format!("Number of lanes/terms per PE: {}\n", self.array.lanes);
        header += &format!("Number of columns/windows in parallel: {}\n", self.array.columns);
        header += &format!("Number of rows/filters in parallel: {}\n", self.array.rows);
        header += &format!("Number of tiles: {}\n", self.array.tiles);
        header += &format!("PE input bit-width: {}\n", self.array.pe_width);
        header
    }
}

/// Data one tile consumes during one step
#[derive(Debug, Clone, Copy)]
pub struct TileData<'a> {
    pub valid: bool,
    /// Buffer time step of this tile
    pub time: usize,
    /// Columns holding a window
    pub windows: usize,
    /// Rows holding a filter
    pub filters: usize,
    pub lanes: usize,
    /// Weight buffer row for this step, `rows * lanes` entries
    pub weights: &'a [BufferEntry],
    pub window_buffer: &'a WindowBuffer,
    /// Weights were compacted and must be paired by their original slot
    pub scheduled: bool,
    pub linear: bool,
    pub ef_columns: usize,
}

impl<'a> TileData<'a> {
    pub fn idle(weights: &'a [BufferEntry], window_buffer: &'a WindowBuffer, lanes: usize) -> Self {
        Self {
            valid: false,
            time: 0,
            windows: 0,
            filters: 0,
            lanes,
            weights,
            window_buffer,
            scheduled: false,
            linear: false,
            ef_columns: 1,
        }
    }

    fn position(&self, column: usize, time: usize, lane: usize) -> (usize, usize) {
        let column = if self.linear {
            time % self.ef_columns.max(1)
        } else {
            column
        };
        (time, column * self.lanes + lane)
    }

    /// Slot of the activation multiplied by `(row, lane)`, `None` when a
    /// compacted weight slot is empty
    fn slot(&self, column: usize, row: usize, lane: usize) -> Option<(usize, usize)> {
        if self.scheduled {
            let wgt = self.weights[row * self.lanes + lane];
            if wgt.value == 0 {
                return None;
            }
            Some(self.position(column, wgt.time as usize, wgt.lane as usize))
        } else {
            Some(self.position(column, self.time, lane))
        }
    }

    pub fn wgt(&self, row: usize, lane: usize) -> u16 {
        self.weights[row * self.lanes + lane].value
    }

    pub fn act(&self, column: usize, row: usize, lane: usize) -> Option<u16> {
        self.slot(column, row, lane)
            .map(|(time, pos)| self.window_buffer.get(time, pos).value)
    }

    /// On-chip row of the activation, `None` for padding lanes
    pub fn nm_row(&self, column: usize, row: usize, lane: usize) -> Option<u64> {
        self.slot(column, row, lane)
            .map(|(time, pos)| self.window_buffer.nm_row(time, pos))
            .filter(|&r| r != NULL_ADDR)
    }

    /// Activations each row of `column` multiplies this step
    pub fn row_acts(&self, column: usize, row: usize) -> impl Iterator<Item = u16> + '_ {
        (0..self.lanes).filter_map(move |lane| self.act(column, row, lane))
    }

    /// Rows whose cost must be evaluated; unscheduled rows share activations
    pub fn cost_rows(&self) -> usize {
        if self.scheduled {
            self.filters
        } else {
            self.filters.min(1)
        }
    }
}

/// A pluggable bit-serial compute-time model
pub trait Architecture: Send {
    fn core(&self) -> &ArchCore;

    fn core_mut(&mut self) -> &mut ArchCore;

    fn name(&self) -> String;

    /// Statistics file suffix for the cycles task
    fn filename(&self) -> String {
        self.core().filename()
    }

    /// Statistics header for the cycles task
    fn header(&self) -> String {
        self.core().header()
    }

    /// Statistics file suffix for the potentials task
    fn filename_pot(&self) -> String;

    /// Statistics header for the potentials task
    fn header_pot(&self) -> String;

    /// Consume activations delta-encoded against the previous window
    fn diffy(&self) -> bool;

    /// Consume a compacted weight schedule
    fn schedule(&self) -> bool;

    /// Convert tensor data to the representation the variant expects
    fn convert_data(&self, _data: &mut Tensor, _prec: u32) {}

    /// Update column cycles for one step of every tile
    fn process_tiles(&mut self, tiles: &[TileData<'_>], ctx: &SimContext) -> SimResult<()>;

    /// One-bit multiplications a PE spends on one pair
    fn compute_bits(&self, act: u16, wgt: u16) -> u16;

    fn configure_layer(&mut self, params: LayerParams) {
        self.core_mut().configure(params);
    }

    fn ready(&self, ctx: &SimContext) -> bool {
        self.core().ready_cycle <= ctx.global_cycle
    }

    fn done(&self, ctx: &SimContext) -> bool {
        self.core().done_cycle <= ctx.global_cycle
    }

    /// Pipeline fully drained for the current layer
    fn flush(&self, ctx: &SimContext) -> bool {
        self.done(ctx)
    }

    fn ready_cycle(&self) -> u64 {
        self.core().ready_cycle
    }

    fn done_cycle(&self) -> u64 {
        self.core().done_cycle
    }

    fn cycles(&self) -> u64 {
        self.core().cycles.max(self.core().done_cycle)
    }
}
