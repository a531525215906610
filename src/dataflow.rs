//! Output-stationary dataflow controller
//!
//! [`OutputStationary::configure_layer`] builds every per-layer structure
//! up front: weight buffer (optionally compacted by the scheduler), DRAM
//! address and bank maps, and the window steps that fit the on-chip
//! activation buffer. The result is read-only, so any number of images can
//! be timed against it concurrently with [`OutputStationary::process_image`].

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, trace};

use crate::architecture::{Architecture, PeArrayConfig, SimContext, TileData};
use crate::bits::WindowIterator;
use crate::buffer::{bank_conflicts, AccessBuffer, BufferEntry, WeightBuffer, WindowBuffer};
use crate::error::{SimError, SimResult};
use crate::layer::Layer;
use crate::memory::{AddressRange, Dram, GlobalBuffer, NULL_ADDR};
use crate::tactical::{check_schedule, update_schedule, BitTactical, Schedule, ScheduleLayout, ScheduleStep};
use crate::tensor::Tensor;

/// Hardware the controller plans against
#[derive(Debug, Clone, Default)]
pub struct ControlConfig {
    pub array: PeArrayConfig,
    pub dram: Dram,
    pub gbuffer: GlobalBuffer,
    /// Weight scheduler, required by variants consuming a schedule
    pub tactical: Option<BitTactical>,
}

/// Timing and traffic of one image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageStats {
    pub cycles: u64,
    pub steps: u64,
    pub act_on_chip: u64,
    pub wgt_on_chip: u64,
    pub act_off_chip: u64,
    pub wgt_off_chip: u64,
    pub bank_conflicts: u64,
    pub outputs: u64,
    pub scheduled_pe: u64,
    pub idle_pe: u64,
}

#[derive(Debug, Clone)]
pub struct OutputStationary {
    act: Tensor,
    dram: Dram,
    gbuffer: GlobalBuffer,

    linear: bool,
    depthwise: bool,
    diffy: bool,
    scheduled: bool,

    act_channels: usize,
    nx: usize,
    ny: usize,
    num_filters: usize,
    wgt_channels: usize,
    kx: usize,
    ky: usize,
    stride: usize,
    out_x: usize,
    out_y: usize,

    ef_lanes: usize,
    ef_columns: usize,
    ef_rows: usize,
    tiles: usize,

    groups: usize,
    filters_per_group: usize,
    window_sets: usize,
    filter_sets: usize,
    max_buffer_time: usize,

    windows: Vec<Vec<(usize, usize)>>,
    window_steps: Vec<Vec<usize>>,

    weight_buffer: WeightBuffer,
    schedule: Option<Schedule>,
    wgt_address_buffer: AccessBuffer<u64>,
    wgt_bank_buffer: AccessBuffer<Option<u32>>,
    wgt_address_map: Vec<AddressRange>,

    act_channel_blks: usize,
    act_address_map: Vec<u64>,
    act_bank_map: Vec<u32>,
}

impl OutputStationary {
    /// Plan a layer. `act` and `wgt` are the padded, converted tensors.
    pub fn configure_layer<A: Architecture + ?Sized>(
        layer: &Layer,
        mut act: Tensor,
        mut wgt: Tensor,
        config: &ControlConfig,
        arch: &A,
    ) -> SimResult<Self> {
        config.array.validate()?;
        config.dram.validate()?;
        config.gbuffer.validate()?;

        let scheduled = arch.schedule();
        let tactical = match (&config.tactical, scheduled) {
            (Some(tactical), true) => Some(tactical),
            (None, true) => {
                return Err(SimError::config(format!(
                    "{} consumes a weight schedule but no scheduler is configured",
                    arch.name()
                )))
            }
            (_, false) => None,
        };

        let linear = layer.is_linear();
        if linear {
            act.reshape_to_2d();
            wgt.reshape_to_2d();
        }

        let [_, act_channels, nx, ny] = act.shape;
        let [num_filters, wgt_channels, kx, ky] = wgt.shape;
        let stride = if linear { 1 } else { layer.stride };
        if nx < kx || ny < ky {
            return Err(SimError::shape(format!("layer {}: kernel larger than input", layer.name)));
        }
        let out_x = (nx - kx) / stride + 1;
        let out_y = (ny - ky) / stride + 1;

        let array = &config.array;
        let mut ef_lanes = array.lanes as usize;
        let mut ef_rows = array.rows as usize;
        let ef_columns = array.columns as usize;

        let depthwise = wgt_channels == 1 && act_channels != 1;
        let (groups, filters_per_group) = if depthwise {
            let min_dim = ef_lanes.min(ef_rows);
            ef_lanes = min_dim;
            ef_rows = min_dim;
            (num_filters.div_ceil(min_dim), min_dim)
        } else {
            let groups = if act_channels / wgt_channels == 2 { 2 } else { 1 };
            (groups, num_filters.div_ceil(groups))
        };

        let windows: Vec<Vec<(usize, usize)>> = if linear {
            vec![vec![(0, 0)]]
        } else {
            WindowIterator::new(out_x, out_y, ef_columns).collect()
        };
        let window_sets = windows.len();
        let filter_sets = filters_per_group.div_ceil(ef_rows);
        let round_wgt_channels = wgt_channels.div_ceil(ef_lanes) * ef_lanes;
        let max_buffer_time = (round_wgt_channels * kx * ky).div_ceil(ef_lanes);

        let mut plan = Self {
            act,
            dram: config.dram.clone(),
            gbuffer: config.gbuffer.clone(),
            linear,
            depthwise,
            diffy: arch.diffy(),
            scheduled,
            act_channels,
            nx,
            ny,
            num_filters,
            wgt_channels,
            kx,
            ky,
            stride,
            out_x,
            out_y,
            ef_lanes,
            ef_columns,
            ef_rows,
            tiles: array.tiles as usize,
            groups,
            filters_per_group,
            window_sets,
            filter_sets,
            max_buffer_time,
            windows,
            window_steps: Vec::new(),
            weight_buffer: WeightBuffer::new(0, 0, 0),
            schedule: None,
            wgt_address_buffer: AccessBuffer::new(0, 0, 0, NULL_ADDR),
            wgt_bank_buffer: AccessBuffer::new(0, 0, 0, None),
            wgt_address_map: Vec::new(),
            act_channel_blks: 0,
            act_address_map: Vec::new(),
            act_bank_map: Vec::new(),
        };

        debug!(
            layer = %layer.name,
            out_x,
            out_y,
            depthwise,
            groups,
            window_sets,
            filter_sets,
            max_buffer_time,
            "configured layer geometry"
        );

        plan.fill_weight_buffer(&wgt, tactical);
        plan.generate_memory_maps();
        plan.fill_window_steps()?;
        Ok(plan)
    }

    /// Group window sets into steps whose activations fit on chip.
    ///
    /// Sets are taken in arrival order; a step closes when the next set
    /// would overflow the activation buffer.
    fn fill_window_steps(&mut self) -> SimResult<()> {
        let window_out_size = (self.num_filters as u64 * self.dram.act_data_size as u64).div_ceil(8);
        let capacity = self.gbuffer.act_size;

        let mut position_on_chip = vec![false; self.nx * self.ny];
        let mut step: Vec<usize> = Vec::new();
        let mut step_size = 0u64;

        let mut ws = 0;
        while ws < self.window_sets {
            let mut new_positions: BTreeSet<(usize, usize)> = BTreeSet::new();
            let mut set_size = 0u64;

            for &(wx, wy) in &self.windows[ws] {
                let x_window = wx * self.stride;
                let y_window = wy * self.stride;
                for y in 0..self.ky {
                    for x in 0..self.kx {
                        let pos = (x_window + x, y_window + y);
                        if !position_on_chip[pos.1 * self.nx + pos.0] {
                            new_positions.insert(pos);
                        }
                    }
                }
                set_size += window_out_size;
            }
            set_size += (new_positions.len() as u64 * self.act_channels as u64 * self.dram.act_data_size as u64)
                .div_ceil(8);

            if step_size + set_size > capacity {
                if step.is_empty() {
                    return Err(SimError::capacity(format!(
                        "window set {} needs {} bytes, activation buffer holds {}",
                        ws, set_size, capacity
                    )));
                }
                trace!(sets = step.len(), bytes = step_size, "closing window step");
                self.window_steps.push(std::mem::take(&mut step));
                position_on_chip.iter_mut().for_each(|p| *p = false);
                step_size = 0;
                continue;
            }

            step_size += set_size;
            for (x, y) in new_positions {
                position_on_chip[y * self.nx + x] = true;
            }
            step.push(ws);
            ws += 1;
        }

        if !step.is_empty() {
            self.window_steps.push(step);
        }
        Ok(())
    }

    fn act_map_index(&self, y: usize, x: usize, blk: usize) -> usize {
        (y * self.nx + x) * self.act_channel_blks + blk
    }

    /// Address map (channel first, then x, then y) and the round-robin bank
    /// map, which restarts its rotation on every stride-aligned row
    fn generate_memory_maps(&mut self) {
        let values_per_block = self.dram.act_values_per_block() as usize;
        self.act_channel_blks = self.act_channels.div_ceil(values_per_block);

        let mut next_address = self.dram.start_act_address;
        self.act_address_map = Vec::with_capacity(self.nx * self.ny * self.act_channel_blks);
        for _y in 0..self.ny {
            for _x in 0..self.nx {
                for _k in 0..self.act_channel_blks {
                    self.act_address_map.push(next_address);
                    next_address += self.dram.width;
                }
            }
        }

        let banks = self.gbuffer.act_banks;
        let row_end = self.out_x * self.stride - 1;
        let mut bank = 0;
        let mut bkp_bank = 0;
        self.act_bank_map = Vec::with_capacity(self.nx * self.ny);
        for y in 0..self.ny {
            for x in 0..self.nx {
                let aligned = y % self.stride == 0;
                if aligned && x == 0 {
                    bank = bkp_bank;
                }
                self.act_bank_map.push(bank);
                bank = (bank + 1) % banks;
                if aligned && x == row_end {
                    bkp_bank = bank;
                }
            }
        }
    }

    fn fill_weight_buffer(&mut self, wgt: &Tensor, tactical: Option<&BitTactical>) {
        let lanes = self.ef_lanes;
        let sets = self.filter_sets * self.groups;
        let mut buffer = WeightBuffer::new(sets, self.max_buffer_time, self.ef_rows * lanes);

        for g in 0..self.groups {
            let start_group = self.filters_per_group * g;
            for m in 0..self.filters_per_group {
                let filter = start_group + m;
                if filter >= self.num_filters {
                    continue;
                }
                let set = g * self.filter_sets + m / self.ef_rows;
                let filter_pos = m % self.ef_rows;

                let mut buffer_time = 0;
                for y in 0..self.ky {
                    for x in 0..self.kx {
                        for k in (0..self.wgt_channels).step_by(lanes) {
                            let mut index = 0;
                            for ch in k..(k + lanes).min(self.wgt_channels) {
                                if self.depthwise {
                                    index = filter_pos;
                                }
                                let pos = filter_pos * lanes + index;
                                let entry = BufferEntry::new(wgt.get(filter, ch, x, y), buffer_time as u32, index as u16);
                                buffer.set(set, buffer_time, pos, entry);

                                index += 1;
                                if index == lanes {
                                    buffer_time += 1;
                                    index = 0;
                                }
                            }
                            if index != 0 {
                                buffer_time += 1;
                            }
                        }
                    }
                }
            }
        }

        if let Some(tactical) = tactical {
            tactical.schedule(&mut buffer, lanes);
            self.schedule = Some(tactical.dense_scheduler(
                &buffer,
                ScheduleLayout {
                    lanes,
                    kx: self.kx,
                    blocks: self.wgt_channels.div_ceil(lanes),
                    depthwise: self.depthwise,
                },
            ));
        }
        self.weight_buffer = buffer;

        self.generate_weight_addresses(tactical);
    }

    /// Weight addresses and banks per buffer line. Up to `H` consecutive
    /// zero lines of a compacted buffer are never fetched.
    fn generate_weight_addresses(&mut self, tactical: Option<&BitTactical>) {
        let mut accesses_per_filter = (self.ef_lanes as u64).div_ceil(self.dram.wgt_values_per_block()) as usize
            * self.ef_rows;
        if let Some(tactical) = tactical {
            let metadata = (self.ef_lanes as u64 * tactical.metadata_bits() as u64).div_ceil(self.dram.width * 8);
            accesses_per_filter += metadata as usize * self.ef_rows;
        }

        let sets = self.filter_sets * self.groups;
        let skipped = |buffer: &WeightBuffer, set: usize, time: usize, skip: &mut usize| -> bool {
            if let Some(tactical) = tactical {
                if *skip < tactical.lookahead() && tactical.check_zero_line(buffer.row(set, time)) {
                    *skip += 1;
                    return true;
                }
                *skip = 0;
            }
            false
        };

        let mut addresses = AccessBuffer::new(sets, self.max_buffer_time, accesses_per_filter, NULL_ADDR);
        let mut next_address = self.dram.start_wgt_address;
        let mut ranges = Vec::new();
        for g in 0..self.groups {
            for m in (0..self.filter_sets).step_by(self.tiles) {
                let first = next_address;
                let mut skip_buf = vec![0; self.tiles];
                for y in 0..self.max_buffer_time {
                    for (t, skip) in skip_buf.iter_mut().enumerate() {
                        if m + t >= self.filter_sets {
                            continue;
                        }
                        let set = g * self.filter_sets + m + t;
                        if skipped(&self.weight_buffer, set, y, skip) {
                            continue;
                        }
                        for slot in 0..accesses_per_filter {
                            addresses.set(set, y, slot, next_address);
                            next_address += self.dram.width;
                        }
                    }
                }
                if next_address != first {
                    ranges.push((first, next_address - self.dram.width));
                }
            }
        }

        let mut banks = AccessBuffer::new(sets, self.max_buffer_time, accesses_per_filter, None);
        let mut bank = 0;
        for set in 0..sets {
            for slot in 0..accesses_per_filter {
                let mut skip_buf = 0;
                for y in 0..self.max_buffer_time {
                    if skipped(&self.weight_buffer, set, y, &mut skip_buf) {
                        continue;
                    }
                    banks.set(set, y, slot, Some(bank));
                }
                bank = (bank + 1) % self.gbuffer.wgt_banks;
            }
        }

        self.wgt_address_buffer = addresses;
        self.wgt_bank_buffer = banks;
        self.wgt_address_map = ranges;
    }

    /// Lay out one group of windows of `image` over buffer time
    pub fn fill_window_buffer(
        &self,
        image: usize,
        windows: &[(usize, usize)],
        group: usize,
    ) -> SimResult<WindowBuffer> {
        if windows.is_empty() {
            return Err(SimError::EmptyWindows);
        }

        let lanes = self.ef_lanes;
        let values_per_block = self.dram.act_values_per_block() as usize;
        let accesses_per_window = lanes.div_ceil(values_per_block);
        let mut buffer = WindowBuffer::new(
            self.max_buffer_time,
            self.ef_columns * lanes,
            accesses_per_window * windows.len(),
        );

        let channels = if self.depthwise {
            self.filters_per_group
        } else {
            self.wgt_channels
        };
        let start_group = group * channels;

        let mut next_column = 0;
        for (w, &(wx, wy)) in windows.iter().enumerate() {
            let x_window = wx * self.stride;
            let y_window = wy * self.stride;

            let mut buffer_time = 0;
            for y in 0..self.ky {
                for x in 0..self.kx {
                    for k in (0..channels).step_by(lanes) {
                        let mut index = 0;
                        for ch in k..(k + lanes).min(channels) {
                            let channel = start_group + ch;
                            if channel >= self.act_channels {
                                continue;
                            }
                            let (ax, ay) = (x_window + x, y_window + y);

                            let mut act = self.act.get(image, channel, ax, ay);
                            if self.diffy && !self.linear {
                                let prev = if x_window < self.stride {
                                    0
                                } else {
                                    self.act.get(image, channel, ax - self.stride, ay)
                                };
                                act = (act as i16).wrapping_sub(prev as i16) as u16;
                            }

                            let address = self.act_address_map[self.act_map_index(ay, ax, channel / values_per_block)];
                            let nm_row = (address - self.dram.start_act_address) / self.gbuffer.row_size;

                            let column = if self.linear { next_column } else { w };
                            let pos = column * lanes + index;
                            buffer.set(buffer_time, pos, BufferEntry::new(act, buffer_time as u32, index as u16), nm_row);

                            let addr_pos = w * accesses_per_window + index / values_per_block;
                            buffer.set_access(buffer_time, addr_pos, address, self.act_bank_map[ay * self.nx + ax]);

                            index += 1;
                            if index == lanes {
                                buffer_time += 1;
                                index = 0;
                            }
                        }
                        if index != 0 {
                            buffer_time += 1;
                        }
                        if self.linear {
                            next_column = (next_column + 1) % self.ef_columns;
                        }
                    }
                }
            }
        }

        Ok(buffer)
    }

    /// Compressed DRAM ranges holding every kernel position of windows
    /// `start_window..end_window` over channel blocks `start_blk..end_blk`
    pub fn generate_addresses(
        &self,
        start_window: usize,
        end_window: usize,
        start_blk: usize,
        end_blk: usize,
    ) -> Vec<AddressRange> {
        let end_blk = end_blk.min(self.act_channel_blks);
        let mut read_addresses = Vec::new();
        for window in start_window..end_window {
            let x_window = (window % self.out_x) * self.stride;
            let y_window = (window / self.out_x) * self.stride;
            for y in 0..self.ky {
                for x in 0..self.kx {
                    for blk in start_blk..end_blk {
                        read_addresses.push(self.act_address_map[self.act_map_index(y_window + y, x_window + x, blk)]);
                    }
                }
            }
        }
        self.dram.compress_addresses(&read_addresses)
    }

    /// Outputs completed when `time_step` is the last step of a tile
    /// covering `window_set` and the filter sets starting at `filter_set`
    pub fn calculate_outputs(
        &self,
        time_step: usize,
        steps: usize,
        window_set: usize,
        filter_set: usize,
        group: usize,
    ) -> u64 {
        if time_step + 1 != steps {
            return 0;
        }
        let windows = self.windows[window_set].len();

        let group_start = group * self.filters_per_group;
        let start_filter = group_start + filter_set * self.ef_rows;
        let group_end = (group_start + self.filters_per_group).min(self.num_filters);
        let filters = (self.tiles * self.ef_rows).min(group_end.saturating_sub(start_filter));
        (windows * filters) as u64
    }

    /// Filters mapped to a filter set
    fn set_filters(&self, set: usize) -> usize {
        let group = set / self.filter_sets;
        let start = group * self.filters_per_group + (set % self.filter_sets) * self.ef_rows;
        let group_end = ((group + 1) * self.filters_per_group).min(self.num_filters);
        self.ef_rows.min(group_end.saturating_sub(start))
    }

    fn channel_blocks(&self, group: usize) -> (usize, usize) {
        let values_per_block = self.dram.act_values_per_block() as usize;
        let channels = if self.depthwise {
            self.filters_per_group
        } else {
            self.wgt_channels
        };
        let first = group * channels;
        let last = (first + channels).min(self.act_channels);
        (first / values_per_block, last.div_ceil(values_per_block))
    }

    fn wgt_fits_on_chip(&self) -> bool {
        let bytes = (self.num_filters * self.wgt_channels * self.kx * self.ky) as u64 * self.dram.wgt_data_size as u64;
        bytes.div_ceil(8) <= self.gbuffer.wgt_size
    }

    /// Time every window step, group and filter batch of one image
    pub fn process_image<A: Architecture + ?Sized>(&self, image: usize, arch: &mut A) -> SimResult<ImageStats> {
        let mut ctx = SimContext::new();
        let mut stats = ImageStats::default();
        let num_windows = if self.linear { 1 } else { self.out_x * self.out_y };

        let wgt_transfers = self.dram.transfers(&self.wgt_address_map);
        stats.wgt_off_chip = if self.wgt_fits_on_chip() {
            wgt_transfers
        } else {
            wgt_transfers * self.window_steps.len() as u64
        };

        for step in &self.window_steps {
            let (Some(&first_set), Some(&last_set)) = (step.first(), step.last()) else {
                continue;
            };
            let start_window = first_set * self.ef_columns;
            let end_window = ((last_set + 1) * self.ef_columns).min(num_windows);

            for group in 0..self.groups {
                let (start_blk, end_blk) = self.channel_blocks(group);
                stats.act_off_chip += self
                    .dram
                    .transfers(&self.generate_addresses(start_window, end_window, start_blk, end_blk));

                for &window_set in step {
                    let window_buffer = self.fill_window_buffer(image, &self.windows[window_set], group)?;
                    for filter_set in (0..self.filter_sets).step_by(self.tiles) {
                        self.process_filter_batch(&window_buffer, window_set, filter_set, group, &mut *arch, &mut ctx, &mut stats)?;
                    }
                }
            }
        }

        while !arch.flush(&ctx) {
            ctx.advance_to(arch.done_cycle());
        }
        stats.cycles = arch.cycles();
        stats.scheduled_pe = arch.core().scheduled_pe();
        stats.idle_pe = arch.core().idle_pe();
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_filter_batch<A: Architecture + ?Sized>(
        &self,
        window_buffer: &WindowBuffer,
        window_set: usize,
        filter_set: usize,
        group: usize,
        arch: &mut A,
        ctx: &mut SimContext,
        stats: &mut ImageStats,
    ) -> SimResult<()> {
        let base = group * self.filter_sets + filter_set;
        let batch = self.tiles.min(self.filter_sets - filter_set);
        let windows = if self.linear {
            1
        } else {
            self.windows[window_set].len()
        };

        match &self.schedule {
            Some(schedule) => {
                let mut pending: Schedule = schedule[base..base + batch].to_vec();
                let steps = pending.iter().map(VecDeque::len).max().unwrap_or(0);
                if steps == 0 {
                    // All-zero weights still produce their outputs
                    stats.outputs += self.calculate_outputs(0, 1, window_set, filter_set, group);
                    return Ok(());
                }
                let mut time_step = 0;
                while check_schedule(&pending, 0, batch) {
                    let times: Vec<Option<usize>> = pending
                        .iter()
                        .map(|s| s.front().map(|st: &ScheduleStep| st.buffer_time))
                        .collect();
                    self.step(window_buffer, base, &times, windows, &mut *arch, ctx, stats)?;
                    stats.outputs += self.calculate_outputs(time_step, steps, window_set, filter_set, group);
                    update_schedule(&mut pending, 0, batch);
                    time_step += 1;
                }
            }
            None => {
                for time in 0..self.max_buffer_time {
                    let times = vec![Some(time); batch];
                    self.step(window_buffer, base, &times, windows, &mut *arch, ctx, stats)?;
                    stats.outputs += self.calculate_outputs(time, self.max_buffer_time, window_set, filter_set, group);
                }
            }
        }
        Ok(())
    }

    /// One step of every tile; `times[t]` is the buffer time of tile `t`,
    /// `None` when it has drained
    #[allow(clippy::too_many_arguments)]
    fn step<A: Architecture + ?Sized>(
        &self,
        window_buffer: &WindowBuffer,
        base: usize,
        times: &[Option<usize>],
        windows: usize,
        arch: &mut A,
        ctx: &mut SimContext,
        stats: &mut ImageStats,
    ) -> SimResult<()> {
        let idle_row = self.weight_buffer.row(base, 0);
        let mut tiles: Vec<TileData<'_>> = (0..self.tiles)
            .map(|_| TileData::idle(idle_row, window_buffer, self.ef_lanes))
            .collect();

        let mut act_times = BTreeSet::new();
        let mut wgt_banks: Vec<Option<u32>> = Vec::new();
        for (t, time) in times.iter().enumerate() {
            let Some(time) = *time else {
                continue;
            };
            let set = base + t;
            tiles[t] = TileData {
                valid: true,
                time,
                windows,
                filters: self.set_filters(set),
                lanes: self.ef_lanes,
                weights: self.weight_buffer.row(set, time),
                window_buffer,
                scheduled: self.scheduled,
                linear: self.linear,
                ef_columns: self.ef_columns,
            };
            act_times.insert(time);
            stats.wgt_on_chip += self.wgt_address_buffer.row(set, time).iter().filter(|&&a| a != NULL_ADDR).count() as u64;
            wgt_banks.extend_from_slice(self.wgt_bank_buffer.row(set, time));
        }

        for &time in &act_times {
            stats.act_on_chip += window_buffer.addresses(time).iter().filter(|&&a| a != NULL_ADDR).count() as u64;
            stats.bank_conflicts += bank_conflicts(window_buffer.banks(time));
        }
        stats.bank_conflicts += bank_conflicts(&wgt_banks);

        if !arch.ready(ctx) {
            ctx.advance_to(arch.ready_cycle());
        }
        arch.process_tiles(&tiles, ctx)?;
        ctx.tick();
        stats.steps += 1;
        Ok(())
    }

    pub fn linear(&self) -> bool {
        self.linear
    }

    pub fn depthwise(&self) -> bool {
        self.depthwise
    }

    pub fn out_x(&self) -> usize {
        self.out_x
    }

    pub fn out_y(&self) -> usize {
        self.out_y
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn filters_per_group(&self) -> usize {
        self.filters_per_group
    }

    pub fn window_sets(&self) -> usize {
        self.window_sets
    }

    pub fn filter_sets(&self) -> usize {
        self.filter_sets
    }

    pub fn max_buffer_time(&self) -> usize {
        self.max_buffer_time
    }

    pub fn window_steps(&self) -> &[Vec<usize>] {
        &self.window_steps
    }

    pub fn windows(&self, window_set: usize) -> &[(usize, usize)] {
        &self.windows[window_set]
    }

    pub fn ef_lanes(&self) -> usize {
        self.ef_lanes
    }

    pub fn ef_columns(&self) -> usize {
        self.ef_columns
    }

    pub fn ef_rows(&self) -> usize {
        self.ef_rows
    }

    pub fn weight_buffer(&self) -> &WeightBuffer {
        &self.weight_buffer
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn act_address_map(&self) -> &[u64] {
        &self.act_address_map
    }

    pub fn act_bank_map(&self) -> &[u32] {
        &self.act_bank_map
    }

    pub fn wgt_address_map(&self) -> &[AddressRange] {
        &self.wgt_address_map
    }
}
