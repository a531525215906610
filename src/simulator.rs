//! Network-level driver
//!
//! Runs one task over every layer of a network. Timing builds an
//! [`OutputStationary`] plan per layer and simulates the images of the batch
//! in parallel, each against its own copy of the architecture.

use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

use crate::architecture::{Architecture, LayerParams};
use crate::config::{ModelConfig, SimConfig, Task};
use crate::dataflow::{ControlConfig, ImageStats, OutputStationary};
use crate::error::{SimError, SimResult};
use crate::laconic::Laconic;
use crate::layer::{Layer, Network};
use crate::loom::Loom;
use crate::pragmatic::BitPragmatic;
use crate::search::{search, FixedAxis, LayerShape};
use crate::stats::{CycleStats, LayerMetrics, PotentialStats, SearchStats, SparsityStats, Stats};
use crate::stripes::DynamicStripes;
use crate::tensor::Tensor;

pub struct Simulator<A> {
    arch: A,
    control: ControlConfig,
    threads: usize,
    fast_mode: bool,
}

impl<A: Architecture + Clone + Sync> Simulator<A> {
    pub fn new(arch: A, control: ControlConfig) -> Self {
        Self {
            arch,
            control,
            threads: 0,
            fast_mode: false,
        }
    }

    /// Dedicated worker pool size, 0 uses the global pool
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    fn install<R: Send>(&self, job: impl FnOnce() -> R + Send) -> SimResult<R> {
        if self.threads == 0 {
            return Ok(job());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| SimError::config(format!("cannot build thread pool: {}", e)))?;
        Ok(pool.install(job))
    }

    fn images(&self, layer: &Layer) -> usize {
        if self.fast_mode {
            1
        } else {
            layer.activations.batch()
        }
    }

    /// Padded activations and weights in the variant's representation
    fn prepare(&self, layer: &Layer) -> (Tensor, Tensor) {
        let mut act = if layer.is_linear() {
            layer.activations.clone()
        } else {
            layer.activations.zero_pad(layer.padding)
        };
        let mut wgt = layer.weights.clone();
        if layer.signed_act {
            self.arch.convert_data(&mut act, layer.act_precision.bits());
        }
        if layer.signed_wgt {
            self.arch.convert_data(&mut wgt, layer.wgt_precision.bits());
        }
        (act, wgt)
    }

    fn layer_params(&self, layer: &Layer, network: &Network, plan: Option<&OutputStationary>) -> LayerParams {
        let network_width = network.network_width();
        let blocks = network_width.div_ceil(self.control.array.pe_width).max(1);
        LayerParams {
            act_prec: layer.act_precision.bits(),
            wgt_prec: layer.wgt_precision.bits(),
            act_blks: blocks,
            wgt_blks: blocks,
            network_width,
            signed_act: layer.signed_act,
            signed_wgt: layer.signed_wgt,
            linear: layer.is_linear(),
            ef_columns: plan.map_or(self.control.array.columns, |p| p.ef_columns() as u32),
        }
    }

    fn stats(&self, task: Task, network: &Network) -> Stats {
        let mut stats = Stats::new(task.name(), &network.name, self.arch.name());
        stats.filename = match task {
            Task::Potentials => self.arch.filename_pot(),
            _ => self.arch.filename(),
        };
        stats.header = match task {
            Task::Potentials => self.arch.header_pot(),
            _ => self.arch.header(),
        };
        stats
    }

    /// Time every layer
    pub fn cycles(&self, network: &Network) -> SimResult<Stats> {
        let mut stats = self.stats(Task::Cycles, network);
        if !network.forward {
            return Ok(stats);
        }

        for layer in &network.layers {
            layer.validate()?;
            let start = Instant::now();
            info!(layer = %layer.name, arch = %self.arch.name(), "simulating cycles");

            let (act, wgt) = self.prepare(layer);
            let plan = OutputStationary::configure_layer(layer, act, wgt, &self.control, &self.arch)?;
            let mut arch = self.arch.clone();
            arch.configure_layer(self.layer_params(layer, network, Some(&plan)));

            let images = self.images(layer);
            let results: Vec<SimResult<ImageStats>> = self.install(|| {
                (0..images)
                    .into_par_iter()
                    .map(|image| {
                        let mut arch = arch.clone();
                        plan.process_image(image, &mut arch)
                    })
                    .collect()
            })?;
            let results = results.into_iter().collect::<SimResult<Vec<_>>>()?;

            let shape = layer_shape(layer);
            let array = &self.control.array;
            let mut cycle_stats = CycleStats::from_images(&results, shape.ideal_cycles(array));
            cycle_stats.idle_lanes = array.idle_lanes(shape.windows, shape.channels, shape.filters, shape.kx, shape.ky);
            cycle_stats.idle_pes = array.idle_pes(shape.windows, shape.channels, shape.filters, shape.kx, shape.ky, false);
            cycle_stats.idle_pes_tiles =
                array.idle_pes(shape.windows, shape.channels, shape.filters, shape.kx, shape.ky, true);

            info!(
                layer = %layer.name,
                avg_cycles = cycle_stats.avg_cycles,
                baseline = cycle_stats.baseline_cycles,
                "layer done"
            );
            stats.push(&layer.name, elapsed_ms(start), LayerMetrics::Cycles(cycle_stats));
        }
        Ok(stats)
    }

    /// One-bit multiplications the variant needs against bit-parallel
    /// multipliers
    pub fn potentials(&self, network: &Network) -> SimResult<Stats> {
        let mut stats = self.stats(Task::Potentials, network);
        if !network.forward {
            return Ok(stats);
        }

        for layer in &network.layers {
            layer.validate()?;
            let start = Instant::now();

            let (mut act, mut wgt) = self.prepare(layer);
            if layer.is_linear() {
                act.reshape_to_2d();
                wgt.reshape_to_2d();
            }
            let mut arch = self.arch.clone();
            arch.configure_layer(self.layer_params(layer, network, None));

            let stride = if layer.is_linear() { 1 } else { layer.stride };
            let conv = ConvGeometry::new(&act, &wgt, stride);
            let images = self.images(layer);
            let bit_mult = self.install(|| {
                (0..images)
                    .into_par_iter()
                    .map(|image| conv.bit_multiplications(&arch, &act, &wgt, image))
                    .sum::<u64>()
            })?;
            let parallel_mult = conv.macs() * images as u64;

            let potentials = PotentialStats::new(
                layer.act_precision.bits(),
                layer.wgt_precision.bits(),
                parallel_mult,
                bit_mult,
                network.network_width(),
            );
            debug!(layer = %layer.name, work_reduction = potentials.work_reduction, "potentials");
            stats.push(&layer.name, elapsed_ms(start), LayerMetrics::Potentials(potentials));
        }
        Ok(stats)
    }
}

/// Output and kernel geometry shared by the potentials walk
#[derive(Debug, Clone, Copy)]
struct ConvGeometry {
    out_x: usize,
    out_y: usize,
    filters: usize,
    wgt_channels: usize,
    kx: usize,
    ky: usize,
    stride: usize,
    depthwise: bool,
    filters_per_group: usize,
    act_channels: usize,
}

impl ConvGeometry {
    fn new(act: &Tensor, wgt: &Tensor, stride: usize) -> Self {
        let [_, act_channels, nx, ny] = act.shape;
        let [filters, wgt_channels, kx, ky] = wgt.shape;
        let depthwise = wgt_channels == 1 && act_channels != 1;
        let groups = if act_channels / wgt_channels.max(1) == 2 { 2 } else { 1 };
        Self {
            out_x: nx.saturating_sub(kx) / stride + 1,
            out_y: ny.saturating_sub(ky) / stride + 1,
            filters,
            wgt_channels,
            kx,
            ky,
            stride,
            depthwise,
            filters_per_group: filters.div_ceil(groups),
            act_channels,
        }
    }

    /// Depthwise filters past the last input channel see no activations
    fn reads_input(&self, filter: usize) -> bool {
        self.first_channel(filter) + self.wgt_channels <= self.act_channels
    }

    fn macs(&self) -> u64 {
        let filters = (0..self.filters).filter(|&m| self.reads_input(m)).count();
        (self.out_x * self.out_y * filters * self.wgt_channels * self.kx * self.ky) as u64
    }

    fn first_channel(&self, filter: usize) -> usize {
        if self.depthwise {
            filter
        } else {
            (filter / self.filters_per_group) * self.wgt_channels
        }
    }

    fn bit_multiplications<A: Architecture + ?Sized>(&self, arch: &A, act: &Tensor, wgt: &Tensor, image: usize) -> u64 {
        let mut bits = 0u64;
        for m in (0..self.filters).filter(|&m| self.reads_input(m)) {
            let first = self.first_channel(m);
            for y in 0..self.out_y {
                for x in 0..self.out_x {
                    for k in 0..self.wgt_channels {
                        for j in 0..self.ky {
                            for i in 0..self.kx {
                                let a = act.get(image, first + k, x * self.stride + i, y * self.stride + j);
                                let w = wgt.get(m, k, i, j);
                                bits += arch.compute_bits(a, w) as u64;
                            }
                        }
                    }
                }
            }
        }
        bits
    }
}

/// Work of a layer over the padded input, without planning buffers
fn layer_shape(layer: &Layer) -> LayerShape {
    let wgt = &layer.weights;
    if layer.is_linear() {
        LayerShape {
            windows: 1,
            channels: (wgt.channels() * wgt.nx() * wgt.ny()) as u64,
            filters: wgt.batch() as u64,
            kx: 1,
            ky: 1,
        }
    } else {
        let act = &layer.activations;
        let out_x = (act.nx() + 2 * layer.padding).saturating_sub(wgt.nx()) / layer.stride.max(1) + 1;
        let out_y = (act.ny() + 2 * layer.padding).saturating_sub(wgt.ny()) / layer.stride.max(1) + 1;
        LayerShape {
            windows: (out_x * out_y) as u64,
            channels: wgt.channels() as u64,
            filters: wgt.batch() as u64,
            kx: wgt.nx() as u64,
            ky: wgt.ny() as u64,
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Percentage of zero activations and weights per layer
pub fn sparsity(network: &Network) -> Stats {
    let mut stats = Stats::new(Task::Sparsity.name(), &network.name, "None");
    for layer in &network.layers {
        let start = Instant::now();
        let mut record = SparsityStats::new(
            layer.activations.count_zeros() as u64,
            layer.activations.len() as u64,
            layer.weights.count_zeros() as u64,
            layer.weights.len() as u64,
        );
        if network.backward {
            record.grad_sparsity = layer
                .gradients
                .as_ref()
                .map(|g| crate::stats::percent(g.count_zeros() as u64, g.len() as u64));
        }
        stats.push(&layer.name, elapsed_ms(start), LayerMetrics::Sparsity(record));
    }
    stats
}

/// Percentage of zero bits over the network width per layer
pub fn bit_sparsity(network: &Network) -> Stats {
    let width = network.network_width();
    let mut stats = Stats::new(Task::BitSparsity.name(), &network.name, "None");
    for layer in &network.layers {
        let start = Instant::now();
        let mut record = SparsityStats::new(
            layer.activations.count_zero_bits(width),
            layer.activations.len() as u64 * width as u64,
            layer.weights.count_zero_bits(width),
            layer.weights.len() as u64 * width as u64,
        );
        if network.backward {
            record.grad_sparsity = layer.gradients.as_ref().map(|g| {
                crate::stats::percent(g.count_zero_bits(width), g.len() as u64 * width as u64)
            });
        }
        stats.push(&layer.name, elapsed_ms(start), LayerMetrics::Sparsity(record));
    }
    stats
}

/// Best array shape per layer, keeping one axis of `control.array` fixed
pub fn search_network(control: &ControlConfig, fixed: FixedAxis, network: &Network) -> SimResult<Stats> {
    let mut stats = Stats::new(Task::Search.name(), &network.name, "None");
    for layer in &network.layers {
        layer.validate()?;
        let start = Instant::now();
        let shape = layer_shape(layer);
        let best = search(&control.array, fixed, &shape)?;
        let record = SearchStats {
            lanes: best.array.lanes,
            columns: best.array.columns,
            rows: best.array.rows,
            ideal_cycles: best.ideal_cycles,
            default_cycles: shape.ideal_cycles(&control.array),
        };
        stats.push(&layer.name, elapsed_ms(start), LayerMetrics::Search(record));
    }
    Ok(stats)
}

fn run_arch<A: Architecture + Clone + Sync>(arch: A, config: &SimConfig, network: &Network) -> SimResult<Stats> {
    let simulator = Simulator::new(arch, control_config(config))
        .with_threads(config.run.threads)
        .with_fast_mode(config.run.fast_mode);
    match config.run.task {
        Task::Potentials => simulator.potentials(network),
        _ => simulator.cycles(network),
    }
}

fn control_config(config: &SimConfig) -> ControlConfig {
    ControlConfig {
        array: config.array,
        dram: config.dram.clone(),
        gbuffer: config.gbuffer.clone(),
        tactical: config.tactical.clone(),
    }
}

/// Run the configured task over `network`
pub fn run(config: &SimConfig, network: &Network) -> SimResult<Stats> {
    config.validate()?;
    match config.run.task {
        Task::Sparsity => return Ok(sparsity(network)),
        Task::BitSparsity => return Ok(bit_sparsity(network)),
        Task::Search => return search_network(&control_config(config), config.run.search_fixed, network),
        Task::Cycles | Task::Potentials => {}
    }

    let array = config.array;
    match config.model.clone() {
        ModelConfig::Pragmatic {
            bits_first_stage,
            column_registers,
            diffy,
            tactical,
        } => run_arch(
            BitPragmatic::new(array, bits_first_stage, column_registers, diffy, tactical),
            config,
            network,
        ),
        ModelConfig::DynamicStripes {
            granularity,
            column_registers,
            diffy,
            tactical,
        } => run_arch(
            DynamicStripes::new(array, granularity, column_registers, diffy, tactical),
            config,
            network,
        ),
        ModelConfig::Loom {
            pe_serial_bits,
            minor_bit,
            dynamic_weights,
            column_registers,
        } => run_arch(
            Loom::new(array, pe_serial_bits, minor_bit, dynamic_weights, column_registers),
            config,
            network,
        ),
        ModelConfig::Laconic => run_arch(Laconic::new(array), config, network),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::{ColumnRegisters, PeArrayConfig};
    use crate::config::RunConfig;
    use crate::layer::tests::{conv_layer, fc_layer};
    use pretty_assertions::assert_eq;

    fn filled(shape: [usize; 4], value: u16) -> Tensor {
        Tensor::new(shape, vec![value; shape.iter().product()]).unwrap()
    }

    fn control(lanes: u32, columns: u32, rows: u32) -> ControlConfig {
        ControlConfig {
            array: PeArrayConfig::new(lanes, columns, rows, 1, 16),
            ..ControlConfig::default()
        }
    }

    fn cycles_of(stats: &Stats, layer: usize) -> &CycleStats {
        match &stats.layers[layer].metrics {
            LayerMetrics::Cycles(c) => c,
            other => panic!("expected cycles, got {:?}", other),
        }
    }

    #[test]
    fn test_cycles_over_batch() {
        let layer = conv_layer(filled([3, 1, 4, 4], 1), filled([1, 1, 2, 2], 1), 1, 0);
        let network = Network::new("tiny", vec![layer]);
        let control = control(4, 1, 1);
        let arch = BitPragmatic::new(control.array, 2, ColumnRegisters::One, false, false);

        let stats = Simulator::new(arch, control).with_threads(2).cycles(&network).unwrap();
        let layer = cycles_of(&stats, 0);
        assert_eq!(layer.cycles, vec![36, 36, 36]);
        assert_eq!(layer.baseline_cycles, 36);
        assert_eq!(layer.avg_cycles, 36.0);
        assert_eq!(layer.outputs, 27);
        assert_eq!(stats.arch, "BitPragmatic");
    }

    #[test]
    fn test_fast_mode_runs_one_image() {
        let layer = conv_layer(filled([4, 1, 4, 4], 1), filled([1, 1, 2, 2], 1), 1, 0);
        let network = Network::new("tiny", vec![layer]);
        let control = control(4, 1, 1);
        let arch = BitPragmatic::new(control.array, 2, ColumnRegisters::One, false, false);
        let stats = Simulator::new(arch, control).with_fast_mode(true).cycles(&network).unwrap();
        assert_eq!(cycles_of(&stats, 0).cycles.len(), 1);
    }

    #[test]
    fn test_padding_grows_output() {
        let layer = conv_layer(filled([1, 1, 2, 2], 1), filled([1, 1, 3, 3], 1), 1, 1);
        let network = Network::new("padded", vec![layer]);
        let control = control(4, 1, 1);
        let arch = BitPragmatic::new(control.array, 2, ColumnRegisters::One, false, false);
        let stats = Simulator::new(arch, control).cycles(&network).unwrap();
        // 4x4 padded input, 2x2 outputs, 9 kernel positions each
        assert_eq!(cycles_of(&stats, 0).outputs, 4);
        assert_eq!(cycles_of(&stats, 0).baseline_cycles, 36);
    }

    #[test]
    fn test_laconic_cycles_unsupported() {
        let layer = conv_layer(filled([1, 1, 4, 4], 1), filled([1, 1, 2, 2], 1), 1, 0);
        let network = Network::new("tiny", vec![layer]);
        let control = control(4, 1, 1);
        let result = Simulator::new(Laconic::new(control.array), control).cycles(&network);
        assert!(matches!(result, Err(SimError::Unsupported { .. })));
    }

    #[test]
    fn test_potentials() {
        // 16-bit network, one booth digit per activation
        let layer = fc_layer(filled([1, 4, 1, 1], 1), filled([2, 4, 1, 1], 3));
        let network = Network::new("fc", vec![layer]);
        let control = control(4, 1, 1);
        let arch = BitPragmatic::new(control.array, 2, ColumnRegisters::One, false, false);
        let stats = Simulator::new(arch, control).potentials(&network).unwrap();

        let LayerMetrics::Potentials(p) = &stats.layers[0].metrics else {
            panic!("expected potentials");
        };
        assert_eq!(p.parallel_mult, 8);
        assert_eq!(p.bit_mult, 8 * 16);
        assert_eq!(p.speedup, 16.0);
        assert_eq!(p.work_reduction, 100.0 - 100.0 / 16.0);
    }

    #[test]
    fn test_sparsity_tasks() {
        let mut act = filled([1, 2, 1, 1], 1);
        act.set(0, 1, 0, 0, 0);
        let layer = fc_layer(act, filled([1, 2, 1, 1], 0xffff));
        let network = Network::new("fc", vec![layer]);

        let LayerMetrics::Sparsity(s) = &sparsity(&network).layers[0].metrics else {
            panic!("expected sparsity");
        };
        assert_eq!(s.act_sparsity, 50.0);
        assert_eq!(s.wgt_sparsity, 0.0);

        let LayerMetrics::Sparsity(b) = &bit_sparsity(&network).layers[0].metrics else {
            panic!("expected sparsity");
        };
        assert_eq!(b.zero_act, 31);
        assert_eq!(b.total_act, 32);
        assert_eq!(b.zero_wgt, 0);
    }

    #[test]
    fn test_run_dispatches_on_model() {
        let layer = conv_layer(filled([1, 1, 4, 4], 1), filled([1, 1, 2, 2], 1), 1, 0);
        let network = Network::new("tiny", vec![layer]);
        let config = SimConfig {
            array: PeArrayConfig::new(4, 1, 1, 1, 16),
            model: ModelConfig::Loom {
                pe_serial_bits: 1,
                minor_bit: false,
                dynamic_weights: false,
                column_registers: ColumnRegisters::One,
            },
            run: RunConfig {
                task: Task::Cycles,
                ..RunConfig::default()
            },
            ..SimConfig::default()
        };
        let stats = run(&config, &network).unwrap();
        assert_eq!(stats.arch, "Loom");
        assert_eq!(stats.layers.len(), 1);
        assert!(cycles_of(&stats, 0).avg_cycles >= 36.0);
    }

    #[test]
    fn test_depthwise_potentials_skip_missing_channels() {
        // Four depthwise filters over two input channels
        let mut act = filled([1, 2, 3, 3], 1);
        for x in 0..3 {
            for y in 0..3 {
                act.set(0, 1, x, y, 3);
            }
        }
        let layer = conv_layer(act, filled([4, 1, 1, 1], 1), 1, 0);
        assert!(layer.validate().is_ok());
        let network = Network::new("dw", vec![layer]);
        let control = control(4, 1, 4);
        let arch = BitPragmatic::new(control.array, 2, ColumnRegisters::One, false, false);
        let simulator = Simulator::new(arch, control);

        let stats = simulator.potentials(&network).unwrap();
        let LayerMetrics::Potentials(p) = &stats.layers[0].metrics else {
            panic!("expected potentials");
        };
        // Only filters 0 and 1 find an input channel, as in the timing task
        assert_eq!(p.parallel_mult, 2 * 9);
        assert_eq!(p.bit_mult, 9 * 16 + 9 * 2 * 16);

        let cycles = simulator.cycles(&network).unwrap();
        assert_eq!(cycles.layers.len(), 1);
    }

    #[test]
    fn test_search_ignores_buffer_capacity() {
        let layer = conv_layer(filled([1, 16, 8, 8], 1), filled([16, 16, 3, 3], 1), 1, 1);
        let network = Network::new("conv", vec![layer]);
        let mut control = control(16, 4, 16);
        // Too small to hold a single window set
        control.gbuffer.act_size = 4;

        let stats = search_network(&control, FixedAxis::Rows, &network).unwrap();
        let LayerMetrics::Search(s) = &stats.layers[0].metrics else {
            panic!("expected search");
        };
        // 8x8 outputs with padding, 16 channels and filters, 3x3 kernel
        assert_eq!(s.default_cycles, 16 * 9);
        assert_eq!((s.lanes, s.columns, s.rows), (16, 4, 16));
    }

    #[test]
    fn test_search_task() {
        let layer = fc_layer(filled([1, 64, 1, 1], 1), filled([16, 64, 1, 1], 1));
        let network = Network::new("fc", vec![layer]);
        let config = SimConfig {
            array: PeArrayConfig::new(16, 4, 16, 1, 16),
            run: RunConfig {
                task: Task::Search,
                ..RunConfig::default()
            },
            ..SimConfig::default()
        };
        let stats = run(&config, &network).unwrap();
        let LayerMetrics::Search(s) = &stats.layers[0].metrics else {
            panic!("expected search");
        };
        assert_eq!((s.lanes, s.columns, s.rows), (64, 1, 16));
        assert_eq!(s.ideal_cycles, 1);
        assert_eq!(s.default_cycles, 4);
    }
}
