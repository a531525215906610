//! Bit-Serial Accelerator Simulator CLI
//!
//! Usage:
//!   bitsim -n network.json
//!   bitsim -c config.json -n network.json --task potentials
//!   bitsim -c config.json -n network.json --json > stats.json

use clap::Parser as ClapParser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use bitserial_sim::{simulate, LayerMetrics, Network, SimConfig, Stats, Task};

#[derive(ClapParser, Debug)]
#[command(name = "bitsim")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Simulates bit-serial DNN accelerators layer by layer")]
struct Args {
    /// Simulator configuration (defaults apply when omitted)
    #[arg(short = 'c', long = "config")]
    config_file: Option<String>,

    /// Network description with layer tensors
    #[arg(short = 'n', long = "network")]
    network_file: String,

    /// Task to run, overrides the configuration
    #[arg(short = 't', long = "task", value_enum)]
    task: Option<Task>,

    /// Worker threads, overrides the configuration
    #[arg(long = "threads")]
    threads: Option<usize>,

    /// Simulate only the first image of each layer
    #[arg(long = "fast")]
    fast_mode: bool,

    /// Output as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config_file {
        Some(file) => SimConfig::from_file(file).unwrap_or_else(|e| {
            eprintln!("{}: Failed to load config '{}': {}", "Error".red(), file, e);
            std::process::exit(1);
        }),
        None => SimConfig::default(),
    };
    if let Some(task) = args.task {
        config.run.task = task;
    }
    if let Some(threads) = args.threads {
        config.run.threads = threads;
    }
    config.run.fast_mode |= args.fast_mode;

    let network = Network::from_file(&args.network_file).unwrap_or_else(|e| {
        eprintln!("{}: Failed to load network '{}': {}", "Error".red(), args.network_file, e);
        std::process::exit(1);
    });

    if args.verbose && !args.json_output {
        println!("{}", "Bit-Serial Accelerator Simulator".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!("{}: {} ({} layers)", "Network".green(), network.name, network.layers.len());
        println!(
            "{}: {} lanes x {} columns x {} rows, {} tiles",
            "PE array".green(),
            config.array.lanes,
            config.array.columns,
            config.array.rows,
            config.array.tiles
        );
        println!("{}: {}", "Task".green(), config.run.task.name());
        println!();
    }

    let stats = match simulate(&config, &network) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("{}: {}", "Simulation error".red(), e);
            std::process::exit(1);
        }
    };

    if args.json_output {
        match stats.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else {
        print_stats(&stats, args.verbose);
    }
}

fn print_stats(stats: &Stats, verbose: bool) {
    println!("{}", "Simulation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}: {}", "Network".cyan(), stats.net_name);
    println!("{}: {}", "Task".cyan(), stats.task_name);
    println!("{}: {}", "Architecture".cyan(), stats.arch);
    if !stats.filename.is_empty() {
        println!("{}: {}", "Configuration".cyan(), stats.filename);
    }
    if verbose && !stats.header.is_empty() {
        println!("{}", stats.header);
    }
    println!();

    println!("{}", "Layer Details".bold().yellow());
    println!("{}", "-".repeat(50));
    for layer in &stats.layers {
        println!();
        println!("{} {}", "Layer".bold(), layer.name.bold());
        match &layer.metrics {
            LayerMetrics::Cycles(c) => {
                println!("  {}: {:.1}", "Cycles".cyan(), c.avg_cycles);
                println!("  {}: {}", "Baseline cycles".cyan(), c.baseline_cycles);
                println!("  {}: {}", "Outputs".cyan(), c.outputs);
                println!(
                    "  {}: {} act, {} wgt",
                    "Off-chip accesses".cyan(),
                    c.act_off_chip,
                    c.wgt_off_chip
                );
                if verbose {
                    println!(
                        "  {}: {} act, {} wgt",
                        "On-chip accesses".cyan(),
                        c.act_on_chip,
                        c.wgt_on_chip
                    );
                    println!("  {}: {}", "Bank conflicts".cyan(), c.bank_conflicts);
                    println!("  {}: {} / {}", "Scheduled / idle PE".cyan(), c.scheduled_pe, c.idle_pe);
                    println!("  {}: {:?}", "Per-image cycles".cyan(), c.cycles);
                }
            }
            LayerMetrics::Potentials(p) => {
                println!("  {}: {:.2}%", "Work reduction".cyan(), p.work_reduction);
                println!("  {}: {:.2}x", "Speedup".cyan(), p.speedup);
                if verbose {
                    println!("  {}: {}", "Parallel multiplications".cyan(), p.parallel_mult);
                    println!("  {}: {}", "Bit multiplications".cyan(), p.bit_mult);
                }
            }
            LayerMetrics::Sparsity(s) => {
                println!("  {}: {:.2}%", "Activation sparsity".cyan(), s.act_sparsity);
                println!("  {}: {:.2}%", "Weight sparsity".cyan(), s.wgt_sparsity);
                if let Some(grad) = s.grad_sparsity {
                    println!("  {}: {:.2}%", "Gradient sparsity".cyan(), grad);
                }
            }
            LayerMetrics::Search(s) => {
                println!(
                    "  {}: {} lanes x {} columns x {} rows",
                    "Best array".cyan(),
                    s.lanes,
                    s.columns,
                    s.rows
                );
                println!(
                    "  {}: {} (configured {})",
                    "Ideal cycles".cyan(),
                    s.ideal_cycles,
                    s.default_cycles
                );
            }
        }
        if verbose {
            println!("  {}: {:.3} ms", "Time".cyan(), layer.time_ms);
        }
    }

    let total = stats.total_cycles();
    if total > 0.0 {
        println!();
        println!("{}: {:.1} cycles", "Total".cyan(), total);
    }
}
