//! CXL memory expander simulator CLI.
//!
//! This binary provides a single entry point for the model. It performs:
//! 1. **Traffic run:** Build a system from a JSON configuration (or defaults), drive a
//!    deterministic access pattern through it with retry-on-backpressure, and print stats.
//! 2. **Memory map:** Print the E820-style map the configuration produces.
//! 3. **Profiles:** List the built-in media and device parameter sets.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::VecDeque;
use std::process;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cxlsim_core::common::{Completion, HostRequest, NS, SimError, Tick};
use cxlsim_core::config::{Config, DeviceConfig, DeviceParams, DeviceProfile, MediaProfile, MediaTiming, Topology};
use cxlsim_core::soc::{Admission, System};
use cxlsim_core::stats::SimStats;

#[derive(Parser, Debug)]
#[command(
    name = "cxlsim",
    author,
    version,
    about = "CXL memory expander timing model",
    long_about = "Drive synthetic traffic through a CXL-attached memory expander and report timing.\n\nConfiguration is JSON (see `Config`); command-line flags override the file.\nSet RUST_LOG=cxlsim_core=debug for per-packet tracing.\n\nExamples:\n  cxlsim run --pattern sequential --count 4096\n  cxlsim run -c expander.json --pattern row-conflict --json\n  cxlsim memmap --topology direct\n  cxlsim profiles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a traffic pattern through the configured system.
    Run {
        #[command(flatten)]
        system: SystemArgs,

        /// Access pattern.
        #[arg(short, long, value_enum, default_value_t = Pattern::Sequential)]
        pattern: Pattern,

        /// Number of host requests.
        #[arg(short = 'n', long, default_value_t = 1024)]
        count: u64,

        /// Bytes per request.
        #[arg(short, long, default_value_t = 64)]
        size: usize,

        /// Address step for the `stride` pattern.
        #[arg(long, default_value_t = 4096)]
        stride: u64,

        /// Maximum requests in flight at the host.
        #[arg(short, long, default_value_t = 64)]
        window: usize,

        /// Use the atomic path (fixed latencies, no queueing).
        #[arg(long)]
        atomic: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the E820-style memory map.
    Memmap {
        #[command(flatten)]
        system: SystemArgs,
    },

    /// List the built-in media and device profiles.
    Profiles,
}

/// Configuration source shared by the subcommands.
#[derive(clap::Args, Debug)]
struct SystemArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Topology override.
    #[arg(short, long, value_enum)]
    topology: Option<TopologyArg>,

    /// Media profile override (e.g. DDR4_2400_8x8, NVM_2400_1x64).
    #[arg(short, long)]
    media: Option<String>,

    /// Device profile override.
    #[arg(short, long, value_enum)]
    device: Option<DeviceArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TopologyArg {
    Bridged,
    Direct,
    Controller,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceArg {
    Asic,
    Fpga,
}

/// Synthetic access patterns over the expander range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Pattern {
    /// Consecutive reads.
    Sequential,
    /// Reads `--stride` bytes apart, wrapping at the end of the range.
    Stride,
    /// Reads alternating between two rows of the same bank.
    RowConflict,
    /// Consecutive accesses, every third one a write.
    Mixed,
}

#[derive(Debug, Serialize)]
struct RunReport {
    pattern: Pattern,
    requests: u64,
    atomic: bool,
    min_latency_ns: f64,
    avg_latency_ns: f64,
    max_latency_ns: f64,
    stats: SimStats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { system, pattern, count, size, stride, window, atomic, json } => {
            cmd_run(&system, pattern, count, size, stride, window.max(1), atomic, json)
        }
        Commands::Memmap { system } => cmd_memmap(&system),
        Commands::Profiles => {
            cmd_profiles();
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

/// Loads the configuration file (if any) and applies the flag overrides.
fn load_config(args: &SystemArgs) -> Result<Config, SimError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(t) = args.topology {
        config.topology = match t {
            TopologyArg::Bridged => Topology::Bridged,
            TopologyArg::Direct => Topology::Direct,
            TopologyArg::Controller => Topology::Controller,
        };
    }
    if let Some(d) = args.device {
        config.device.profile = match d {
            DeviceArg::Asic => DeviceProfile::Asic,
            DeviceArg::Fpga => DeviceProfile::Fpga,
        };
    }
    if let Some(name) = &args.media {
        match MediaProfile::ALL.into_iter().find(|p| p.name().eq_ignore_ascii_case(name)) {
            Some(p) => config.media.profile = p,
            None => {
                eprintln!("error: unknown media profile `{name}` (see `cxlsim profiles`)");
                process::exit(2);
            }
        }
    }
    Ok(config)
}

/// Builds the request sequence for `pattern` over the expander range.
fn generate(config: &Config, pattern: Pattern, count: u64, size: usize, stride: u64) -> Result<Vec<HostRequest>, SimError> {
    let resolved = config.resolve()?;
    let range = resolved.device.range;
    let g = resolved.media.geometry;
    let step = size.max(1) as u64;
    let span = (range.size - range.size % step).max(step);
    // Next row of the same bank under the default row-rank-bank-column-channel order.
    let row_stride = g.row_buffer_size() * g.channels * g.banks_per_rank * g.ranks_per_channel;

    let reqs = (0..count)
        .map(|i| {
            let offset = match pattern {
                Pattern::Sequential | Pattern::Mixed => (i * step) % span,
                Pattern::Stride => (i * stride.max(step)) % span,
                Pattern::RowConflict => ((i % 2) * row_stride + (i / 2 % g.columns_per_row()) * step) % span,
            };
            let addr = range.base + offset;
            if pattern == Pattern::Mixed && i % 3 == 2 {
                HostRequest::write(addr, vec![(i & 0xFF) as u8; size])
            } else {
                HostRequest::read(addr, size)
            }
        })
        .collect();
    Ok(reqs)
}

/// Keeps up to `window` requests in flight, resending refused ones after a retry.
fn drive(sys: &mut System, reqs: Vec<HostRequest>, window: usize) -> Result<Vec<Completion>, SimError> {
    let mut pending: VecDeque<HostRequest> = reqs.into();
    let mut done = Vec::with_capacity(pending.len());
    let mut in_flight = 0usize;
    let mut blocked = false;

    loop {
        while !blocked && in_flight < window {
            let Some(req) = pending.pop_front() else { break };
            match sys.send_request(req)? {
                Admission::Accepted(_) => in_flight += 1,
                Admission::Retry(back) => {
                    pending.push_front(back);
                    blocked = true;
                }
            }
        }
        if pending.is_empty() && in_flight == 0 {
            return Ok(done);
        }

        let finished = if blocked {
            let Some(next) = sys.next_event_tick() else {
                eprintln!("error: request refused with nothing left in flight");
                process::exit(1);
            };
            sys.run_until(next)?;
            blocked = !sys.take_retry();
            sys.take_completions()
        } else {
            let finished = sys.poll_completions()?;
            if finished.is_empty() {
                // Nothing left to process; the remaining transactions can never finish.
                eprintln!("error: {in_flight} transactions lost in flight");
                process::exit(1);
            }
            finished
        };
        in_flight -= finished.len().min(in_flight);
        done.extend(finished);
    }
}

#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn cmd_run(
    args: &SystemArgs,
    pattern: Pattern,
    count: u64,
    size: usize,
    stride: u64,
    window: usize,
    atomic: bool,
    json: bool,
) -> Result<(), SimError> {
    let config = load_config(args)?;
    let reqs = generate(&config, pattern, count, size, stride)?;
    let mut sys = System::new(&config)?;
    info!(?pattern, count, size, window, atomic, "starting traffic run");

    let completions = if atomic {
        reqs.into_iter().map(|r| sys.access_atomic(r)).collect::<Result<Vec<_>, _>>()?
    } else {
        let done = drive(&mut sys, reqs, window)?;
        sys.run_until_idle()?;
        done
    };
    debug!(completed = completions.len(), now = sys.now(), "traffic drained");

    let latencies: Vec<Tick> = completions.iter().map(Completion::latency).collect();
    let ns = |t: Tick| t as f64 / NS as f64;
    let total: Tick = latencies.iter().sum();
    let report = RunReport {
        pattern,
        requests: completions.len() as u64,
        atomic,
        min_latency_ns: latencies.iter().min().copied().map_or(0.0, ns),
        avg_latency_ns: if latencies.is_empty() { 0.0 } else { ns(total) / latencies.len() as f64 },
        max_latency_ns: latencies.iter().max().copied().map_or(0.0, ns),
        stats: sys.stats(),
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("error: failed to serialize report: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("[*] Pattern: {pattern:?}  Requests: {}  Atomic: {atomic}", report.requests);
        println!(
            "    Latency (ns): min {:.3}  avg {:.3}  max {:.3}",
            report.min_latency_ns, report.avg_latency_ns, report.max_latency_ns
        );
        report.stats.print();
    }
    Ok(())
}

fn cmd_memmap(args: &SystemArgs) -> Result<(), SimError> {
    let config = load_config(args)?;
    let sys = System::new(&config)?;
    println!("Topology: {:?}", sys.config().topology);
    for (i, entry) in sys.memory_map().iter().enumerate() {
        println!("  [{i}] {entry}  (type {})", entry.kind.e820_type());
    }
    Ok(())
}

fn cmd_profiles() {
    println!("Media profiles:");
    for p in MediaProfile::ALL {
        let cfg = p.baseline();
        let g = cfg.geometry;
        let kind = match cfg.timing {
            MediaTiming::Dram(_) => "DRAM",
            MediaTiming::Nvm(_) => "NVM",
        };
        println!(
            "  {:<16} {kind:<5} capacity {:>4} GiB  burst {:>3} B  row {:>5} B  ranks {}  banks {}  groups {}",
            p.name(),
            g.capacity() >> 30,
            g.burst_size(),
            g.row_buffer_size(),
            g.ranks_per_channel,
            g.banks_per_rank,
            g.bank_groups_per_rank,
        );
    }
    println!("Device profiles:");
    for p in [DeviceProfile::Asic, DeviceProfile::Fpga] {
        let d = DeviceConfig::resolve(&DeviceParams { profile: p, ..DeviceParams::default() });
        println!(
            "  {:<16} protocol {:>3} ns  req buffer {:>3}  rsp buffer {:>3}",
            format!("{p:?}"),
            d.proto_proc_lat / NS,
            d.req_size,
            d.rsp_size
        );
    }
}
