//! Latency benchmark for collectives and one-sided transfers.
//!
//! Every unit runs on its own thread over the in-process fabric.
//!
//! Run with:
//! ```bash
//! cargo run --release -p pgas --bin pgas_bench --features bench-bin -- \
//!     -n 8 -o bcast -s 8,1024,65536 -i 1000 -r 5
//! ```

use std::time::Instant;

use clap::{Parser, ValueEnum};
use fabric::FabricConfig;
use pgas::{BasicType, Config, DataType, GlobalPtr, ReduceOp, Runtime, TEAM_ALL, TeamUnit, launch};
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "pgas_bench")]
#[command(about = "Latency benchmark for PGAS collectives and RMA")]
struct Args {
    /// Number of units
    #[arg(short = 'n', long, default_value = "4")]
    units: usize,

    /// Operation to measure
    #[arg(short, long, value_enum, default_value = "bcast")]
    op: Op,

    /// Number of iterations per run
    #[arg(short, long, default_value = "1000")]
    iterations: u64,

    /// Message sizes in bytes (comma-separated)
    #[arg(short = 's', long, value_delimiter = ',', default_value = "8,1024,65536")]
    message_sizes: Vec<usize>,

    /// Number of warmup iterations
    #[arg(short, long, default_value = "100")]
    warmup: u64,

    /// Number of runs per configuration
    #[arg(short, long, default_value = "3")]
    runs: usize,

    /// Pin each unit thread to its own core
    #[arg(long)]
    pin: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Op {
    Barrier,
    Bcast,
    Allgather,
    Allreduce,
    Put,
    Get,
}

const BYTE: DataType = DataType::Basic(BasicType::Byte);

// =============================================================================
// Per-unit State
// =============================================================================

struct UnitBench {
    op: Op,
    size: usize,
    send: Vec<u8>,
    recv: Vec<u8>,
    /// Share of the next unit, for one-sided operations.
    target: Option<GlobalPtr>,
}

impl UnitBench {
    fn new(rt: &Runtime, op: Op, size: usize) -> pgas::Result<Self> {
        let n = rt.size();
        let target = match op {
            Op::Put | Op::Get => {
                let base = rt.team_memalloc(TEAM_ALL, size)?;
                Some(base.with_unit((rt.myid().0 + 1) % n as u32))
            }
            _ => None,
        };
        Ok(Self {
            op,
            size,
            send: vec![rt.myid().0 as u8; size],
            recv: vec![0u8; size * n],
            target,
        })
    }

    fn step(&mut self, rt: &Runtime) -> pgas::Result<()> {
        let size = self.size;
        match (self.op, self.target) {
            (Op::Barrier, _) => rt.barrier(TEAM_ALL),
            (Op::Bcast, _) => rt.bcast(&mut self.recv[..size], size, &BYTE, TeamUnit(0), TEAM_ALL),
            (Op::Allgather, _) => rt.allgather(&self.send, &mut self.recv, size, &BYTE, TEAM_ALL),
            (Op::Allreduce, _) => rt.allreduce(
                &self.send,
                &mut self.recv[..size],
                size,
                &BYTE,
                ReduceOp::Sum,
                TEAM_ALL,
            ),
            (Op::Put, Some(target)) => rt.put_blocking(target, &self.send, size, &BYTE, &BYTE),
            (Op::Get, Some(target)) => {
                rt.get_blocking(&mut self.recv[..size], target, size, &BYTE, &BYTE)
            }
            (Op::Put | Op::Get, None) => Ok(()),
        }
    }

    fn finish(self, rt: &Runtime) -> pgas::Result<()> {
        if let Some(target) = self.target {
            rt.barrier(TEAM_ALL)?;
            rt.team_memfree(target)?;
        }
        Ok(())
    }
}

// =============================================================================
// Benchmark
// =============================================================================

struct BenchmarkResult {
    message_size: usize,
    durations_ns: Vec<u64>,
}

fn run_benchmark(args: &Args, message_size: usize) -> pgas::Result<BenchmarkResult> {
    let config = Config::default().with_pin_threads(args.pin);
    let mut per_unit = launch(args.units, FabricConfig::default(), config, |rt| {
        let mut bench = UnitBench::new(rt, args.op, message_size)?;
        for _ in 0..args.warmup {
            bench.step(rt)?;
        }
        let mut durations_ns = Vec::with_capacity(args.runs);
        for _ in 0..args.runs {
            rt.barrier(TEAM_ALL)?;
            let start = Instant::now();
            for _ in 0..args.iterations {
                bench.step(rt)?;
            }
            rt.barrier(TEAM_ALL)?;
            durations_ns.push(start.elapsed().as_nanos() as u64);
        }
        bench.finish(rt)?;
        Ok(durations_ns)
    })?;
    // Runs are bracketed by barriers, so unit 0's timings cover every unit.
    let durations_ns = per_unit.swap_remove(0);
    Ok(BenchmarkResult {
        message_size,
        durations_ns,
    })
}

fn print_results(args: &Args, results: &[BenchmarkResult]) {
    println!(
        "{:<10} {:>6} {:>12} {:>6} {:>14}",
        "op", "units", "size", "run", "latency_ns"
    );
    for result in results {
        for (run, &ns) in result.durations_ns.iter().enumerate() {
            let latency = ns as f64 / args.iterations.max(1) as f64;
            println!(
                "{:<10} {:>6} {:>12} {:>6} {:>14.1}",
                format!("{:?}", args.op).to_lowercase(),
                args.units,
                result.message_size,
                run,
                latency
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut results = Vec::with_capacity(args.message_sizes.len());
    for &size in &args.message_sizes {
        tracing::info!(op = ?args.op, units = args.units, size, "running");
        results.push(run_benchmark(&args, size)?);
    }
    print_results(&args, &results);
    Ok(())
}
