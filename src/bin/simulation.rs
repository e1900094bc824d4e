//! Counter log simulation
//!
//! Writes a realistic `<root>/<date>/<line>/[<brick_type>/]<position>/<device>.txt`
//! tree for Brickline demos and soak tests:
//! - steady throughput with Gaussian noise at the entry stage
//! - per-boundary process loss (kiln boundaries lose more)
//! - line stoppages of 5-30 minutes
//! - occasional device counter resets (power cycles)
//! - a finished-goods grade table per line
//!
//! # Usage
//! ```bash
//! # One shift of DC1 and DC5, written at once
//! ./simulation --root logs --lines DC1,DC5 --hours 8
//!
//! # Append in (compressed) real time while `brickline run` tails the tree
//! ./simulation --root logs --lines DC1 --speed 60
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use brickline::acquisition::date_dir;
use brickline::aggregation::StageLayout;
use brickline::config::EngineConfig;
use brickline::pipeline::scheduler::local_today;

// ============================================================================
// Process Constants
// ============================================================================

/// Mean loss fraction at an ordinary stage boundary
const BASE_LOSS: f64 = 0.008;
/// Mean loss fraction when leaving a kiln entry stage
const KILN_LOSS: f64 = 0.02;
/// Stages whose outgoing boundary crosses a kiln
const KILN_ENTRY_STAGES: [&str; 3] = ["truoc-ln", "truoc-lo-xuong", "truoc-lo-men"];
/// Counters below this never reset (a reset of a tiny counter is indistinguishable from noise)
const MIN_COUNT_FOR_RESET: u64 = 100;
/// Grade shares of finished goods (the remainder is finishing loss)
const GRADE_SHARES: [(&str, f64); 3] = [("A1", 0.93), ("A2", 0.045), ("CL", 0.02)];

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "brickline-simulation")]
#[command(about = "Synthetic counter logs for Brickline testing")]
#[command(version = "1.0")]
struct Args {
    /// Log tree root
    #[arg(short, long, default_value = "logs")]
    root: PathBuf,

    /// Production date (defaults to today)
    #[arg(short, long)]
    date: Option<NaiveDate>,

    /// Lines to simulate
    #[arg(short, long, value_delimiter = ',', default_value = "DC1")]
    lines: Vec<String>,

    /// Brick-type variants per line (none = single untyped flow)
    #[arg(long, value_delimiter = ',')]
    brick_types: Vec<String>,

    /// Shift start (UTC, HH:MM:SS)
    #[arg(long, default_value = "06:00:00")]
    start: NaiveTime,

    /// Simulated duration in hours (1-24)
    #[arg(short = 'H', long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=24))]
    hours: u32,

    /// Seconds between samples
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..=3600))]
    sample_secs: u64,

    /// Entry-stage throughput (units/hour per line)
    #[arg(long, default_value = "1200")]
    rate: f64,

    /// Relative standard deviation of per-sample throughput
    #[arg(long, default_value = "0.05")]
    noise: f64,

    /// Devices counting at each stage
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=8))]
    devices_per_stage: u32,

    /// Probability per sample that a running line stops
    #[arg(long, default_value = "0.002")]
    stoppage_prob: f64,

    /// Probability per sample that a device counter resets to zero
    #[arg(long, default_value = "0.0005")]
    reset_prob: f64,

    /// Time compression for live appends (0 = write everything at once)
    #[arg(short, long, default_value = "0")]
    speed: u32,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Simulation State
// ============================================================================

struct Device {
    id: String,
    path: PathBuf,
    writer: BufWriter<File>,
    count: u64,
    resets: u64,
}

impl Device {
    fn open(dir: &Path, id: String) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("{id}.txt"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            id,
            path,
            writer: BufWriter::new(file),
            count: 0,
            resets: 0,
        })
    }

    fn record(&mut self, ts: DateTime<Utc>, units: u64, reset: bool) -> Result<()> {
        if reset && self.count >= MIN_COUNT_FOR_RESET {
            self.count = 0;
            self.resets += 1;
        }
        self.count += units;
        writeln!(self.writer, "[{}] Count: {}", ts.format("%Y-%m-%dT%H:%M:%S%.3fZ"), self.count)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

/// One product flow through a line's stages.
struct Flow {
    line: String,
    brick_type: Option<String>,
    /// Devices per stage, in stage order
    stages: Vec<(String, Vec<Device>)>,
    /// Units counted at each stage over the whole run
    stage_totals: Vec<u64>,
    /// Remaining stoppage (seconds)
    stopped_for: f64,
    stoppages: u64,
}

struct Simulation {
    rng: StdRng,
    flows: Vec<Flow>,
    sample_secs: f64,
    rate_per_flow: f64,
    noise: f64,
    stoppage_prob: f64,
    reset_prob: f64,
}

impl Simulation {
    fn new(args: &Args, config: &EngineConfig, day_dir: &Path) -> Result<Self> {
        let rng = match args.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let variants: Vec<Option<String>> = if args.brick_types.is_empty() {
            vec![None]
        } else {
            args.brick_types.iter().cloned().map(Some).collect()
        };

        let mut flows = Vec::new();
        for line in &args.lines {
            let layout = StageLayout::for_line(line, config);
            let mut next_device = 1u32;
            for variant in &variants {
                let base = match variant {
                    Some(bt) => day_dir.join(line).join(bt),
                    None => day_dir.join(line),
                };
                let mut stages = Vec::with_capacity(layout.stages.len());
                for position in &layout.stages {
                    let mut devices = Vec::new();
                    for _ in 0..args.devices_per_stage {
                        devices.push(Device::open(&base.join(position), format!("{position}-{next_device:02}"))?);
                        next_device += 1;
                    }
                    stages.push((position.clone(), devices));
                }
                flows.push(Flow {
                    line: line.clone(),
                    brick_type: variant.clone(),
                    stage_totals: vec![0; stages.len()],
                    stages,
                    stopped_for: 0.0,
                    stoppages: 0,
                });
            }
        }

        Ok(Self {
            rng,
            flows,
            sample_secs: args.sample_secs as f64,
            rate_per_flow: args.rate / variants.len() as f64,
            noise: args.noise.max(0.0),
            stoppage_prob: args.stoppage_prob.clamp(0.0, 1.0),
            reset_prob: args.reset_prob.clamp(0.0, 1.0),
        })
    }

    /// Advance every flow by one sample and append a line to every device log.
    fn step(&mut self, ts: DateTime<Utc>) -> Result<()> {
        let mean = self.rate_per_flow * self.sample_secs / 3600.0;
        let throughput = Normal::new(mean, (mean * self.noise).max(f64::EPSILON))?;

        for flow in &mut self.flows {
            let running = if flow.stopped_for > 0.0 {
                flow.stopped_for -= self.sample_secs;
                false
            } else if self.rng.gen_bool(self.stoppage_prob) {
                flow.stopped_for = self.rng.gen_range(300.0..1800.0);
                flow.stoppages += 1;
                info!(line = %flow.line, minutes = flow.stopped_for / 60.0, "Line stoppage");
                false
            } else {
                true
            };

            let mut units = if running {
                throughput.sample(&mut self.rng).round().max(0.0) as u64
            } else {
                0
            };

            let mut upstream: Option<String> = None;
            for (index, (position, devices)) in flow.stages.iter_mut().enumerate() {
                if let Some(from) = &upstream {
                    units -= boundary_loss(&mut self.rng, from, units);
                }
                upstream = Some(position.clone());
                flow.stage_totals[index] += units;

                let shares = split(&mut self.rng, units, devices.len());
                for (device, share) in devices.iter_mut().zip(shares) {
                    let reset = self.rng.gen_bool(self.reset_prob);
                    device.record(ts, share, reset)?;
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for flow in &mut self.flows {
            for (_, devices) in &mut flow.stages {
                for device in devices {
                    device.writer.flush().with_context(|| format!("flushing {}", device.path.display()))?;
                }
            }
        }
        Ok(())
    }

    /// Write the finished-goods grade table of every line.
    fn write_classification(&mut self, day_dir: &Path, position: &str) -> Result<()> {
        let mut finished: BTreeMap<&str, u64> = BTreeMap::new();
        for flow in &self.flows {
            *finished.entry(flow.line.as_str()).or_default() += flow.stage_totals.last().copied().unwrap_or(0);
        }

        for (line, units) in finished {
            let grades: BTreeMap<&str, u64> = GRADE_SHARES
                .iter()
                .map(|(grade, share)| (*grade, (units as f64 * share).floor() as u64))
                .collect();
            let dir = day_dir.join(line).join(position);
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            let path = dir.join("classification.json");
            fs::write(&path, serde_json::to_string_pretty(&grades)?)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(line = %line, finished = units, graded = grades.values().sum::<u64>(), "Classification written");
        }
        Ok(())
    }
}

/// Units lost crossing the boundary out of `from_stage`.
fn boundary_loss(rng: &mut StdRng, from_stage: &str, units: u64) -> u64 {
    let mean = if KILN_ENTRY_STAGES.contains(&from_stage) {
        KILN_LOSS
    } else {
        BASE_LOSS
    };
    let fraction = Normal::new(mean, mean / 3.0)
        .map(|d| d.sample(rng))
        .unwrap_or(mean)
        .clamp(0.0, 0.2);
    ((units as f64 * fraction).round() as u64).min(units)
}

/// Split `units` randomly across `parts` devices.
fn split(rng: &mut StdRng, units: u64, parts: usize) -> Vec<u64> {
    let mut shares = vec![0u64; parts.max(1)];
    for _ in 0..units {
        let slot = rng.gen_range(0..shares.len());
        shares[slot] += 1;
    }
    shares
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = EngineConfig::load();
    let date = args.date.unwrap_or_else(local_today);
    let day_dir = date_dir(&args.root, date);

    let mut sim = Simulation::new(&args, &config, &day_dir)?;
    let samples = u64::from(args.hours) * 3600 / args.sample_secs;
    let start = Utc.from_utc_datetime(&date.and_time(args.start));
    let pause = (args.speed > 0).then(|| Duration::from_secs_f64(args.sample_secs as f64 / f64::from(args.speed)));

    info!(
        root = %day_dir.display(),
        lines = ?args.lines,
        flows = sim.flows.len(),
        samples,
        speed = args.speed,
        "Simulation start"
    );

    let started = Instant::now();
    for i in 0..samples {
        let tick = Instant::now();
        let ts = start + ChronoDuration::seconds((i * args.sample_secs) as i64);
        sim.step(ts)?;

        if let Some(pause) = pause {
            sim.flush()?;
            let elapsed = tick.elapsed();
            if elapsed < pause {
                std::thread::sleep(pause - elapsed);
            }
        }
    }
    sim.flush()?;
    sim.write_classification(&day_dir, &config.waste.classification_position)?;

    for flow in &sim.flows {
        let resets: u64 = flow.stages.iter().flat_map(|(_, d)| d).map(|d| d.resets).sum();
        let devices: Vec<&str> = flow.stages.iter().flat_map(|(_, d)| d).map(|d| d.id.as_str()).collect();
        info!(
            line = %flow.line,
            brick_type = flow.brick_type.as_deref().unwrap_or("-"),
            entry = flow.stage_totals.first().copied().unwrap_or(0),
            finished = flow.stage_totals.last().copied().unwrap_or(0),
            stoppages = flow.stoppages,
            resets,
            devices = devices.len(),
            "Flow summary"
        );
    }
    info!(elapsed_secs = started.elapsed().as_secs_f64(), "Simulation complete");
    Ok(())
}
