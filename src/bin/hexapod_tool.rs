//! Unified CLI tool for PI C-887 hexapod control.
//!
//! Subcommands:
//! - `query`: positions, on-target status, velocity
//! - `move`: move axes to absolute positions
//! - `velocity`: read or set the system velocity
//! - `cs`: coordinate-system management
//! - `scan linear` / `scan snake`: define and run fly-scan trajectories
//! - `records`: read back recorded position traces
//! - `repl`: interactive GCS command console

use std::fs::File;
use std::io::Write;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use hexapod::wave::SECONDS_PER_SAMPLE;
use hexapod::{
    Axis, AxisValues, Hexapod, HexapodArgs, LinearRamp, ScanDirection, SnakeRaster,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use strum::IntoEnumIterator;
use tracing::info;

/// PI C-887 Hexapod Control Tool
#[derive(Parser, Debug)]
#[command(name = "hexapod_tool")]
#[command(about = "Control tool for the PI C-887 hexapod controller")]
#[command(version)]
struct Args {
    #[command(flatten)]
    conn: HexapodArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query current positions and status
    Query {
        /// Specific axis to query (queries all if not specified)
        #[arg(short, long)]
        axis: Option<String>,
    },

    /// Move axes to absolute positions
    Move {
        /// Targets as AXIS=VALUE pairs, e.g. X=1.5 Y=-2
        #[arg(required = true)]
        targets: Vec<String>,

        /// Don't wait for motion to complete
        #[arg(long)]
        no_wait: bool,
    },

    /// Read or set the system velocity
    Velocity {
        /// New velocity; omit to read the current value
        #[arg(short, long)]
        set: Option<f64>,
    },

    /// Coordinate-system management
    Cs {
        #[command(subcommand)]
        command: CsCommand,
    },

    /// Define and run fly-scan trajectories
    Scan {
        #[command(subcommand)]
        command: ScanCommand,
    },

    /// Read back recorded position traces
    Records {
        /// Samples to read (0 infers from wave table 1)
        #[arg(short, long, default_value = "0")]
        count: u64,

        /// Write traces to a CSV file instead of a summary
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Interactive GCS command REPL
    Repl,
}

#[derive(Subcommand, Debug)]
enum CsCommand {
    /// List all coordinate systems
    List,
    /// Show the active coordinate system
    Active,
    /// Activate a coordinate system
    Activate { name: String },
    /// Define or update a coordinate system
    Define {
        name: String,

        /// Parent system (defaults to ZERO for new systems)
        #[arg(short, long)]
        parent: Option<String>,

        /// Offsets as AXIS=VALUE pairs, e.g. X=80 W=0.5
        offsets: Vec<String>,
    },
    /// Remove a coordinate system
    Remove { name: String },
    /// Re-link a child system under a new parent
    Link { child: String, parent: String },
    /// Show the axis set discovered from the controller
    Axes,
}

#[derive(Subcommand, Debug)]
enum ScanCommand {
    /// Linear fly-scan on one axis
    Linear {
        /// Axis to scan
        #[arg(short, long, default_value = "X")]
        axis: String,

        /// Scan time in seconds
        #[arg(short, long, default_value = "5.0")]
        time: f64,

        /// Travel in position units
        #[arg(short = 'd', long, default_value = "5.0")]
        travel: f64,

        /// Start position
        #[arg(short, long, default_value = "-2.5")]
        start: f64,

        /// Accel/decel window in samples
        #[arg(long, default_value = "10")]
        accel: u64,

        /// Trigger pulse period in seconds
        #[arg(short, long, default_value = "0.01")]
        pulse_period: f64,

        /// Sweep in the negative direction
        #[arg(long)]
        reverse: bool,

        /// Define and stage only; don't start the generators
        #[arg(long)]
        no_run: bool,
    },

    /// Snake raster: X sweeps with a Y staircase
    Snake {
        /// Time per X line in seconds
        #[arg(long, default_value = "0.5")]
        line_time: f64,

        /// X start position
        #[arg(long)]
        start_x: f64,

        /// X travel per line
        #[arg(long)]
        travel_x: f64,

        /// Y start position
        #[arg(long)]
        start_y: f64,

        /// Y end position
        #[arg(long)]
        end_y: f64,

        /// Y step per line
        #[arg(long)]
        step_y: f64,

        /// Trigger pulse period in seconds
        #[arg(short, long, default_value = "0.01")]
        pulse_period: f64,

        /// Turnaround window in samples
        #[arg(long, default_value = "50")]
        turnaround: u64,

        /// Define and stage only; don't start the generators
        #[arg(long)]
        no_run: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let hex = args.conn.connect().map_err(|e| anyhow!(e))?;

    match args.command {
        Command::Query { axis } => cmd_query(&hex, axis.as_deref()),
        Command::Move { targets, no_wait } => cmd_move(&hex, &targets, !no_wait),
        Command::Velocity { set } => cmd_velocity(&hex, set),
        Command::Cs { command } => cmd_cs(&hex, command),
        Command::Scan { command } => cmd_scan(&hex, command),
        Command::Records { count, output } => cmd_records(&hex, count, output.as_deref()),
        Command::Repl => cmd_repl(&hex),
    }
}

fn parse_axis(s: &str) -> Result<Axis> {
    Axis::from_str(s).map_err(|_| anyhow!("unknown axis {s:?} (expected one of X Y Z U V W)"))
}

/// Parse `AXIS=VALUE` pairs into an [`AxisValues`] map.
fn parse_axis_values(pairs: &[String]) -> Result<AxisValues> {
    let mut out = AxisValues::new();
    for pair in pairs {
        let (axis, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected AXIS=VALUE, got {pair:?}"))?;
        let axis = parse_axis(axis.trim())?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| anyhow!("bad value in {pair:?}"))?;
        out.set(axis, value);
    }
    Ok(out)
}

fn cmd_query(hex: &Hexapod, axis: Option<&str>) -> Result<()> {
    let positions = hex.position()?;
    let on_target = hex.on_target()?;
    let axes: Vec<Axis> = match axis {
        Some(name) => vec![parse_axis(name)?],
        None => Axis::iter().collect(),
    };
    for axis in axes {
        let pos = positions.get(axis).unwrap_or(f64::NAN);
        let settled = on_target
            .iter()
            .find(|(a, _)| *a == axis)
            .map(|(_, flag)| if *flag { "on target" } else { "moving" })
            .unwrap_or("unknown");
        println!("{axis}: {pos:.6} ({settled})");
    }
    Ok(())
}

fn cmd_move(hex: &Hexapod, targets: &[String], wait: bool) -> Result<()> {
    let targets = parse_axis_values(targets)?;
    if targets.is_empty() {
        bail!("no targets given");
    }
    hex.move_to(&targets)?;
    if wait {
        let axes: Vec<Axis> = targets.iter().map(|(axis, _)| axis).collect();
        hex.wait_on_target(&axes)?;
        info!("motion complete");
    }
    Ok(())
}

fn cmd_velocity(hex: &Hexapod, set: Option<f64>) -> Result<()> {
    match set {
        Some(velocity) => {
            hex.set_velocity(velocity)?;
            println!("velocity set to {velocity}");
        }
        None => println!("velocity: {}", hex.velocity()?),
    }
    Ok(())
}

fn cmd_cs(hex: &Hexapod, command: CsCommand) -> Result<()> {
    match command {
        CsCommand::List => {
            for cs in hex.coords().list()? {
                let offsets = cs
                    .offsets
                    .to_axis_args()
                    .unwrap_or_else(|| "(no offsets)".to_string());
                match cs.end_coordinate_system {
                    Some(parent) => println!("{} -> {}: {}", cs.name, parent, offsets),
                    None => println!("{}: {}", cs.name, offsets),
                }
            }
        }
        CsCommand::Active => println!("{}", hex.coords().active()?),
        CsCommand::Activate { name } => hex.coords().activate(&name)?,
        CsCommand::Define {
            name,
            parent,
            offsets,
        } => {
            let offsets = parse_axis_values(&offsets)?;
            hex.coords().define(&name, parent.as_deref(), &offsets)?;
        }
        CsCommand::Remove { name } => hex.coords().remove(&name)?,
        CsCommand::Link { child, parent } => hex.coords().link(&child, &parent)?,
        CsCommand::Axes => {
            let axes: Vec<String> = hex
                .coords()
                .discover_axes()?
                .iter()
                .map(Axis::to_string)
                .collect();
            println!("{}", axes.join(" "));
        }
    }
    Ok(())
}

fn cmd_scan(hex: &Hexapod, command: ScanCommand) -> Result<()> {
    let (mut scan, no_run) = match command {
        ScanCommand::Linear {
            axis,
            time,
            travel,
            start,
            accel,
            pulse_period,
            reverse,
            no_run,
        } => {
            let ramp = LinearRamp {
                total_time: time,
                travel,
                start_position: start,
                accel_samples: accel,
                direction: if reverse {
                    ScanDirection::Reverse
                } else {
                    ScanDirection::Forward
                },
            };
            (hex.define_linear(parse_axis(&axis)?, &ramp, pulse_period)?, no_run)
        }
        ScanCommand::Snake {
            line_time,
            start_x,
            travel_x,
            start_y,
            end_y,
            step_y,
            pulse_period,
            turnaround,
            no_run,
        } => {
            let raster = SnakeRaster {
                line_time,
                start_x,
                line_travel: travel_x,
                start_y,
                end_y,
                step_y,
                pulse_period,
                direction: ScanDirection::Forward,
                turnaround_samples: turnaround,
            };
            (hex.define_snake(&raster)?, no_run)
        }
    };

    println!(
        "scan defined: {} samples ({:?}), {} trigger pulses",
        scan.total_points(),
        scan.duration(),
        scan.pulse_count()
    );
    hex.records().configure()?;
    scan.stage(hex)?;
    if no_run {
        println!("staged; generators not started (--no-run)");
        return Ok(());
    }
    scan.run(hex, true)?;
    println!("scan complete");
    Ok(())
}

fn cmd_records(hex: &Hexapod, count: u64, output: Option<&str>) -> Result<()> {
    let records = hex.records().read(count)?;
    let dt = records.sample_time.as_secs_f64();
    match output {
        Some(path) => {
            let mut file = File::create(path)?;
            let mut header = vec!["time".to_string()];
            for axis in Axis::iter() {
                header.push(format!("{axis}_target"));
                header.push(format!("{axis}_real"));
            }
            writeln!(file, "{}", header.join(","))?;
            for i in 0..records.len() {
                let mut row = vec![format!("{}", i as f64 * dt)];
                for axis in Axis::iter() {
                    row.push(format!("{}", records.target(axis)[i]));
                    row.push(format!("{}", records.real(axis)[i]));
                }
                writeln!(file, "{}", row.join(","))?;
            }
            println!("wrote {} samples to {path}", records.len());
        }
        None => {
            println!(
                "{} samples at {} ms per sample",
                records.len(),
                dt / SECONDS_PER_SAMPLE
            );
            for axis in Axis::iter() {
                let target = records.target(axis);
                let real = records.real(axis);
                if real.is_empty() {
                    continue;
                }
                let worst = target
                    .iter()
                    .zip(real.iter())
                    .map(|(t, r)| (t - r).abs())
                    .fold(0.0_f64, f64::max);
                println!(
                    "{axis}: {:.6} -> {:.6}, max tracking error {worst:.6}",
                    real[0],
                    real[real.len() - 1]
                );
            }
        }
    }
    Ok(())
}

fn cmd_repl(hex: &Hexapod) -> Result<()> {
    println!("GCS REPL: lines ending in '?' are queries, everything else is a checked command.");
    println!("Ctrl-D to exit.");
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("gcs> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;
                let result = if line.contains('?') {
                    hex.query(line).map(|reply| print!("{reply}"))
                } else {
                    hex.command(line)
                };
                if let Err(e) = result {
                    println!("error: {e}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
