//! # AxonRules CLI
//!
//! Thin command-line driver for the Hodgkin-Huxley membrane simulator.

use anyhow::Context;
use axon_hh::{run, run_batch, MembraneParameters, SimulationConfig, StimulusProtocol, Trajectory};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "axon")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Single-compartment Hodgkin-Huxley simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single trajectory
    Run {
        /// Total duration (ms)
        #[arg(long, default_value_t = 700.0)]
        duration: f64,

        /// Time step (ms)
        #[arg(long, default_value_t = 0.1)]
        dt: f64,

        /// Pulse onset (ms)
        #[arg(long, default_value_t = 200.0)]
        onset: f64,

        /// Pulse offset (ms)
        #[arg(long, default_value_t = 500.0)]
        offset: f64,

        /// Pulse amplitude (uA/cm^2)
        #[arg(long, default_value_t = 10.0)]
        amplitude: f64,

        /// JSON configuration file (overrides the flags above)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the trajectory as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sweep the pulse amplitude and report spike counts
    Sweep {
        /// Lowest amplitude (uA/cm^2)
        #[arg(long, default_value_t = 0.0)]
        min: f64,

        /// Highest amplitude (uA/cm^2)
        #[arg(long, default_value_t = 20.0)]
        max: f64,

        /// Number of amplitudes to test
        #[arg(long, default_value_t = 11)]
        points: usize,
    },

    /// Print the default membrane constants
    Params,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            duration,
            dt,
            onset,
            offset,
            amplitude,
            config,
            output,
        } => {
            let config = match config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str(&text)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => SimulationConfig {
                    duration,
                    dt,
                    stimulus: StimulusProtocol::pulse(onset, offset, amplitude),
                    ..SimulationConfig::default()
                },
            };

            println!(
                "{} {} ms at dt = {} ms",
                "Simulating:".green().bold(),
                config.duration,
                config.dt
            );

            let spinner = ProgressBar::new_spinner();
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner.set_message("integrating");
            let trajectory = run(&config)?;
            spinner.finish_and_clear();

            report(&trajectory);

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&trajectory)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!(
                    "  {} {}",
                    "Trajectory written to".green(),
                    path.display().to_string().cyan()
                );
            }
        }

        Commands::Sweep { min, max, points } => {
            anyhow::ensure!(points >= 2, "sweep needs at least two points");
            anyhow::ensure!(max > min, "sweep needs max > min");

            let amplitudes: Vec<f64> = (0..points)
                .map(|i| min + (max - min) * i as f64 / (points - 1) as f64)
                .collect();
            let configs: Vec<SimulationConfig> = amplitudes
                .iter()
                .map(|&amplitude| SimulationConfig {
                    stimulus: StimulusProtocol::pulse(200.0, 500.0, amplitude),
                    ..SimulationConfig::default()
                })
                .collect();

            println!(
                "{} {} trajectories in parallel",
                "Sweeping:".green().bold(),
                configs.len()
            );

            for (amplitude, result) in amplitudes.iter().zip(run_batch(&configs)) {
                match result {
                    Ok(trajectory) => {
                        let spikes = trajectory.spike_count(0.0);
                        let label = format!("{spikes} spike(s)");
                        let label = if spikes > 0 { label.cyan() } else { label.normal() };
                        println!("  {amplitude:>6.2} uA/cm^2  ->  {label}");
                    }
                    Err(e) => {
                        println!("  {amplitude:>6.2} uA/cm^2  ->  {}", e.to_string().red());
                    }
                }
            }
        }

        Commands::Params => {
            let p = MembraneParameters::default();
            println!("{}", "Squid giant axon constants:".green().bold());
            println!();
            println!("  {}   = {:>8.3} uF/cm^2", "C_m".cyan(), p.c_m);
            println!("  {}  = {:>8.3} mS/cm^2", "g_Na".cyan(), p.g_na);
            println!("  {}   = {:>8.3} mS/cm^2", "g_K".cyan(), p.g_k);
            println!("  {}   = {:>8.3} mS/cm^2", "g_L".cyan(), p.g_l);
            println!("  {}  = {:>8.3} mV", "E_Na".cyan(), p.e_na);
            println!("  {}   = {:>8.3} mV", "E_K".cyan(), p.e_k);
            println!("  {}   = {:>8.3} mV", "E_L".cyan(), p.e_l);
            println!("  {} = {:>8.3} mV", "V_rest".cyan(), p.v_rest);
        }
    }

    Ok(())
}

fn report(trajectory: &Trajectory) {
    let v_max = trajectory
        .voltage
        .values
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let v_min = trajectory
        .voltage
        .values
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min);

    println!("  {} {}", "Samples:".green(), trajectory.voltage.len());
    println!("  {} {}", "Spikes:".green(), trajectory.spike_count(0.0));
    println!(
        "  {} {v_min:.2} mV .. {v_max:.2} mV",
        "Voltage range:".green()
    );
    if let Some((t, v)) = trajectory.voltage.last() {
        println!("  {} V({t:.1} ms) = {v:.2} mV", "Final:".green());
    }
}
