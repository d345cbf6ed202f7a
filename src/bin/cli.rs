//! Demo binary: construct an engine, advance it, print diagnostics.
//!
//! This is a local driver over the library's engine handles, not the
//! language-agnostic wire protocol of spec.md §6 (no JSON/HTTP framing here).

use clap::{Parser, Subcommand};
use latticefield::{IgsoaEngine, SatpHiggsEngine};
use latticefield_init::{GaussianParams, Placement};
use latticefield_lattice::Dim;

#[derive(Parser)]
#[command(name = "latticefield-cli")]
#[command(about = "Lattice field simulator demo driver")]
#[command(version = latticefield::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an IGSOA simulation with a Gaussian initial packet.
    Igsoa {
        #[arg(long, default_value_t = 4096)]
        nx: usize,
        #[arg(long, default_value_t = 1.0)]
        r_c: f64,
        #[arg(long, default_value_t = 1.0)]
        kappa: f64,
        #[arg(long, default_value_t = 0.1)]
        gamma: f64,
        #[arg(long, default_value_t = 0.01)]
        dt: f64,
        #[arg(long, default_value_t = 50)]
        steps: u64,
    },
    /// Run a SATP+Higgs simulation from the vacuum.
    Satp {
        #[arg(long, default_value_t = 256)]
        nx: usize,
        #[arg(long, default_value_t = 0.1)]
        dx: f64,
        #[arg(long, default_value_t = 1.0)]
        c: f64,
        #[arg(long, default_value_t = -1.0)]
        mu_sq: f64,
        #[arg(long, default_value_t = 0.5)]
        lambda_h: f64,
        #[arg(long, default_value_t = 10_000)]
        steps: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("latticefield=info")
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Igsoa { nx, r_c, kappa, gamma, dt, steps } => run_igsoa(nx, r_c, kappa, gamma, dt, steps)?,
        Commands::Satp { nx, dx, c, mu_sq, lambda_h, steps } => run_satp(nx, dx, c, mu_sq, lambda_h, steps)?,
    }
    Ok(())
}

fn run_igsoa(nx: usize, r_c: f64, kappa: f64, gamma: f64, dt: f64, steps: u64) -> anyhow::Result<()> {
    let mut engine = IgsoaEngine::create(nx, 1, 1, Dim::One, r_c, kappa, gamma, dt, true)
        .map_err(|e| anyhow::anyhow!("construction failed (status {}): {e}", e.status_code()))?;

    let params = GaussianParams {
        amplitude: 1.5,
        sigma: [(nx as f64) / 16.0, 1e-9, 1e-9],
        center: [(nx as f64) / 2.0, 0.0, 0.0],
        baseline_phi: 0.0,
    };
    engine.init_gaussian(&params, Placement::Overwrite);

    tracing::info!(nx, r_c, kappa, gamma, dt, steps, "starting IGSOA run");
    engine
        .advance(steps, None)
        .map_err(|e| anyhow::anyhow!("advance failed (status {}): {e}", e.status_code()))?;

    let metrics = engine.get_metrics();
    let (com_x, _, _) = engine.center_of_mass();
    println!("IGSOA run complete");
    println!("  steps:          {}", engine.step_count());
    println!("  total energy:   {:.6}", engine.total_energy());
    println!("  entropy rate:   {:.6}", engine.entropy_rate());
    println!("  center of mass: {com_x:.3}");
    println!("  ns/op:          {:.3}", metrics.ns_per_op);
    println!("  ops/sec:        {:.0}", metrics.ops_per_sec);
    Ok(())
}

fn run_satp(nx: usize, dx: f64, c: f64, mu_sq: f64, lambda_h: f64, steps: u64) -> anyhow::Result<()> {
    let dt = 0.5 * latticefield_satp::max_stable_dt(c, dx, 1);
    let mut engine = SatpHiggsEngine::create(nx, 1, 1, Dim::One, dx, dt, c, 0.0, 0.0, 0.0, mu_sq, lambda_h)
        .map_err(|e| anyhow::anyhow!("construction failed (status {}): {e}", e.status_code()))?;

    tracing::info!(nx, dx, c, mu_sq, lambda_h, dt, steps, "starting SATP+Higgs run");
    engine
        .advance(steps, None)
        .map_err(|e| anyhow::anyhow!("advance failed (status {}): {e}", e.status_code()))?;

    let metrics = engine.get_metrics();
    println!("SATP+Higgs run complete");
    println!("  steps:          {}", engine.step_count());
    println!("  h_vev:          {:.6}", engine.h_vev());
    println!("  total energy:   {:.6}", engine.total_energy());
    println!("  phi RMS:        {:.3e}", engine.rms_phi());
    println!("  h RMS (rel vev):{:.3e}", engine.rms_h_relative());
    println!("  ns/op:          {:.3}", metrics.ns_per_op);
    println!("  ops/sec:        {:.0}", metrics.ops_per_sec);
    Ok(())
}
