//! `skyward` – local planner flight in a simulated world.
//!
//! Usage: `skyward [CONFIG]`
//!
//! 1. Loads `CONFIG`, or `~/.skyward/config.toml`. The default file is
//!    written with default values on first run.
//! 2. Builds the simulated vehicle and cameras, one sensor worker per camera
//!    and the [`PlannerNode`] driving the [`LocalPlanner`].
//! 3. Flies toward the goal until it is reached, `max_cycles` have run, or
//!    **Ctrl-C** is pressed.
//! 4. Prints a flight summary. The exit status is non-zero on collision.

mod config;
mod sim;

use colored::Colorize;
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

use skyward_perception::transform::TfEngine;
use skyward_runtime::{LocalPlanner, PlannerNode, SensorCoordinator, init_tracing};
use skyward_types::PlannerError;

use config::Config;
use sim::{FlightSummary, SimVehicle};

fn main() -> ExitCode {
    // RUST_LOG filters, SKYWARD_LOG_FORMAT=json switches to JSON lines and
    // OTEL_EXPORTER_OTLP_ENDPOINT enables span export.
    let _telemetry = init_tracing("skyward");

    print_banner();

    // ── Shared stop flag ──────────────────────────────────────────────────
    // Raised by Ctrl-C or by the simulation once the goal is reached.
    let stop = Arc::new(AtomicBool::new(false));
    let stop_ctrlc = Arc::clone(&stop);

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the planner …".yellow().bold());
        stop_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the run can only end at the goal or max_cycles");
    }

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "  Goal {} at {} Hz, {} camera(s), {} obstacle(s)\n",
        format!("({:.1}, {:.1}, {:.1})", cfg.goal.x, cfg.goal.y, cfg.goal.z).bold(),
        cfg.node.cycle_hz,
        cfg.sim.cameras.len(),
        cfg.sim.obstacles.len(),
    );

    match fly(&cfg, &stop) {
        Ok((summary, cycles)) => {
            print_summary(&summary, cycles);
            if summary.collisions > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            println!("{}: {}", "Flight aborted".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> Result<Config, PlannerError> {
    if let Some(arg) = std::env::args().nth(1) {
        let path = Path::new(&arg);
        let cfg = config::load(path)?
            .ok_or_else(|| PlannerError::Config(format!("{} does not exist", path.display())))?;
        println!("  Config loaded from {}", path.display().to_string().bold());
        return Ok(cfg);
    }

    let path = config::config_path();
    if let Some(cfg) = config::load(&path)? {
        println!("  Config loaded from {}", path.display().to_string().bold());
        return Ok(cfg);
    }

    let mut cfg = Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => warn!(error = %e, "could not write the default config"),
    }
    config::apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Run the planner against the simulation until `stop` is raised or
/// `max_cycles` is reached.
fn fly(cfg: &Config, stop: &Arc<AtomicBool>) -> Result<(FlightSummary, u64), Box<dyn Error>> {
    let tf = Arc::new(RwLock::new(TfEngine::new()));
    let mut coordinator = SensorCoordinator::new(tf, cfg.sensors);
    let dt = cfg.node.cycle_period().as_secs_f32();
    let vehicle = SimVehicle::new(&cfg.sim, &mut coordinator, cfg.goal, dt, Arc::clone(stop))?;

    let planner = LocalPlanner::new(cfg.local_planner_config());
    let mut node = PlannerNode::new(planner, coordinator, vehicle, cfg.goal, cfg.node);
    let cycles = node.run(stop, cfg.max_cycles);
    let vehicle = node.shutdown();
    Ok((vehicle.summary(), cycles))
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"      __                                __"#.bold().cyan());
    println!("{}", r#"  ___/ /__ __ ___    _____ ________ ___/ /"#.bold().cyan());
    println!("{}", r#" (_-< '_/ // / _ | |/|/ / _ `/ __/ _  / "#.bold().cyan());
    println!("{}", r#"/___/_/\_\_, /\_,_|__,__/\_,_/_/  \_,_/  "#.bold().cyan());
    println!("{}", r#"        /___/                           "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Skyward".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Onboard obstacle avoidance");
    println!();
}

fn print_summary(summary: &FlightSummary, cycles: u64) {
    let p = summary.final_position;
    println!();
    println!("{}", "  Flight summary".bold());
    println!("    cycles           {cycles}");
    println!("    simulated time   {:.1} s", summary.elapsed_s);
    println!("    distance flown   {:.2} m", summary.distance_flown);
    println!("    final position   ({:.2}, {:.2}, {:.2})", p.x, p.y, p.z);
    println!("    min clearance    {:.2} m", summary.min_clearance);
    let goal = if summary.reached_goal {
        "reached".green()
    } else {
        "not reached".yellow()
    };
    println!("    goal             {goal}");
    let collisions = if summary.collisions == 0 {
        "none".green()
    } else {
        summary.collisions.to_string().red().bold()
    };
    println!("    collisions       {collisions}");
    println!();
}
