//! `arena-cli` – the `arena` simulator binary.
//!
//! ```text
//! arena [scene.toml]
//! ```
//!
//! 1. Loads `~/.arena/config.toml` (written with defaults on first run) and
//!    applies `ARENA_*` overrides.
//! 2. Loads the scene given on the command line, or the configured one.
//! 3. Runs the simulation loop, paced or flat out, printing a status line
//!    every `report_every` ticks.
//! 4. Intercepts **Ctrl-C** to stop the loop cleanly and print a summary.

mod config;

use std::collections::BTreeSet;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arena_runtime::{EventBus, SimLoop, SimLoopConfig, SimOutcome, Topic};
use arena_types::{AgentSnapshot, EventPayload};
use arena_world::World;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

fn main() -> ExitCode {
    // Before the runtime exists; see `arena_runtime::telemetry`.
    let _telemetry = arena_runtime::init_tracing("arena");

    print_banner();

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let arg = std::env::args().nth(1);
    if matches!(arg.as_deref(), Some("-h" | "--help")) {
        print_usage();
        return ExitCode::SUCCESS;
    }
    let Some(scene_path) = arg.or_else(|| cfg.scene_path.clone()) else {
        println!("{}", "No scene given.".red());
        print_usage();
        return ExitCode::FAILURE;
    };

    let world = match arena_world::load_world(&scene_path) {
        Ok(world) => world,
        Err(e) => {
            println!("{}: {}", "Scene error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  Scene {} loaded: {} agent(s), {}×{} m at {} cells/m, {} ms/tick",
        scene_path.bold(),
        world.len(),
        world.config().width,
        world.config().height,
        world.config().resolution,
        world.config().interval_ms,
    );
    println!(
        "  Mode: {}{}\n",
        if cfg.realtime { "real-time" } else { "as fast as possible" },
        cfg.max_ticks
            .map(|n| format!(", stopping after {n} ticks"))
            .unwrap_or_default()
    );

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping simulation …".yellow().bold());
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop with SIGKILL instead");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(world, &cfg, shutdown)) {
        Ok(outcome) => {
            print_summary(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Simulation error".red(), e);
            ExitCode::FAILURE
        }
    }
}

/// Load settings, writing a default config file on first run.
fn load_config() -> Result<config::Config, String> {
    let path = config::config_path();
    if !path.exists() {
        config::save(&config::Config::default())?;
        println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        );
    }
    config::load()
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulation
// ─────────────────────────────────────────────────────────────────────────────

async fn run(
    world: World,
    cfg: &config::Config,
    shutdown: Arc<AtomicBool>,
) -> Result<SimOutcome, String> {
    let interval_ms = world.config().interval_ms;
    let bus = EventBus::default();
    let mut truth = bus.subscribe_to(Topic::Truth);
    let mut alerts = bus.subscribe_to(Topic::Alerts);

    let (sim, handle) = SimLoop::new(
        world,
        bus,
        SimLoopConfig {
            realtime: cfg.realtime,
            max_ticks: cfg.max_ticks,
            ..SimLoopConfig::default()
        },
    );
    let mut task = tokio::spawn(sim.run());
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    let report_every = cfg.report_every.max(1);
    let mut stalled = BTreeSet::new();

    loop {
        tokio::select! {
            biased;
            outcome = &mut task => return outcome.map_err(|e| e.to_string()),
            _ = poll.tick() => {
                if shutdown.load(Ordering::SeqCst) {
                    handle.shutdown().await;
                }
            }
            event = truth.recv() => match event {
                Ok(event) => {
                    if let EventPayload::Truth { sim_time_ms, agents } = event.payload {
                        report_stalls(&agents, &mut stalled);
                        let tick = sim_time_ms / interval_ms;
                        if tick % report_every == 0 {
                            println!("{}", status_line(tick, sim_time_ms, &agents));
                        }
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {}
            },
            event = alerts.recv() => {
                if let Ok(event) = event
                    && let EventPayload::Fault { component, message } = event.payload
                {
                    println!("  {} {}: {}", "fault".red().bold(), component, message);
                }
            }
        }
    }
}

/// Print agents that became stalled or got moving again since the last tick.
fn report_stalls(agents: &[AgentSnapshot], stalled: &mut BTreeSet<String>) {
    let now: BTreeSet<String> = agents
        .iter()
        .filter(|a| a.stalled)
        .map(|a| a.name.clone())
        .collect();
    for name in now.difference(stalled) {
        println!("  {} {}", "stalled".yellow().bold(), name);
    }
    for name in stalled.difference(&now) {
        println!("  {} {}", "moving".green(), name);
    }
    *stalled = now;
}

fn status_line(tick: u64, sim_time_ms: u64, agents: &[AgentSnapshot]) -> String {
    let stalled = agents.iter().filter(|a| a.stalled).count();
    format!(
        "[tick {tick:>6} | t={:>8.2}s] {} agent(s), {stalled} stalled",
        sim_time_ms as f64 / 1000.0,
        agents.len()
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_summary(outcome: &SimOutcome) {
    println!();
    println!(
        "  {} {} ticks, {:.2} s simulated",
        "✓".green().bold(),
        outcome.ticks,
        outcome.sim_time_ms as f64 / 1000.0
    );
    for agent in outcome.world.snapshot() {
        println!(
            "    {:<16} x={:>7.3} y={:>7.3} a={:>6.3}{}",
            agent.name,
            agent.pose.x,
            agent.pose.y,
            agent.pose.a,
            if agent.stalled { "  (stalled)".yellow().to_string() } else { String::new() }
        );
    }
}

fn print_usage() {
    println!("  Usage: {} [scene.toml]", "arena".bold());
    println!("  Without an argument the scene comes from `scene_path` in");
    println!("  {} or $ARENA_SCENE.", config::config_path().display());
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                         "#.bold().cyan());
    println!("{}", r#"  / _ | _______ ___  ___ _     "#.bold().cyan());
    println!("{}", r#" / __ |/ __/ -_) _ \/ _ `/     "#.bold().cyan());
    println!("{}", r#"/_/ |_/_/  \__/_//_/\_,_/      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Arena".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Multi-robot 2-D simulator");
    println!();
}
