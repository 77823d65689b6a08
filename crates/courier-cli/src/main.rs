//! `courier` – operator console for the delivery robot.
//!
//! This binary stands in for the dashboard pages.  It:
//!
//! 1. Loads `~/.courier/config.toml`; runs a short **first-run wizard** when
//!    the file is absent.
//! 2. Initialises logging (filter from the diagnostics level unless
//!    `RUST_LOG` is set) and optional OTLP span export.
//! 3. Starts the bridge session according to the connection mode.
//! 4. Drops the operator into an **interactive REPL** with slash-commands.
//! 5. Intercepts **Ctrl-C** to engage the emergency stop before exiting.

mod config;
mod repl;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use courier_bridge::{Bridge, ReconnectPolicy, TeleopGate, TopicRegistry};
use courier_types::{ConnectionMode, Settings};

fn main() {
    // Settings come first: the diagnostics level picks the log filter.
    let (settings, config_note) = load_settings();

    let _telemetry = telemetry::init_tracing("courier", settings.diagnostics_level.log_filter());

    print_banner();
    if let Some(note) = config_note {
        println!("{note}");
    }
    let settings = match settings.validate() {
        Ok(()) => settings,
        Err(e) => {
            println!("{}: {} – using defaults", "Config error".red(), e);
            Settings::default()
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let enter = runtime.enter();

    let bridge = Bridge::websocket(TopicRegistry::default());
    let policy = ReconnectPolicy::new(bridge.clone(), settings.clone());
    let gate = Arc::new(TeleopGate::new(bridge, &settings));

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let gate_ctrlc = gate.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – engaging emergency stop …".yellow().bold());
        gate_ctrlc.set_estop(true);
        shutdown_clone.store(true, Ordering::SeqCst);
        // Let the socket pump flush the stop frame.
        std::thread::sleep(Duration::from_millis(200));
        println!("{}", "  ✓ Exiting courier.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; e-stop on Ctrl-C will not be available");
    }

    info!(robot = %settings.robot_name, mode = %settings.connection_mode, "starting bridge session");
    policy.start();
    if settings.connection_mode == ConnectionMode::Manual {
        println!("  Manual connection mode. Type {} to connect.", "/connect".bold().cyan());
    } else {
        println!("  Connecting to {} …", settings.bridge_address.bold());
    }
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let console = repl::Console { policy, gate };
    repl::run(&console, shutdown);

    console.policy.disconnect();
    drop(enter);
    runtime.shutdown_timeout(Duration::from_millis(500));
}

/// Load settings, running the first-run wizard when no file exists.
/// Returns a message to print once the console is up.
fn load_settings() -> (Settings, Option<String>) {
    match config::load() {
        Ok(Some(settings)) => (
            settings,
            Some(format!("  Config loaded from {}", config::config_path().display().to_string().bold())),
        ),
        Ok(None) => (run_first_run_wizard(), None),
        Err(e) => {
            let mut settings = Settings::default();
            config::apply_env_overrides(&mut settings);
            (settings, Some(format!("{}: {}\n  Using default configuration.", "Config error".red(), e)))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Settings {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Courier First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's point the console at a robot.\n");

    let mut settings = Settings::default();

    settings.robot_name = prompt_line(&format!("  Robot name [{}]: ", settings.robot_name), &settings.robot_name);
    settings.bridge_address = prompt_line(
        &format!("  Bridge address [{}]: ", settings.bridge_address),
        &settings.bridge_address,
    );

    println!("  How should the console connect?");
    println!("    1) Automatically on start  (default)");
    println!("    2) Only when asked (/connect)");
    println!("    3) Automatically, with a fallback address");
    match prompt_line("  Enter choice [1]: ", "1").as_str() {
        "2" => settings.connection_mode = ConnectionMode::Manual,
        "3" => {
            settings.connection_mode = ConnectionMode::Fallback;
            let fallback = prompt_line("  Fallback address: ", "");
            if fallback.is_empty() {
                println!("  {} no fallback given; using automatic mode", "Warning:".yellow());
                settings.connection_mode = ConnectionMode::Auto;
            } else {
                settings.fallback_address = Some(fallback);
            }
        }
        _ => settings.connection_mode = ConnectionMode::Auto,
    }

    match config::save(&settings) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut settings);
    settings
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  ______                _           "#.bold().cyan());
    println!("{}", r#" / ____/___  __  _______(_)__  _____"#.bold().cyan());
    println!("{}", r#"/ /   / __ \/ / / / ___/ / _ \/ ___/"#.bold().cyan());
    println!("{}", r#"/ /___/ /_/ / /_/ / /  / /  __/ /   "#.bold().cyan());
    println!("{}", r#"\____/\____/\__,_/_/  /_/\___/_/    "#.bold().cyan());
    println!();
    println!("  {} {}", "Courier".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Delivery robot operator console");
    println!();
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
