//! REPL – the operator console.
//!
//! Supported slash-commands:
//!   /connect            – connect with the current settings
//!   /disconnect         – close the connection
//!   /status             – connection, robot status, pose and command flags
//!   /estop              – toggle the emergency stop
//!   /teleop on|off      – enable or disable teleoperation
//!   /drive X Y          – one stick sample, axes in [-1, 1]
//!   /goal X Y [YAW]     – navigate to a map position
//!   /home               – cancel the current move and return home
//!   /email ADDRESS      – set the delivery destination email
//!   /camera on|off      – toggle the camera stream
//!   /settings           – print the settings in effect
//!   /reload             – re-read `~/.courier/config.toml` and apply it
//!   /help               – show this list
//!   /quit | /exit       – gracefully exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier_bridge::{ApplyOutcome, AxisInput, ReconnectPolicy, TeleopGate};
use courier_types::{ConnectionState, Settings};

use crate::config;

/// One parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    Disconnect,
    Status,
    Estop,
    Teleop(bool),
    Drive(AxisInput),
    Goal { x: f64, y: f64, yaw: f64 },
    Home,
    Email(String),
    Camera(bool),
    Settings,
    Reload,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".into());
        };
        let args: Vec<&str> = words.collect();

        let command = match (head, args.as_slice()) {
            ("/connect", []) => Command::Connect,
            ("/disconnect", []) => Command::Disconnect,
            ("/status", []) => Command::Status,
            ("/estop", []) => Command::Estop,
            ("/teleop", [state]) => Command::Teleop(parse_switch(state)?),
            ("/drive", [x, y]) => Command::Drive(AxisInput { x: parse_number(x)?, y: parse_number(y)? }),
            ("/goal", [x, y]) => Command::Goal { x: parse_number(x)?, y: parse_number(y)?, yaw: 0.0 },
            ("/goal", [x, y, yaw]) => Command::Goal {
                x: parse_number(x)?,
                y: parse_number(y)?,
                yaw: parse_number(yaw)?,
            },
            ("/home", []) => Command::Home,
            ("/email", [address]) => Command::Email(address.to_string()),
            ("/camera", [state]) => Command::Camera(parse_switch(state)?),
            ("/settings", []) => Command::Settings,
            ("/reload", []) => Command::Reload,
            ("/help", []) => Command::Help,
            ("/quit" | "/exit", []) => Command::Quit,
            (
                "/connect" | "/disconnect" | "/status" | "/estop" | "/teleop" | "/drive" | "/goal"
                | "/home" | "/email" | "/camera" | "/settings" | "/reload" | "/help" | "/quit"
                | "/exit",
                _,
            ) => return Err(format!("wrong arguments for {head}")),
            (other, _) => return Err(format!("unknown command '{other}'")),
        };
        Ok(command)
    }
}

fn parse_switch(word: &str) -> Result<bool, String> {
    match word {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

fn parse_number(word: &str) -> Result<f64, String> {
    match word.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("'{word}' is not a number")),
    }
}

/// The live session the console drives.
pub struct Console {
    pub policy: ReconnectPolicy,
    pub gate: Arc<TeleopGate>,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(console: &Console, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "courier>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(command) => execute(console, command),
            Err(e) => println!("{} {}. Type {} for available commands.", "Error:".red(), e, "/help".bold()),
        }
    }
}

fn execute(console: &Console, command: Command) {
    let gate = &console.gate;
    let result = match command {
        Command::Connect => {
            console.policy.connect();
            println!("  Connecting to {} …", console.policy.settings().bridge_address.bold());
            Ok(())
        }
        Command::Disconnect => {
            console.policy.disconnect();
            println!("  {}", "Disconnected.".yellow());
            Ok(())
        }
        Command::Status => {
            cmd_status(console);
            Ok(())
        }
        Command::Estop => {
            if gate.toggle_estop() {
                println!("  {}", "EMERGENCY STOP ENGAGED".red().bold());
            } else {
                println!("  {}", "Emergency stop released".green());
            }
            Ok(())
        }
        Command::Teleop(true) => gate.enable_teleop().map(|()| println!("  {}", "Teleop enabled".green())),
        Command::Teleop(false) => gate.disable_teleop().map(|()| println!("  {}", "Teleop disabled".green())),
        Command::Drive(input) => gate.drive(input).map(|sent| {
            if !sent {
                println!("  {}", "sample dropped (teleop off, e-stop engaged, or too fast)".dimmed());
            }
        }),
        Command::Goal { x, y, yaw } => gate.go_to(x, y, yaw).map(|()| println!("  Goal sent: ({x}, {y}) yaw {yaw}")),
        Command::Home => gate.return_home().map(|()| println!("  Returning home")),
        Command::Email(address) => gate
            .set_destination_email(&address)
            .map(|()| println!("  Destination email set to {}", address.bold())),
        Command::Camera(enabled) => {
            let mut settings = console.policy.settings();
            settings.camera_enabled = enabled;
            apply(console, settings);
            Ok(())
        }
        Command::Settings => {
            match toml::to_string_pretty(&console.policy.settings()) {
                Ok(raw) => println!("{raw}"),
                Err(e) => println!("{}: {}", "Error".red(), e),
            }
            Ok(())
        }
        Command::Reload => {
            match config::load() {
                Ok(Some(settings)) => apply(console, settings),
                Ok(None) => println!("  No config file at {}", config::config_path().display()),
                Err(e) => println!("{}: {}", "Config error".red(), e),
            }
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("  {} {}", "✗".red().bold(), e);
    }
}

/// Apply and persist `settings`, then refresh the teleop limits.
fn apply(console: &Console, settings: Settings) {
    match console.policy.apply_settings(settings.clone()) {
        Ok(outcome) => {
            console.gate.update_limits(&settings);
            match outcome {
                ApplyOutcome::Applied => println!("  {}", "✓ Settings applied".green()),
                ApplyOutcome::ReconnectScheduled => {
                    println!("  {}", "✓ Settings applied; reconnecting".green())
                }
            }
            if let Err(e) = config::save(&settings) {
                println!("{}: {}", "Error saving config".red(), e);
            }
        }
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

fn cmd_status(console: &Console) {
    let bridge = console.policy.bridge();
    let store = bridge.store();
    let settings = console.policy.settings();

    let state = bridge.connection_state();
    let state_str = match state {
        ConnectionState::Connected => state.to_string().green(),
        ConnectionState::Connecting => state.to_string().yellow(),
        ConnectionState::Disconnected => state.to_string().dimmed(),
        ConnectionState::Erroring => state.to_string().red(),
    };

    println!("{}", format!("{} status", settings.robot_name).bold().underline());
    println!("  Connection   : {} ({})", state_str, settings.connection_mode);
    if let Some(config) = bridge.config() {
        println!("  Bridge       : {}", config.address);
    }
    if let Some(error) = store.last_error() {
        println!("  Last error   : {}", error.red());
    }
    println!("  Robot status : {}", store.current_status().unwrap_or_else(|| "unknown".into()));

    let pose = store.current_pose();
    println!(
        "  Pose         : x {:.2}  y {:.2}  floor {:.0}  yaw {:.1}°",
        pose.position.x,
        pose.position.y,
        pose.position.z,
        pose.orientation.yaw().to_degrees()
    );
    if let Some(reached) = store.goal_reached() {
        println!("  Goal reached : {reached}");
    }
    match store.camera_frame() {
        Some(frame) => println!("  Camera       : {} bytes", frame.len()),
        None if settings.camera_enabled => println!("  Camera       : {}", "no frame yet".dimmed()),
        None => println!("  Camera       : {}", "disabled".dimmed()),
    }

    let estop = if store.estop_engaged() { "ENGAGED".red().bold() } else { "released".green() };
    println!("  E-stop       : {estop}");
    println!("  Teleop       : {}", if store.teleop_enabled() { "on" } else { "off" });

    let topics: Vec<String> = bridge.live_subscriptions().into_iter().map(|h| h.wire_name).collect();
    println!("  Subscribed   : {}", if topics.is_empty() { "-".to_string() } else { topics.join(", ") });
}

fn cmd_help() {
    println!();
    println!("{}", "Courier Commands".bold().underline());
    println!("  {}       – connect with the current settings", "/connect".bold().cyan());
    println!("  {}    – close the connection", "/disconnect".bold().cyan());
    println!("  {}        – connection and robot status", "/status".bold().cyan());
    println!("  {}         – toggle the emergency stop", "/estop".bold().cyan());
    println!("  {} – enable or disable teleop", "/teleop on|off".bold().cyan());
    println!("  {}     – one joystick sample", "/drive X Y".bold().cyan());
    println!("  {} – navigate to a map position", "/goal X Y [YAW]".bold().cyan());
    println!("  {}          – cancel the move and return home", "/home".bold().cyan());
    println!("  {}  – set the destination email", "/email ADDRESS".bold().cyan());
    println!("  {} – toggle the camera stream", "/camera on|off".bold().cyan());
    println!("  {}      – print the settings in effect", "/settings".bold().cyan());
    println!("  {}        – re-read and apply the config file", "/reload".bold().cyan());
    println!("  {}  – exit", "/quit  /exit".bold().cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(Command::parse("/connect"), Ok(Command::Connect));
        assert_eq!(Command::parse("  /status  "), Ok(Command::Status));
        assert_eq!(Command::parse("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn parses_switches() {
        assert_eq!(Command::parse("/teleop on"), Ok(Command::Teleop(true)));
        assert_eq!(Command::parse("/camera off"), Ok(Command::Camera(false)));
        assert!(Command::parse("/camera maybe").is_err());
    }

    #[test]
    fn parses_numeric_arguments() {
        assert_eq!(
            Command::parse("/drive 0.5 -1"),
            Ok(Command::Drive(AxisInput { x: 0.5, y: -1.0 }))
        );
        assert_eq!(Command::parse("/goal 3 4"), Ok(Command::Goal { x: 3.0, y: 4.0, yaw: 0.0 }));
        assert_eq!(Command::parse("/goal 3 4 1.57"), Ok(Command::Goal { x: 3.0, y: 4.0, yaw: 1.57 }));
        assert!(Command::parse("/goal 3 north").is_err());
        assert!(Command::parse("/drive NaN 0").is_err());
    }

    #[test]
    fn rejects_wrong_arity_and_unknown_commands() {
        assert_eq!(Command::parse("/estop now"), Err("wrong arguments for /estop".to_string()));
        assert_eq!(Command::parse("/drive 1"), Err("wrong arguments for /drive".to_string()));
        assert_eq!(Command::parse("/fly"), Err("unknown command '/fly'".to_string()));
    }

    #[test]
    fn email_keeps_address() {
        assert_eq!(
            Command::parse("/email ops@example.com"),
            Ok(Command::Email("ops@example.com".into()))
        );
    }
}
