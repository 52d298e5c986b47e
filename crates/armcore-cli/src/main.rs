//! `armcore` – interactive console for the arm coordination core.
//!
//! 1. Installs tracing (and OTLP export when `OTEL_EXPORTER_OTLP_ENDPOINT`
//!    is set).
//! 2. Loads `~/.armcore/config.toml`, falling back to defaults.
//! 3. Brings up a [`RobotController`] around a simulated arm and a simulated
//!    marker camera.
//! 4. Drops the user into a REPL (`/help` lists the commands).
//! 5. Maps **Ctrl-C** to an emergency stop; `/clear` rehomes afterwards.

mod repl;

use std::sync::{Arc, Weak};
use std::time::Duration;

use colored::Colorize;
use tracing::{error, warn};

use armcore_hal::{SimArm, SimArmConfig, SimMarkerCamera};
use armcore_runtime::config::config_path;
use armcore_runtime::telemetry::init_tracing;
use armcore_runtime::{ControllerConfig, RobotController};

/// Simulated camera: robot (x, y) → pixel `u = 2x + 320`, `v = -2y + 240`.
const SIM_CAMERA: [[f64; 3]; 2] = [[2.0, 0.0, 320.0], [0.0, -2.0, 240.0]];

/// Simulated travel time per waypoint.
const SIM_STEP: Duration = Duration::from_millis(20);

fn main() {
    let _telemetry = init_tracing("armcore-cli");

    print_banner();

    let config = match ControllerConfig::load() {
        Ok(cfg) => {
            println!("  Config: {}", config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            ControllerConfig::default()
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    let arm = SimArm::with_config(
        "sim-arm",
        SimArmConfig {
            step_delay: SIM_STEP,
            initial_pose: config.home,
        },
    );
    let camera = SimMarkerCamera::new(arm.clone(), config.calibration.marker_label.clone(), SIM_CAMERA);

    let controller = match RobotController::new(config, arm) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            println!("{}: {}", "Controller error".red(), e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(controller.initialize()) {
        Ok(state) => println!("  Controller ready: {}\n", repl::paint_state(state)),
        Err(e) => {
            println!("{}: {}", "Initialization failed".red(), e);
            std::process::exit(1);
        }
    }

    install_estop_handler(runtime.handle().clone(), Arc::downgrade(&controller));

    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
    repl::run(&runtime, &controller, &camera);

    match Arc::try_unwrap(controller) {
        Ok(controller) => {
            if let Err(e) = runtime.block_on(controller.shutdown()) {
                println!("{}: {}", "Shutdown error".red(), e);
            }
        }
        Err(_) => warn!("controller still shared at exit; relying on drop cleanup"),
    }
}

/// Ctrl-C latches ESTOP instead of exiting.  The handler only holds a weak
/// reference so the REPL can still shut the controller down cleanly.
fn install_estop_handler(handle: tokio::runtime::Handle, controller: Weak<RobotController>) {
    let installed = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – EMERGENCY STOP".red().bold());
        let Some(controller) = controller.upgrade() else {
            return;
        };
        match handle.block_on(controller.emergency_stop()) {
            Ok(()) => println!(
                "  {} Use {} to rehome or {} to exit.",
                "✓ Arm halted.".green(),
                "/clear".bold(),
                "/quit".bold()
            ),
            Err(e) => println!("  {}: {}", "Emergency stop failed".red(), e),
        }
    });
    if let Err(e) = installed {
        warn!(error = %e, "failed to install Ctrl-C handler; use /estop instead");
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                 ______              "#.bold().cyan());
    println!("{}", r#"  / _ | ______ _  ___ / ___/__  _______   "#.bold().cyan());
    println!("{}", r#" / __ |/ __/  ' \/___/ /__/ _ \/ __/ -_)  "#.bold().cyan());
    println!("{}", r#"/_/ |_/_/ /_/_/_/    \___/\___/_/  \__/   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "armcore".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Camera-guided arm coordination (simulated hardware)");
    println!();
}
