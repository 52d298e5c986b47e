//! REPL for the armcore console.
//!
//! Supported slash-commands:
//!   /move x y z        – move to a robot-frame position (mm)
//!   /pixel u v [z]     – move to the pose under a camera pixel
//!   /rel dx dy dz      – move by an offset from the current pose
//!   /home              – move to the configured home pose
//!   /safe              – rise vertically to the clearance height
//!   /calibrate         – run auto-calibration with the marker camera
//!   /state             – show the robot state and arm pose
//!   /zones             – show the active workspace bounds
//!   /events [n]        – show the last `n` safety events (default 10)
//!   /estop             – emergency stop
//!   /clear             – clear ESTOP and rehome
//!   /reset             – clear FAULT once the hardware is healthy
//!   /cancel            – abort the motion in progress at its next waypoint
//!   /help              – show this list
//!   /quit | /exit      – shut down and exit

use std::io::{self, BufRead, Write};

use colored::{ColoredString, Colorize};
use tokio::runtime::Runtime;

use armcore_hal::DetectionSource;
use armcore_runtime::{MotionReport, RobotController};
use armcore_types::{ArmError, PixelCoord, RobotState};

const DEFAULT_EVENT_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move { x: f64, y: f64, z: f64 },
    Pixel { u: f64, v: f64, z: Option<f64> },
    Relative { dx: f64, dy: f64, dz: f64 },
    Home,
    Safe,
    Calibrate,
    State,
    Zones,
    Events(usize),
    Estop,
    Clear,
    Reset,
    Cancel,
    Help,
    Quit,
}

/// Parse one input line.  The error is a user-facing message.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = parts.collect();

    let cmd = match head {
        "/move" => {
            let [x, y, z] = numbers::<3>(head, &args)?;
            Command::Move { x, y, z }
        }
        "/rel" => {
            let [dx, dy, dz] = numbers::<3>(head, &args)?;
            Command::Relative { dx, dy, dz }
        }
        "/pixel" => match args.len() {
            2 => {
                let [u, v] = numbers::<2>(head, &args)?;
                Command::Pixel { u, v, z: None }
            }
            _ => {
                let [u, v, z] = numbers::<3>(head, &args)?;
                Command::Pixel { u, v, z: Some(z) }
            }
        },
        "/events" => match args.as_slice() {
            [] => Command::Events(DEFAULT_EVENT_COUNT),
            [n] => Command::Events(
                n.parse()
                    .map_err(|_| format!("/events expects a count, got '{n}'"))?,
            ),
            _ => return Err("usage: /events [n]".to_string()),
        },
        other => {
            if !args.is_empty() {
                return Err(format!("{other} takes no arguments"));
            }
            match other {
                "/home" => Command::Home,
                "/safe" => Command::Safe,
                "/calibrate" => Command::Calibrate,
                "/state" => Command::State,
                "/zones" => Command::Zones,
                "/estop" => Command::Estop,
                "/clear" => Command::Clear,
                "/reset" => Command::Reset,
                "/cancel" => Command::Cancel,
                "/help" => Command::Help,
                "/quit" | "/exit" => Command::Quit,
                _ => return Err(format!("unknown command '{other}'")),
            }
        }
    };
    Ok(cmd)
}

fn numbers<const N: usize>(cmd: &str, args: &[&str]) -> Result<[f64; N], String> {
    if args.len() != N {
        return Err(format!("{cmd} expects {N} numbers, got {}", args.len()));
    }
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("'{arg}' is not a number"))?;
    }
    Ok(out)
}

/// Run until `/quit` or end of input.
pub fn run(runtime: &Runtime, controller: &RobotController, camera: &dyn DetectionSource) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "armcore>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let cmd = match parse(&line) {
            Ok(cmd) => cmd,
            Err(msg) => {
                println!("{} {}. Type {} for available commands.", "✗".red(), msg, "/help".bold());
                continue;
            }
        };

        match cmd {
            Command::Move { x, y, z } => {
                report_motion(runtime.block_on(controller.move_to_position(x, y, z, None)));
            }
            Command::Pixel { u, v, z } => {
                report_motion(runtime.block_on(controller.move_to_pixel(PixelCoord::new(u, v), z)));
            }
            Command::Relative { dx, dy, dz } => {
                report_motion(runtime.block_on(controller.move_relative(dx, dy, dz)));
            }
            Command::Home => report_motion(runtime.block_on(controller.move_to_home())),
            Command::Safe => report_motion(runtime.block_on(controller.move_to_safe_position())),
            Command::Calibrate => match runtime.block_on(controller.auto_calibrate(camera)) {
                Ok(t) => println!(
                    "{} {:?} fit from {} points, mean residual {:.3} mm",
                    "✓".green(),
                    t.model,
                    t.correspondences.len(),
                    t.residual_mm
                ),
                Err(e) => report_error(&e),
            },
            Command::State => cmd_state(runtime, controller),
            Command::Zones => cmd_zones(controller),
            Command::Events(n) => cmd_events(controller, n),
            Command::Estop => match runtime.block_on(controller.emergency_stop()) {
                Ok(()) => println!("{} {}", "■".red().bold(), "ESTOP latched".red().bold()),
                Err(e) => report_error(&e),
            },
            Command::Clear => report_motion(runtime.block_on(controller.clear_estop_and_rehome())),
            Command::Reset => match runtime.block_on(controller.reset_fault()) {
                Ok(state) => println!("{} fault cleared: {}", "✓".green(), paint_state(state)),
                Err(e) => report_error(&e),
            },
            Command::Cancel => {
                if controller.cancel_motion() {
                    println!("{} cancellation requested", "✓".green());
                } else {
                    println!("  {}", "no motion in progress".dimmed());
                }
            }
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

pub fn paint_state(state: RobotState) -> ColoredString {
    let label = state.to_string();
    match state {
        RobotState::Idle | RobotState::Simulation => label.green().bold(),
        RobotState::Planning | RobotState::Moving => label.yellow().bold(),
        RobotState::Estop | RobotState::Fault => label.red().bold(),
    }
}

fn report_motion(result: Result<MotionReport, ArmError>) {
    match result {
        Ok(report) => {
            let pose = report
                .final_pose
                .map(|p| format!("({:.1}, {:.1}, {:.1})", p.x, p.y, p.z))
                .unwrap_or_else(|| "unchanged".to_string());
            println!(
                "{} {} waypoints in {} ms → {}  [{}]",
                "✓".green(),
                report.waypoints,
                report.elapsed.as_millis(),
                pose.bold(),
                paint_state(report.final_state)
            );
        }
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &ArmError) {
    let tag = match e {
        ArmError::EstopEngaged { .. } | ArmError::HardwareTimeout { .. } | ArmError::Hardware { .. } => {
            "Safety".red().bold()
        }
        ArmError::Busy { .. } | ArmError::CalibrationBusy { .. } | ArmError::Cancelled { .. } => {
            "Refused".yellow().bold()
        }
        _ => "Error".red(),
    };
    println!("{tag}: {e}");
}

fn cmd_state(runtime: &Runtime, controller: &RobotController) {
    println!("  State       : {}", paint_state(controller.get_state()));
    let calibrated = controller.calibration();
    match calibrated {
        Some(t) => println!(
            "  Calibration : {:?}, residual {:.3} mm, fitted {}",
            t.model,
            t.residual_mm,
            t.fitted_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("  Calibration : {}", "none".yellow()),
    }
    match runtime.block_on(controller.current_pose()) {
        Ok(p) => println!("  Pose        : ({:.1}, {:.1}, {:.1})", p.x, p.y, p.z),
        Err(e) => println!("  Pose        : {}", e.to_string().red()),
    }
}

fn cmd_zones(controller: &RobotController) {
    let b = controller.workspace_bounds();
    println!("  x ∈ [{:.1}, {:.1}]", b.x.min, b.x.max);
    println!("  y ∈ [{:.1}, {:.1}]", b.y.min, b.y.max);
    println!("  z ∈ [{:.1}, {:.1}]", b.z.min, b.z.max);
    if let Some(t) = b.table_z {
        println!("  table plane z = {t:.1}");
    }
    for zone in &b.exclusion_zones {
        println!(
            "  excluded {} : {:?} → {:?}",
            zone.id.bold(),
            zone.min,
            zone.max
        );
    }
}

fn cmd_events(controller: &RobotController, n: usize) {
    let events = controller.safety_events();
    let skip = events.len().saturating_sub(n);
    for e in &events[skip..] {
        println!(
            "  {} {} → {}  {:?}",
            e.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            paint_state(e.from),
            paint_state(e.to),
            e.cause
        );
    }
    if events.is_empty() {
        println!("  {}", "no events".dimmed());
    }
}

fn cmd_help() {
    println!();
    println!("{}", "armcore Commands".bold().underline());
    println!("  {}  – move to a robot-frame position (mm)", "/move x y z".bold().cyan());
    println!("  {}  – move to the pose under a camera pixel", "/pixel u v [z]".bold().cyan());
    println!("  {}  – move by an offset (mm)", "/rel dx dy dz".bold().cyan());
    println!("  {}  – move to the home pose", "/home".bold().cyan());
    println!("  {}  – rise straight up to the clearance height", "/safe".bold().cyan());
    println!("  {}  – auto-calibrate with the marker camera", "/calibrate".bold().cyan());
    println!("  {}  – robot state, calibration and pose", "/state".bold().cyan());
    println!("  {}  – active workspace bounds", "/zones".bold().cyan());
    println!("  {}  – recent safety events", "/events [n]".bold().cyan());
    println!("  {}  – emergency stop (also Ctrl-C)", "/estop".bold().cyan());
    println!("  {}  – clear ESTOP and rehome", "/clear".bold().cyan());
    println!("  {}  – clear FAULT", "/reset".bold().cyan());
    println!("  {}  – abort the motion in progress", "/cancel".bold().cyan());
    println!("  {}  – exit", "/quit  /exit".bold().cyan());
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
