//! Controller configuration – reads/writes `~/.armcore/config.toml`.
//!
//! ```toml
//! [workspace]
//! x = { min = -250.0, max = 250.0 }
//! y = { min = -250.0, max = 250.0 }
//! z = { min = 50.0, max = 350.0 }
//! table_z = 60.0
//!
//! [[workspace.exclusion_zones]]
//! id = "base_mount"
//! min = [-60.0, -60.0, 0.0]
//! max = [60.0, 60.0, 120.0]
//!
//! [home]
//! x = 0.0
//! y = 0.0
//! z = 200.0
//!
//! [planner]
//! max_step_mm = 10.0
//! clearance_z = 200.0
//!
//! [supervisor]
//! ack_timeout_ms = 5000
//! monitor_interval_ms = 50
//!
//! [calibration]
//! model = "affine"
//! tolerance_mm = 5.0
//! record_path = "/var/lib/armcore/calibration.json"
//! ```
//!
//! Every section and key is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use armcore_kernel::{SupervisorConfig, WorkspaceBounds, WorkspaceValidator};
use armcore_perception::CalibrationConfig;
use armcore_types::{ArmError, Pose};

use crate::planner::{MAX_WAYPOINTS, PlannerConfig};

/// `[calibration]` section: engine settings plus the auto-calibration
/// routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    #[serde(flatten)]
    pub engine: CalibrationConfig,
    /// Detection label of the marker carried by the arm.
    #[serde(default = "default_marker_label")]
    pub marker_label: String,
    /// Detections below this confidence are ignored.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Poses visited by auto-calibration, in order.
    #[serde(default = "default_auto_poses")]
    pub auto_poses: Vec<Pose>,
}

fn default_marker_label() -> String {
    "marker".to_string()
}
fn default_min_confidence() -> f32 {
    0.5
}
fn default_auto_poses() -> Vec<Pose> {
    let mut poses = Vec::with_capacity(9);
    for y in [-100.0, 0.0, 100.0] {
        for x in [-100.0, 0.0, 100.0] {
            poses.push(Pose::new(x, y, 150.0));
        }
    }
    poses
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            engine: CalibrationConfig::default(),
            marker_label: default_marker_label(),
            min_confidence: default_min_confidence(),
            auto_poses: default_auto_poses(),
        }
    }
}

/// Full controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub workspace: WorkspaceBounds,
    #[serde(default = "default_home")]
    pub home: Pose,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    /// Optional JSON-lines mirror of the safety event log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_log_path: Option<PathBuf>,
}

fn default_home() -> Pose {
    Pose::new(0.0, 0.0, 200.0)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceBounds::default(),
            home: default_home(),
            planner: PlannerConfig::default(),
            supervisor: SupervisorConfig::default(),
            calibration: CalibrationSettings::default(),
            safety_log_path: None,
        }
    }
}

fn config_err(msg: impl Into<String>) -> ArmError {
    ArmError::Config(msg.into())
}

impl ControllerConfig {
    /// Load from `path`.  Returns `Ok(None)` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ArmError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| config_err(format!("failed to read config at {}: {e}", path.display())))?;
        let mut cfg: ControllerConfig =
            toml::from_str(&raw).map_err(|e| config_err(format!("failed to parse config: {e}")))?;
        cfg.apply_env_overrides();
        Ok(Some(cfg))
    }

    /// Load from [`config_path`], falling back to defaults when no file
    /// exists.
    pub fn load() -> Result<Self, ArmError> {
        match Self::load_from(&config_path())? {
            Some(cfg) => Ok(cfg),
            None => {
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                Ok(cfg)
            }
        }
    }

    /// Apply `ARMCORE_*` environment variable overrides.
    ///
    /// | Variable | Config field |
    /// |---|---|
    /// | `ARMCORE_CALIBRATION_FILE` | `calibration.record_path` |
    /// | `ARMCORE_MONITOR_INTERVAL_MS` | `supervisor.monitor_interval_ms` |
    /// | `ARMCORE_ACK_TIMEOUT_MS` | `supervisor.ack_timeout_ms` |
    /// | `ARMCORE_MAX_STEP_MM` | `planner.max_step_mm` |
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ARMCORE_CALIBRATION_FILE") {
            self.calibration.engine.record_path = Some(PathBuf::from(v));
        }
        if let Some(ms) = var("ARMCORE_MONITOR_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.supervisor.monitor_interval_ms = ms;
        }
        if let Some(ms) = var("ARMCORE_ACK_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.supervisor.ack_timeout_ms = ms;
        }
        if let Some(mm) = var("ARMCORE_MAX_STEP_MM").and_then(|v| v.parse::<f64>().ok()) {
            self.planner.max_step_mm = mm;
        }
    }

    /// Reject configurations the controller cannot run safely with.
    pub fn validate(&self) -> Result<(), ArmError> {
        self.workspace.check().map_err(config_err)?;

        let p = &self.planner;
        for (name, value) in [
            ("planner.max_step_mm", p.max_step_mm),
            ("planner.max_speed_mm_s", p.max_speed_mm_s),
            ("planner.approach_speed_mm_s", p.approach_speed_mm_s),
            ("planner.max_acceleration_mm_s2", p.max_acceleration_mm_s2),
            ("calibration.tolerance_mm", self.calibration.engine.tolerance_mm),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(config_err(format!("{name} must be positive, got {value}")));
            }
        }
        if !p.clearance_z.is_finite() {
            return Err(config_err("planner.clearance_z must be finite"));
        }
        // A lifted detour is at most three diagonals long.
        let w = &self.workspace;
        let diagonal = Pose::new(w.x.min, w.y.min, w.z.min).distance_to(&Pose::new(w.x.max, w.y.max, w.z.max));
        if 3.0 * diagonal / p.max_step_mm > MAX_WAYPOINTS as f64 {
            return Err(config_err(format!(
                "planner.max_step_mm {} is too fine for this workspace (more than {MAX_WAYPOINTS} waypoints per move)",
                p.max_step_mm
            )));
        }

        let s = &self.supervisor;
        if s.ack_timeout_ms == 0 || s.monitor_interval_ms == 0 {
            return Err(config_err("supervisor timeouts must be non-zero"));
        }

        if !(0.0..=1.0).contains(&self.calibration.min_confidence) {
            return Err(config_err(format!(
                "calibration.min_confidence {} is outside [0, 1]",
                self.calibration.min_confidence
            )));
        }

        WorkspaceValidator::new(self.workspace.clone())
            .validate(&self.home)
            .map_err(|e| config_err(format!("home pose is outside the workspace: {e}")))?;
        Ok(())
    }

    /// Write to `path` with owner-only permissions on Unix.
    pub fn save_to(&self, path: &Path) -> Result<(), ArmError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| config_err(format!("failed to create config directory: {e}")))?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| config_err(format!("failed to serialize config: {e}")))?;
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .and_then(|mut f| f.write_all(raw.as_bytes()))
                .map_err(|e| config_err(format!("failed to write config at {}: {e}", path.display())))?;
        }
        #[cfg(not(unix))]
        fs::write(path, raw)
            .map_err(|e| config_err(format!("failed to write config at {}: {e}", path.display())))?;
        Ok(())
    }
}

/// `$ARMCORE_CONFIG`, or `~/.armcore/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("ARMCORE_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armcore").join("config.toml")
}
