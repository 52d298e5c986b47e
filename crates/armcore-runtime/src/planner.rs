//! Trajectory Planner.
//!
//! Turns a target (robot pose or camera pixel) into a [`Trajectory`] whose
//! every waypoint passes the [`WorkspaceValidator`]:
//!
//! 1. resolve a pixel target through the active calibration,
//! 2. validate the target itself,
//! 3. subdivide the straight line from the current pose into steps of at
//!    most `max_step_mm`,
//! 4. if any intermediate waypoint is rejected, retry once with a lifted
//!    detour (raise to the clearance height, traverse, descend).
//!
//! Planning is synchronous and deterministic for identical inputs.  It never
//! touches hardware.
//!
//! Each waypoint carries a speed hint and a duration hint derived from a
//! trapezoidal velocity profile per leg (rest to rest).
//!
//! # Example
//!
//! ```
//! use armcore_kernel::{WorkspaceBounds, WorkspaceValidator};
//! use armcore_runtime::planner::{PlannerConfig, Target, TrajectoryPlanner};
//! use armcore_types::Pose;
//!
//! let validator = WorkspaceValidator::new(WorkspaceBounds::default());
//! let config = PlannerConfig::default();
//! let planner = TrajectoryPlanner::new(&validator, &config);
//!
//! let traj = planner
//!     .plan(&Pose::new(0.0, 0.0, 200.0), &Target::Pose(Pose::new(100.0, 0.0, 200.0)), 10.0)
//!     .unwrap();
//! assert_eq!(traj.len(), 10);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use armcore_kernel::WorkspaceValidator;
use armcore_perception::CalibrationTransform;
use armcore_types::{CalibrationError, PixelCoord, PlanningError, Pose, Trajectory, ValidationError, Waypoint};

/// Legs shorter than this are skipped.
const MIN_LEG_MM: f64 = 1e-6;

/// Upper bound on the waypoints of one trajectory.  A step too fine to stay
/// under it is refused as [`PlanningError::InvalidStep`].
pub const MAX_WAYPOINTS: usize = 20_000;

/// Waypoints needed to cover `length` in steps of at most `max_step_mm`, or
/// `None` when that exceeds [`MAX_WAYPOINTS`].
pub fn step_count(length: f64, max_step_mm: f64) -> Option<usize> {
    let steps = (length / max_step_mm).ceil().max(1.0);
    (steps <= MAX_WAYPOINTS as f64).then_some(steps as usize)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Largest distance between consecutive waypoints.
    #[serde(default = "default_max_step_mm")]
    pub max_step_mm: f64,
    /// Height used for the lifted detour.
    #[serde(default = "default_clearance_z")]
    pub clearance_z: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed_mm_s: f64,
    /// Cruise speed of the final descent of a detour.
    #[serde(default = "default_approach_speed")]
    pub approach_speed_mm_s: f64,
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration_mm_s2: f64,
}

fn default_max_step_mm() -> f64 {
    10.0
}
fn default_clearance_z() -> f64 {
    200.0
}
fn default_max_speed() -> f64 {
    100.0
}
fn default_approach_speed() -> f64 {
    25.0
}
fn default_max_acceleration() -> f64 {
    500.0
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_step_mm: default_max_step_mm(),
            clearance_z: default_clearance_z(),
            max_speed_mm_s: default_max_speed(),
            approach_speed_mm_s: default_approach_speed(),
            max_acceleration_mm_s2: default_max_acceleration(),
        }
    }
}

/// Where a motion should end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Pose(Pose),
    /// A camera pixel, optionally at an explicit height instead of the
    /// calibrated working plane.
    Pixel { pixel: PixelCoord, z: Option<f64> },
    /// Displacement from the current pose.
    Offset { dx: f64, dy: f64, dz: f64 },
    /// Straight up to the clearance height above the current position.  A
    /// pose already above it stays where it is.
    Retract,
}

/// Borrowing planner: cheap to build per request from snapshots of the live
/// bounds and calibration.
pub struct TrajectoryPlanner<'a> {
    validator: &'a WorkspaceValidator,
    calibration: Option<&'a CalibrationTransform>,
    config: &'a PlannerConfig,
}

impl<'a> TrajectoryPlanner<'a> {
    pub fn new(validator: &'a WorkspaceValidator, config: &'a PlannerConfig) -> Self {
        Self {
            validator,
            calibration: None,
            config,
        }
    }

    /// Enable pixel targets.
    pub fn with_calibration(mut self, calibration: Option<&'a CalibrationTransform>) -> Self {
        self.calibration = calibration;
        self
    }

    /// Resolve `target` to a robot pose.  A target without orientation
    /// inherits the current one.
    pub fn resolve(&self, current: &Pose, target: &Target) -> Result<Pose, PlanningError> {
        let pose = match *target {
            Target::Pose(p) => p,
            Target::Offset { dx, dy, dz } => {
                Pose::new(current.x + dx, current.y + dy, current.z + dz)
            }
            Target::Retract => current.with_z(
                self.config
                    .clearance_z
                    .max(current.z)
                    .min(self.validator.bounds().z.max),
            ),
            Target::Pixel { pixel, z } => {
                let calibration = self
                    .calibration
                    .ok_or(PlanningError::Calibration(CalibrationError::NotCalibrated))?;
                let p = calibration.to_robot(pixel).map_err(PlanningError::Calibration)?;
                match z {
                    Some(z) => p.with_z(z),
                    None => p,
                }
            }
        };
        Ok(Pose {
            orientation: pose.orientation.or(current.orientation),
            ..pose
        })
    }

    pub fn plan(
        &self,
        current: &Pose,
        target: &Target,
        max_step_mm: f64,
    ) -> Result<Trajectory, PlanningError> {
        if !max_step_mm.is_finite() || max_step_mm <= 0.0 {
            return Err(PlanningError::InvalidStep { max_step_mm });
        }
        let goal = self.resolve(current, target)?;
        self.validator.validate(&goal).map_err(PlanningError::Bounds)?;

        if step_count(current.distance_to(&goal), max_step_mm).is_none() {
            return Err(PlanningError::InvalidStep { max_step_mm });
        }

        let cruise = self.config.max_speed_mm_s;
        let direct = self.leg(current, &goal, max_step_mm, cruise);
        let Some((index, violation)) = self.first_violation(&direct) else {
            debug!(waypoints = direct.len(), "direct path accepted");
            return Ok(Trajectory::new(direct));
        };
        debug!(waypoint = index, %violation, "direct path rejected; trying lifted detour");

        let clearance = self
            .config
            .clearance_z
            .max(current.z)
            .max(goal.z)
            .min(self.validator.bounds().z.max);
        let lift = current.with_z(clearance);
        let over = goal.with_z(clearance);
        let detour_mm =
            current.distance_to(&lift) + lift.distance_to(&over) + over.distance_to(&goal);
        if step_count(detour_mm, max_step_mm).is_none() {
            return Err(PlanningError::InvalidStep { max_step_mm });
        }

        let mut waypoints = self.leg(current, &lift, max_step_mm, cruise);
        waypoints.extend(self.leg(&lift, &over, max_step_mm, cruise));
        waypoints.extend(self.leg(&over, &goal, max_step_mm, self.config.approach_speed_mm_s));

        if let Some((waypoint, violation)) = self.first_violation(&waypoints) {
            return Err(PlanningError::NoValidPath {
                clearance_z: clearance,
                waypoint,
                violation,
            });
        }
        debug!(waypoints = waypoints.len(), clearance_z = clearance, "lifted detour accepted");
        Ok(Trajectory::new(waypoints))
    }

    fn first_violation(&self, waypoints: &[Waypoint]) -> Option<(usize, ValidationError)> {
        waypoints
            .iter()
            .enumerate()
            .find_map(|(i, wp)| self.validator.validate(&wp.pose).err().map(|e| (i, e)))
    }

    /// Straight segment `from → to`, excluding `from`, in equal steps.
    fn leg(&self, from: &Pose, to: &Pose, max_step_mm: f64, speed: f64) -> Vec<Waypoint> {
        let length = from.distance_to(to);
        if length < MIN_LEG_MM {
            return Vec::new();
        }
        let steps = step_count(length, max_step_mm).unwrap_or(MAX_WAYPOINTS);
        let accel = self.config.max_acceleration_mm_s2;

        let mut prev_t = 0.0;
        (1..=steps)
            .map(|k| {
                let frac = k as f64 / steps as f64;
                let t = profile_time(frac * length, length, speed, accel);
                let hint = (t - prev_t).max(0.0);
                prev_t = t;
                Waypoint {
                    index: 0,
                    pose: from.lerp(to, frac),
                    speed_mm_s: speed,
                    duration_hint: Duration::try_from_secs_f64(hint).unwrap_or_default(),
                }
            })
            .collect()
    }
}

/// Time to cover distance `s` along a rest-to-rest leg of `length` mm under
/// a trapezoidal (or triangular, for short legs) velocity profile.
fn profile_time(s: f64, length: f64, speed: f64, accel: f64) -> f64 {
    if speed <= 0.0 || !speed.is_finite() {
        return 0.0;
    }
    if accel <= 0.0 || !accel.is_finite() {
        return s / speed;
    }
    let ramp = speed * speed / (2.0 * accel);
    let (peak, ramp) = if 2.0 * ramp <= length {
        (speed, ramp)
    } else {
        ((accel * length).sqrt(), length / 2.0)
    };
    let t_ramp = peak / accel;
    let total = 2.0 * t_ramp + (length - 2.0 * ramp) / peak;

    if s <= ramp {
        (2.0 * s / accel).sqrt()
    } else if s <= length - ramp {
        t_ramp + (s - ramp) / peak
    } else {
        total - (2.0 * (length - s).max(0.0) / accel).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armcore_kernel::{AxisRange, ExclusionZone, WorkspaceBounds};
    use armcore_perception::calibration::{fit, CalibrationModel, Correspondence};
    use armcore_types::{Orientation, PlanningCause};

    fn wide_bounds(zones: Vec<ExclusionZone>) -> WorkspaceBounds {
        WorkspaceBounds {
            x: AxisRange::new(-400.0, 400.0),
            y: AxisRange::new(-400.0, 400.0),
            z: AxisRange::new(0.0, 400.0),
            table_z: None,
            exclusion_zones: zones,
        }
    }

    fn low_obstacle() -> ExclusionZone {
        ExclusionZone::new("fixture", [100.0, -50.0, 0.0], [200.0, 50.0, 50.0])
    }

    fn assert_all_valid(v: &WorkspaceValidator, t: &Trajectory) {
        for wp in t.waypoints() {
            assert!(v.validate(&wp.pose).is_ok(), "waypoint {} invalid: {:?}", wp.index, wp.pose);
        }
    }

    #[test]
    fn straight_line_respects_max_step() {
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let start = Pose::new(-100.0, -100.0, 100.0);
        let goal = Pose::new(120.0, 80.0, 250.0);
        let t = TrajectoryPlanner::new(&v, &cfg)
            .plan(&start, &Target::Pose(goal), 7.5)
            .unwrap();
        assert!(t.max_step_from(&start) <= 7.5 + 1e-9);
        assert_eq!(t.target(), Some(&goal));
        assert_all_valid(&v, &t);
    }

    #[test]
    fn obstacle_below_travel_height_needs_no_detour() {
        let v = WorkspaceValidator::new(wide_bounds(vec![low_obstacle()]));
        let cfg = PlannerConfig::default();
        let start = Pose::new(0.0, 0.0, 200.0);
        let t = TrajectoryPlanner::new(&v, &cfg)
            .plan(&start, &Target::Pose(Pose::new(300.0, 0.0, 200.0)), 10.0)
            .unwrap();
        assert_all_valid(&v, &t);
        assert!(t.waypoints().iter().all(|wp| (wp.pose.z - 200.0).abs() < 1e-9));
        assert_eq!(t.len(), 30);
    }

    #[test]
    fn low_path_through_obstacle_detours_over_it() {
        let v = WorkspaceValidator::new(wide_bounds(vec![low_obstacle()]));
        let cfg = PlannerConfig::default();
        let start = Pose::new(0.0, 0.0, 30.0);
        let goal = Pose::new(300.0, 0.0, 30.0);
        let t = TrajectoryPlanner::new(&v, &cfg)
            .plan(&start, &Target::Pose(goal), 10.0)
            .unwrap();

        assert_all_valid(&v, &t);
        assert_eq!(t.target(), Some(&goal));
        let peak = t.waypoints().iter().map(|wp| wp.pose.z).fold(f64::MIN, f64::max);
        assert!((peak - cfg.clearance_z).abs() < 1e-9);
        assert!(t.max_step_from(&start) <= 10.0 + 1e-9);
    }

    #[test]
    fn detour_descent_uses_approach_speed() {
        let v = WorkspaceValidator::new(wide_bounds(vec![low_obstacle()]));
        let cfg = PlannerConfig::default();
        let t = TrajectoryPlanner::new(&v, &cfg)
            .plan(&Pose::new(0.0, 0.0, 30.0), &Target::Pose(Pose::new(300.0, 0.0, 30.0)), 10.0)
            .unwrap();
        let last = t.waypoints().last().unwrap();
        assert_eq!(last.speed_mm_s, cfg.approach_speed_mm_s);
        assert_eq!(t.waypoints()[0].speed_mm_s, cfg.max_speed_mm_s);
    }

    #[test]
    fn wall_to_ceiling_has_no_valid_path() {
        let wall = ExclusionZone::new("wall", [140.0, -400.0, 0.0], [160.0, 400.0, 400.0]);
        let v = WorkspaceValidator::new(wide_bounds(vec![wall]));
        let cfg = PlannerConfig::default();
        let err = TrajectoryPlanner::new(&v, &cfg)
            .plan(&Pose::new(0.0, 0.0, 100.0), &Target::Pose(Pose::new(300.0, 0.0, 100.0)), 10.0)
            .unwrap_err();
        assert_eq!(err.cause(), PlanningCause::NoValidPath);
        let PlanningError::NoValidPath { violation, clearance_z, .. } = err else {
            unreachable!()
        };
        assert!(matches!(violation, ValidationError::ExcludedZone { ref zone_id, .. } if zone_id == "wall"));
        assert_eq!(clearance_z, 200.0);
    }

    #[test]
    fn out_of_bounds_target_is_a_bounds_error() {
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let err = TrajectoryPlanner::new(&v, &cfg)
            .plan(&Pose::new(0.0, 0.0, 200.0), &Target::Pose(Pose::new(0.0, 0.0, 10.0)), 10.0)
            .unwrap_err();
        assert_eq!(err.cause(), PlanningCause::Bounds);
    }

    #[test]
    fn pixel_target_without_calibration_fails() {
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let target = Target::Pixel {
            pixel: PixelCoord::new(10.0, 10.0),
            z: None,
        };
        let err = TrajectoryPlanner::new(&v, &cfg)
            .plan(&Pose::new(0.0, 0.0, 200.0), &target, 10.0)
            .unwrap_err();
        assert_eq!(err, PlanningError::Calibration(CalibrationError::NotCalibrated));
    }

    #[test]
    fn pixel_target_resolves_through_calibration_with_z_override() {
        let corr: Vec<_> = [(0.0, 0.0), (400.0, 0.0), (0.0, 400.0), (400.0, 400.0)]
            .iter()
            .map(|&(u, v)| Correspondence {
                pixel: PixelCoord::new(u, v),
                robot: Pose::new(u * 0.5 - 100.0, v * 0.5 - 100.0, 80.0),
            })
            .collect();
        let cal = fit(&corr, CalibrationModel::Affine, 1.0).unwrap();
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let planner = TrajectoryPlanner::new(&v, &cfg).with_calibration(Some(&cal));
        let current = Pose::new(0.0, 0.0, 200.0).with_orientation(Orientation::new(180.0, 0.0, 0.0));

        let target = Target::Pixel {
            pixel: PixelCoord::new(300.0, 100.0),
            z: Some(120.0),
        };
        let t = planner.plan(&current, &target, 10.0).unwrap();
        let end = t.target().unwrap();
        assert!((end.x - 50.0).abs() < 1e-6);
        assert!((end.y + 50.0).abs() < 1e-6);
        assert_eq!(end.z, 120.0);
        assert_eq!(end.orientation, current.orientation);

        let plane = planner
            .resolve(&current, &Target::Pixel { pixel: PixelCoord::new(0.0, 0.0), z: None })
            .unwrap();
        assert!((plane.z - 80.0).abs() < 1e-6);
    }

    #[test]
    fn invalid_step_is_rejected() {
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let p = TrajectoryPlanner::new(&v, &cfg);
        let target = Target::Pose(Pose::new(10.0, 0.0, 200.0));
        for step in [0.0, -1.0, f64::NAN] {
            let err = p.plan(&Pose::new(0.0, 0.0, 200.0), &target, step).unwrap_err();
            assert_eq!(err.cause(), PlanningCause::InvalidStep);
        }
    }

    #[test]
    fn step_too_fine_for_waypoint_cap_is_rejected() {
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let p = TrajectoryPlanner::new(&v, &cfg);
        let start = Pose::new(0.0, 0.0, 200.0);
        let target = Target::Pose(Pose::new(100.0, 0.0, 200.0));
        for step in [f64::MIN_POSITIVE, 1e-9, 100.0 / (MAX_WAYPOINTS as f64 + 1.0)] {
            let err = p.plan(&start, &target, step).unwrap_err();
            assert_eq!(err, PlanningError::InvalidStep { max_step_mm: step });
        }
        let t = p.plan(&start, &target, 100.0 / MAX_WAYPOINTS as f64).unwrap();
        assert_eq!(t.len(), MAX_WAYPOINTS);
    }

    #[test]
    fn detour_longer_than_waypoint_cap_is_rejected() {
        let v = WorkspaceValidator::new(wide_bounds(vec![low_obstacle()]));
        let cfg = PlannerConfig::default();
        // The direct leg fits under the cap; lift, traverse and descent do not.
        let step = 300.0 / (MAX_WAYPOINTS as f64 - 1.0);
        let err = TrajectoryPlanner::new(&v, &cfg)
            .plan(&Pose::new(0.0, 0.0, 30.0), &Target::Pose(Pose::new(300.0, 0.0, 30.0)), step)
            .unwrap_err();
        assert_eq!(err.cause(), PlanningCause::InvalidStep);
    }

    #[test]
    fn offset_and_retract_resolve_from_current_pose() {
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let p = TrajectoryPlanner::new(&v, &cfg);
        let current = Pose::new(10.0, 20.0, 100.0).with_orientation(Orientation::new(0.0, 90.0, 0.0));

        let moved = p
            .resolve(&current, &Target::Offset { dx: 5.0, dy: -5.0, dz: 50.0 })
            .unwrap();
        assert_eq!((moved.x, moved.y, moved.z), (15.0, 15.0, 150.0));
        assert_eq!(moved.orientation, current.orientation);

        let up = p.resolve(&current, &Target::Retract).unwrap();
        assert_eq!((up.x, up.y, up.z), (10.0, 20.0, cfg.clearance_z));
    }

    #[test]
    fn planning_is_deterministic() {
        let v = WorkspaceValidator::new(wide_bounds(vec![low_obstacle()]));
        let cfg = PlannerConfig::default();
        let p = TrajectoryPlanner::new(&v, &cfg);
        let start = Pose::new(0.0, 0.0, 30.0);
        let target = Target::Pose(Pose::new(300.0, 20.0, 30.0));
        let a = p.plan(&start, &target, 10.0).unwrap();
        let b = p.plan(&start, &target, 10.0).unwrap();
        assert_eq!(a.waypoints(), b.waypoints());
    }

    #[test]
    fn zero_length_move_is_empty() {
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let here = Pose::new(10.0, 10.0, 200.0);
        let t = TrajectoryPlanner::new(&v, &cfg)
            .plan(&here, &Target::Pose(here), 10.0)
            .unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn trapezoidal_duration_of_a_long_leg() {
        // 100 mm at 100 mm/s with 500 mm/s²: 0.2 s ramps + 0.8 s cruise.
        let v = WorkspaceValidator::new(WorkspaceBounds::default());
        let cfg = PlannerConfig::default();
        let t = TrajectoryPlanner::new(&v, &cfg)
            .plan(&Pose::new(0.0, 0.0, 200.0), &Target::Pose(Pose::new(100.0, 0.0, 200.0)), 10.0)
            .unwrap();
        let secs = t.estimated_duration().as_secs_f64();
        assert!((secs - 1.2).abs() < 1e-6, "got {secs}");
    }

    #[test]
    fn short_leg_uses_triangular_profile() {
        // 10 mm with 500 mm/s² never reaches 100 mm/s: two 5 mm ramps.
        let total = profile_time(10.0, 10.0, 100.0, 500.0);
        assert!((total - 2.0 * (2.0 * 5.0 / 500.0_f64).sqrt()).abs() < 1e-9);
        assert!(profile_time(5.0, 10.0, 100.0, 500.0) < total);
    }
}
