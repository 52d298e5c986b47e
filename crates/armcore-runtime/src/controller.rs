//! [`RobotController`] – the single entry point for the agent layer.
//!
//! Wires the calibration engine, live workspace bounds, trajectory planner
//! and safety supervisor around one [`HardwareAdapter`].  Every motion entry
//! point follows the same path:
//!
//! ```text
//! begin_motion ──► current pose ──► plan (bounds + calibration snapshots)
//!                                      │
//!                         error ◄──────┴──────► dispatch (supervised)
//! ```
//!
//! The controller must be [`initialize`](RobotController::initialize)d
//! before it accepts motion.  [`shutdown`](RobotController::shutdown) stops
//! the arm and closes the hardware link; dropping an initialized controller
//! without calling it still stops the arm and disconnects on a best-effort
//! basis.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use armcore_hal::{DetectionSource, HardwareAdapter};
use armcore_kernel::{
    CalibrationLease, LiveBounds, MonitorHandle, MotionPermit, MotionReport, SafetyLog,
    SafetySupervisor, WorkspaceBounds,
};
use armcore_perception::{CalibrationEngine, CalibrationTransform, Correspondence};
use armcore_types::{
    ArmError, Detection, Orientation, PixelCoord, Pose, RobotState, SafetyEvent,
};

use crate::config::ControllerConfig;
use crate::planner::{Target, TrajectoryPlanner};

pub struct RobotController {
    config: ControllerConfig,
    hardware: Arc<dyn HardwareAdapter>,
    calibration: CalibrationEngine,
    supervisor: Arc<SafetySupervisor>,
    monitor: Mutex<Option<MonitorHandle>>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl RobotController {
    /// Build a controller around `hardware`.  No I/O happens until
    /// [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// [`ArmError::Config`] when `config` fails validation, or
    /// [`ArmError::Persistence`] when the safety log mirror cannot be opened.
    pub fn new(config: ControllerConfig, hardware: Arc<dyn HardwareAdapter>) -> Result<Self, ArmError> {
        config.validate()?;

        let log = match &config.safety_log_path {
            Some(path) => SafetyLog::with_mirror(path)?,
            None => SafetyLog::new(),
        };
        let supervisor = SafetySupervisor::new(
            Arc::clone(&hardware),
            Arc::new(LiveBounds::new(config.workspace.clone())),
            Arc::new(log),
            config.supervisor.clone(),
        );

        Ok(Self {
            calibration: CalibrationEngine::new(config.calibration.engine.clone()),
            config,
            hardware,
            supervisor,
            monitor: Mutex::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The active camera→robot transform.  Fitting a new one goes through
    /// [`calibrate`](Self::calibrate) or
    /// [`auto_calibrate`](Self::auto_calibrate).
    pub fn calibration(&self) -> Option<Arc<CalibrationTransform>> {
        self.calibration.current()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated()
    }

    /// Robot pose under `pixel` on the calibrated working plane.
    pub fn pixel_to_robot(&self, pixel: PixelCoord) -> Result<Pose, ArmError> {
        Ok(self.calibration.to_robot(pixel)?)
    }

    /// Where `pose` appears in the image, if calibrated.
    pub fn robot_to_pixel(&self, pose: &Pose) -> Option<PixelCoord> {
        self.calibration.to_pixel(pose)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<(), ArmError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ArmError::NotInitialized)
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Connect the hardware, restore the persisted calibration (if any) and
    /// start the hardware monitor.  Calling it again is a no-op.
    ///
    /// A calibration record that cannot be read or exceeds the tolerance is
    /// logged and ignored; pixel targets are then refused until the arm is
    /// recalibrated.
    #[instrument(skip(self), fields(adapter = %self.hardware.id()))]
    pub async fn initialize(&self) -> Result<RobotState, ArmError> {
        if self.is_initialized() {
            return Ok(self.get_state());
        }

        self.hardware.connect().await?;

        match self.calibration.load() {
            Ok(true) => {}
            Ok(false) => info!("no calibration record; pixel targets unavailable until calibrated"),
            Err(e) => warn!(error = %e, "calibration record ignored"),
        }

        let handle = self.supervisor.spawn_monitor();
        *self.monitor.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

        self.initialized.store(true, Ordering::SeqCst);
        self.supervisor.mark_initialized();
        let state = self.get_state();
        info!(%state, calibrated = self.calibration.is_calibrated(), "controller initialized");
        Ok(state)
    }

    /// Stop the arm, end monitoring and close the hardware link.
    ///
    /// Each step runs even if an earlier one failed; the first error is
    /// returned.
    #[instrument(skip(self), fields(adapter = %self.hardware.id()))]
    pub async fn shutdown(self) -> Result<(), ArmError> {
        self.closed.store(true, Ordering::SeqCst);
        if !self.is_initialized() {
            return Ok(());
        }

        self.supervisor.cancel_motion();
        let stopped = self.hardware.stop().await;
        if let Err(e) = &stopped {
            warn!(error = %e, "stop during shutdown failed");
        }

        drop(self.monitor.lock().unwrap_or_else(|p| p.into_inner()).take());
        self.supervisor.mark_shutdown();
        self.initialized.store(false, Ordering::SeqCst);

        let disconnected = self.hardware.disconnect().await;
        info!("controller shut down");
        stopped.and(disconnected)
    }

    // ── Motion ───────────────────────────────────────────────────────────

    /// Move to an explicit robot-frame pose.  Without `orientation` the
    /// current tool orientation is kept.
    #[instrument(skip(self))]
    pub async fn move_to_position(
        &self,
        x: f64,
        y: f64,
        z: f64,
        orientation: Option<Orientation>,
    ) -> Result<MotionReport, ArmError> {
        let pose = Pose {
            orientation,
            ..Pose::new(x, y, z)
        };
        self.move_to(Target::Pose(pose)).await
    }

    /// Move to the robot pose under a camera pixel.  `z` overrides the
    /// height of the calibrated working plane.
    #[instrument(skip(self))]
    pub async fn move_to_pixel(&self, pixel: PixelCoord, z: Option<f64>) -> Result<MotionReport, ArmError> {
        self.move_to(Target::Pixel { pixel, z }).await
    }

    /// Move to a detection reported by the vision layer.
    ///
    /// Detections with a confidence outside `[0, 1]` or below
    /// `calibration.min_confidence` are refused before anything is planned.
    #[instrument(skip(self, detection), fields(label = %detection.label, confidence = detection.confidence))]
    pub async fn move_to_detection(
        &self,
        detection: &Detection,
        z: Option<f64>,
    ) -> Result<MotionReport, ArmError> {
        self.ensure_initialized()?;
        self.check_confidence(detection)?;
        self.move_to(Target::Pixel {
            pixel: detection.pixel(),
            z,
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn move_to_home(&self) -> Result<MotionReport, ArmError> {
        self.move_to(Target::Pose(self.config.home)).await
    }

    /// Move by an offset from the current pose, keeping the orientation.
    #[instrument(skip(self))]
    pub async fn move_relative(&self, dx: f64, dy: f64, dz: f64) -> Result<MotionReport, ArmError> {
        self.move_to(Target::Offset { dx, dy, dz }).await
    }

    /// Rise vertically to the planner's clearance height (capped by the
    /// workspace ceiling) without moving in x or y.  Already above it, the
    /// arm stays put.
    #[instrument(skip(self))]
    pub async fn move_to_safe_position(&self) -> Result<MotionReport, ArmError> {
        self.move_to(Target::Retract).await
    }

    async fn move_to(&self, target: Target) -> Result<MotionReport, ArmError> {
        self.ensure_initialized()?;
        let permit = self.supervisor.begin_motion()?;
        self.plan_and_dispatch(permit, target).await
    }

    /// Plan from the arm's current pose against fresh snapshots of the
    /// bounds and calibration, then hand the trajectory to the supervisor.
    async fn plan_and_dispatch(&self, permit: MotionPermit, target: Target) -> Result<MotionReport, ArmError> {
        let current = match self.hardware.get_current_pose().await {
            Ok(pose) => pose,
            Err(e) => {
                permit.fail(format!("current pose unavailable: {e}"));
                return Err(e);
            }
        };

        let planned = {
            let validator = self.supervisor.bounds().snapshot();
            let calibration = self.calibration.current();
            TrajectoryPlanner::new(&validator, &self.config.planner)
                .with_calibration(calibration.as_deref())
                .plan(&current, &target, self.config.planner.max_step_mm)
        };

        match planned {
            Ok(trajectory) => {
                debug!(
                    trajectory_id = %trajectory.id,
                    waypoints = trajectory.len(),
                    "trajectory planned"
                );
                permit.dispatch(trajectory).await
            }
            Err(e) => {
                warn!(error = %e, cause = ?e.cause(), "planning failed");
                permit.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    fn check_confidence(&self, detection: &Detection) -> Result<(), ArmError> {
        let min_confidence = self.config.calibration.min_confidence;
        if detection.has_valid_confidence() && detection.confidence >= min_confidence {
            Ok(())
        } else {
            Err(ArmError::LowConfidence {
                label: detection.label.clone(),
                confidence: detection.confidence,
                min_confidence,
            })
        }
    }

    // ── Safety ───────────────────────────────────────────────────────────

    pub fn get_state(&self) -> RobotState {
        self.supervisor.state()
    }

    /// Pose reported by the hardware.
    pub async fn current_pose(&self) -> Result<Pose, ArmError> {
        self.hardware.get_current_pose().await
    }

    /// Watch state changes as they happen.
    pub fn subscribe_state(&self) -> watch::Receiver<RobotState> {
        self.supervisor.subscribe_state()
    }

    /// Halt the arm and latch ESTOP.  Accepted in every state, initialized
    /// or not.
    #[instrument(skip(self))]
    pub async fn emergency_stop(&self) -> Result<(), ArmError> {
        self.supervisor.emergency_stop().await
    }

    /// Ask the in-flight motion to stop at its next waypoint boundary.
    pub fn cancel_motion(&self) -> bool {
        self.supervisor.cancel_motion()
    }

    /// Release ESTOP and drive the arm to the home pose.  The robot only
    /// returns to its resting state once the rehoming motion completes.
    #[instrument(skip(self))]
    pub async fn clear_estop_and_rehome(&self) -> Result<MotionReport, ArmError> {
        self.ensure_initialized()?;
        let permit = self.supervisor.begin_rehome().await?;
        self.plan_and_dispatch(permit, Target::Pose(self.config.home)).await
    }

    #[instrument(skip(self))]
    pub async fn reset_fault(&self) -> Result<RobotState, ArmError> {
        self.ensure_initialized()?;
        self.supervisor.reset_fault().await
    }

    /// Replace the active workspace bounds.  Only updates that tighten the
    /// workspace are accepted.
    pub fn update_safety_zones(&self, bounds: WorkspaceBounds) -> Result<(), ArmError> {
        self.supervisor.bounds().update(bounds)
    }

    pub fn workspace_bounds(&self) -> WorkspaceBounds {
        self.supervisor.bounds().snapshot().bounds().clone()
    }

    pub fn safety_events(&self) -> Vec<SafetyEvent> {
        self.supervisor.log().events()
    }

    pub fn subscribe_safety_events(&self) -> broadcast::Receiver<SafetyEvent> {
        self.supervisor.log().subscribe()
    }

    // ── Calibration ──────────────────────────────────────────────────────

    /// Fit and install a transform from externally gathered
    /// correspondences.  Refused while a motion is in progress.
    #[instrument(skip(self, correspondences), fields(points = correspondences.len()))]
    pub fn calibrate(&self, correspondences: &[Correspondence]) -> Result<Arc<CalibrationTransform>, ArmError> {
        let _lease = self.supervisor.begin_calibration()?;
        Ok(self.calibration.fit(correspondences)?)
    }

    /// Drive the arm through `calibration.auto_poses`, locate the marker at
    /// each one and fit a transform from the collected correspondences.
    ///
    /// Poses where the marker is missing or below `min_confidence` are
    /// skipped; the fit then decides whether enough points remain.
    #[instrument(skip(self, camera))]
    pub async fn auto_calibrate(
        &self,
        camera: &dyn DetectionSource,
    ) -> Result<Arc<CalibrationTransform>, ArmError> {
        self.ensure_initialized()?;
        let lease = self.supervisor.begin_calibration()?;
        let correspondences = self.collect_correspondences(&lease, camera).await?;
        let transform = self.calibration.fit(&correspondences)?;
        drop(lease);
        Ok(transform)
    }

    async fn collect_correspondences(
        &self,
        lease: &CalibrationLease,
        camera: &dyn DetectionSource,
    ) -> Result<Vec<Correspondence>, ArmError> {
        let settings = &self.config.calibration;
        let validator = self.supervisor.bounds().snapshot();
        let mut correspondences = Vec::with_capacity(settings.auto_poses.len());

        for (i, pose) in settings.auto_poses.iter().enumerate() {
            validator.validate(pose)?;
            self.plan_and_dispatch(lease.begin_motion()?, Target::Pose(*pose))
                .await?;
            let reached = self.hardware.get_current_pose().await?;

            match camera.detect(&settings.marker_label).await? {
                Some(detection) if self.check_confidence(&detection).is_ok() => {
                    debug!(pose = i, pixel = ?detection.pixel(), "marker located");
                    correspondences.push(Correspondence {
                        pixel: detection.pixel(),
                        robot: reached,
                    });
                }
                Some(detection) => {
                    warn!(pose = i, confidence = detection.confidence, "marker detection too weak; skipped");
                }
                None => warn!(pose = i, "marker not visible; skipped"),
            }
        }
        Ok(correspondences)
    }
}

impl std::fmt::Debug for RobotController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotController")
            .field("supervisor", &self.supervisor)
            .field("initialized", &self.is_initialized())
            .field("calibrated", &self.calibration.is_calibrated())
            .finish()
    }
}

impl Drop for RobotController {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) || !self.is_initialized() {
            return;
        }
        self.supervisor.cancel_motion();
        let hardware = Arc::clone(&self.hardware);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = hardware.stop().await {
                        warn!(error = %e, "stop on drop failed");
                    }
                    if let Err(e) = hardware.disconnect().await {
                        warn!(error = %e, "disconnect on drop failed");
                    }
                });
            }
            Err(_) => warn!("controller dropped outside a runtime; hardware link left open"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use armcore_hal::{RetryPolicy, SimArm, SimArmConfig, SimMarkerCamera};
    use armcore_kernel::ExclusionZone;
    use armcore_types::{CalibrationError, PlanningCause, PlanningError, SafetyCause};

    /// Robot (x, y) → pixel: u = 2x + 320, v = -2y + 240.
    const CAMERA: [[f64; 3]; 2] = [[2.0, 0.0, 320.0], [0.0, -2.0, 240.0]];

    fn test_config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.supervisor.ack_timeout_ms = 500;
        config.supervisor.monitor_interval_ms = 20;
        config.supervisor.status_retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            attempt_timeout_ms: 20,
        };
        config
    }

    fn sim(step_ms: u64) -> Arc<SimArm> {
        SimArm::with_config(
            "sim",
            SimArmConfig {
                step_delay: Duration::from_millis(step_ms),
                ..SimArmConfig::default()
            },
        )
    }

    async fn ready(config: ControllerConfig, step_ms: u64) -> (Arc<SimArm>, RobotController) {
        let arm = sim(step_ms);
        let controller = RobotController::new(config, arm.clone()).unwrap();
        controller.initialize().await.unwrap();
        (arm, controller)
    }

    /// Exact correspondences for `CAMERA`, shifted by `offset_mm` in x.
    fn camera_points(offset_mm: f64) -> Vec<Correspondence> {
        [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)]
            .into_iter()
            .map(|(x, y)| Correspondence {
                pixel: PixelCoord::new(2.0 * x + 320.0, -2.0 * y + 240.0),
                robot: Pose::new(x + offset_mm, y, 150.0),
            })
            .collect()
    }

    async fn wait_for_state(controller: &RobotController, want: RobotState) {
        let mut rx = controller.subscribe_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .unwrap_or_else(|_| panic!("state {want} not reached"))
            .unwrap();
    }

    #[tokio::test]
    async fn motion_refused_before_initialize() {
        let arm = sim(0);
        let controller = RobotController::new(test_config(), arm.clone()).unwrap();
        let err = controller.move_to_position(10.0, 0.0, 200.0, None).await.unwrap_err();
        assert_eq!(err, ArmError::NotInitialized);
        assert_eq!(arm.command_count(), 0);
    }

    #[tokio::test]
    async fn invalid_config_rejected_at_construction() {
        let mut config = test_config();
        config.planner.max_step_mm = 0.0;
        let err = RobotController::new(config, sim(0)).unwrap_err();
        assert!(matches!(err, ArmError::Config(_)));
    }

    #[tokio::test]
    async fn initialize_connects_and_records_event() {
        let (arm, controller) = ready(test_config(), 0).await;
        assert!(arm.is_connected());
        assert_eq!(controller.get_state(), RobotState::Simulation);
        let events = controller.safety_events();
        assert!(matches!(events[0].cause, SafetyCause::Initialized));
        // Second call is a no-op.
        controller.initialize().await.unwrap();
        assert_eq!(controller.safety_events().len(), events.len());
    }

    #[tokio::test]
    async fn move_to_position_reaches_target() {
        let (arm, controller) = ready(test_config(), 0).await;
        let report = controller.move_to_position(100.0, 0.0, 200.0, None).await.unwrap();

        assert_eq!(report.waypoints, 10);
        assert_eq!(report.final_state, RobotState::Simulation);
        assert_eq!(arm.current_pose(), Pose::new(100.0, 0.0, 200.0));
        assert_eq!(controller.get_state(), RobotState::Simulation);
    }

    #[tokio::test]
    async fn out_of_bounds_target_is_refused_without_motion() {
        let (arm, controller) = ready(test_config(), 0).await;
        let err = controller.move_to_position(400.0, 0.0, 200.0, None).await.unwrap_err();

        let ArmError::Planning(planning) = err else {
            panic!("expected planning error, got {err:?}");
        };
        assert_eq!(planning.cause(), PlanningCause::Bounds);
        assert_eq!(arm.command_count(), 0);
        assert_eq!(controller.get_state(), RobotState::Simulation);
        assert!(
            controller
                .safety_events()
                .iter()
                .any(|e| matches!(e.cause, SafetyCause::PlanningFailed { .. }))
        );
    }

    #[tokio::test]
    async fn obstacle_is_cleared_with_lifted_detour() {
        let mut config = test_config();
        config.workspace.exclusion_zones =
            vec![ExclusionZone::new("fixture", [40.0, -20.0, 50.0], [60.0, 20.0, 180.0])];
        let (arm, controller) = ready(config, 0).await;
        controller.move_to_position(0.0, 0.0, 100.0, None).await.unwrap();

        controller.move_to_position(100.0, 0.0, 100.0, None).await.unwrap();
        assert_eq!(arm.current_pose(), Pose::new(100.0, 0.0, 100.0));
        assert!(arm.commands().iter().any(|p| p.z >= 200.0));
    }

    #[tokio::test]
    async fn move_to_home_uses_configured_home() {
        let mut config = test_config();
        config.home = Pose::new(50.0, 50.0, 250.0);
        let (arm, controller) = ready(config, 0).await;
        controller.move_to_home().await.unwrap();
        assert_eq!(arm.current_pose(), Pose::new(50.0, 50.0, 250.0));
    }

    #[tokio::test]
    async fn pixel_target_needs_calibration() {
        let (_arm, controller) = ready(test_config(), 0).await;
        let err = controller
            .move_to_pixel(PixelCoord::new(320.0, 240.0), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ArmError::Planning(PlanningError::Calibration(CalibrationError::NotCalibrated))
        );
        assert_eq!(controller.get_state(), RobotState::Simulation);
    }

    #[tokio::test]
    async fn auto_calibration_enables_pixel_and_detection_targets() {
        let (arm, controller) = ready(test_config(), 0).await;
        let camera = SimMarkerCamera::new(arm.clone(), "marker", CAMERA);

        let transform = controller.auto_calibrate(&camera).await.unwrap();
        assert_eq!(transform.correspondences.len(), 9);
        assert!(transform.residual_mm < 1e-6);
        assert!(controller.config().calibration.engine.record_path.is_none());

        controller
            .move_to_pixel(PixelCoord::new(420.0, 140.0), None)
            .await
            .unwrap();
        let p = arm.current_pose();
        assert!((p.x - 50.0).abs() < 1e-6 && (p.y - 50.0).abs() < 1e-6 && (p.z - 150.0).abs() < 1e-6);

        let detection = Detection {
            label: "cup".into(),
            pixel_x: 220,
            pixel_y: 340,
            confidence: 0.9,
        };
        controller.move_to_detection(&detection, Some(180.0)).await.unwrap();
        let p = arm.current_pose();
        assert!((p.x + 50.0).abs() < 1e-6 && (p.y + 50.0).abs() < 1e-6 && (p.z - 180.0).abs() < 1e-6);

        let events = controller.safety_events();
        assert!(events.iter().any(|e| matches!(e.cause, SafetyCause::CalibrationStarted)));
        assert!(events.iter().any(|e| matches!(e.cause, SafetyCause::CalibrationFinished)));
    }

    #[tokio::test]
    async fn weak_marker_detections_leave_too_few_points() {
        let (arm, controller) = ready(test_config(), 0).await;
        let camera = SimMarkerCamera::new(arm.clone(), "marker", CAMERA).with_confidence(0.2);

        let err = controller.auto_calibrate(&camera).await.unwrap_err();
        assert!(matches!(
            err,
            ArmError::Calibration(CalibrationError::InsufficientPoints { .. })
        ));
        assert!(!controller.is_calibrated());
        assert!(!controller.supervisor.is_calibrating());
    }

    #[tokio::test]
    async fn low_confidence_detection_is_refused_before_planning() {
        let (arm, controller) = ready(test_config(), 0).await;
        let weak = Detection {
            label: "cup".into(),
            pixel_x: 320,
            pixel_y: 240,
            confidence: 0.1,
        };
        let err = controller.move_to_detection(&weak, None).await.unwrap_err();
        assert!(matches!(err, ArmError::LowConfidence { .. }));

        let invalid = Detection {
            confidence: f32::NAN,
            ..weak
        };
        let err = controller.move_to_detection(&invalid, None).await.unwrap_err();
        assert!(matches!(err, ArmError::LowConfidence { .. }));
        assert_eq!(arm.command_count(), 0);
    }

    #[tokio::test]
    async fn calibration_record_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.calibration.engine.record_path = Some(dir.path().join("calibration.json"));

        {
            let (arm, controller) = ready(config.clone(), 0).await;
            let camera = SimMarkerCamera::new(arm.clone(), "marker", CAMERA);
            controller.auto_calibrate(&camera).await.unwrap();
            controller.shutdown().await.unwrap();
        }

        let (_arm, controller) = ready(config, 0).await;
        assert!(controller.is_calibrated());
        let p = controller.pixel_to_robot(PixelCoord::new(320.0, 240.0)).unwrap();
        assert!(p.x.abs() < 1e-6 && p.y.abs() < 1e-6);
    }

    #[tokio::test]
    async fn second_request_while_moving_is_busy() {
        let (arm, controller) = ready(test_config(), 20).await;
        let controller = Arc::new(controller);

        let mover = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.move_to_position(100.0, 0.0, 200.0, None).await })
        };
        wait_for_state(&controller, RobotState::Moving).await;

        let err = controller.move_to_position(-100.0, 0.0, 200.0, None).await.unwrap_err();
        assert!(matches!(err, ArmError::Busy { .. }));
        let camera = SimMarkerCamera::new(arm.clone(), "marker", CAMERA);
        let err = controller.auto_calibrate(&camera).await.unwrap_err();
        assert!(matches!(err, ArmError::CalibrationBusy { .. }));

        mover.await.unwrap().unwrap();
        assert_eq!(arm.current_pose(), Pose::new(100.0, 0.0, 200.0));
    }

    #[tokio::test]
    async fn manual_fit_is_refused_while_moving() {
        let (_arm, controller) = ready(test_config(), 20).await;
        let first = controller.calibrate(&camera_points(0.0)).unwrap();
        let controller = Arc::new(controller);

        let mover = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.move_to_position(100.0, 0.0, 200.0, None).await })
        };
        wait_for_state(&controller, RobotState::Moving).await;

        let err = controller.calibrate(&camera_points(30.0)).unwrap_err();
        assert!(matches!(err, ArmError::CalibrationBusy { .. }));
        let active = controller.calibration().unwrap();
        assert!(Arc::ptr_eq(&active, &first));
        let px = controller.robot_to_pixel(&Pose::new(0.0, 0.0, 150.0)).unwrap();
        assert!((px.x - 320.0).abs() < 1e-6 && (px.y - 240.0).abs() < 1e-6);

        mover.await.unwrap().unwrap();
        controller.calibrate(&camera_points(30.0)).unwrap();
        assert!(!Arc::ptr_eq(&controller.calibration().unwrap(), &first));
    }

    #[tokio::test]
    async fn move_relative_offsets_current_pose() {
        let (arm, controller) = ready(test_config(), 0).await;
        controller.move_relative(50.0, -20.0, 30.0).await.unwrap();
        assert_eq!(arm.current_pose(), Pose::new(50.0, -20.0, 230.0));

        let err = controller.move_relative(0.0, 0.0, 500.0).await.unwrap_err();
        let ArmError::Planning(planning) = err else {
            panic!("expected planning error, got {err:?}");
        };
        assert_eq!(planning.cause(), PlanningCause::Bounds);
        assert_eq!(arm.current_pose(), Pose::new(50.0, -20.0, 230.0));
    }

    #[tokio::test]
    async fn safe_position_retracts_vertically() {
        let (arm, controller) = ready(test_config(), 0).await;
        controller.move_to_position(100.0, 50.0, 80.0, None).await.unwrap();
        let before = arm.command_count();

        controller.move_to_safe_position().await.unwrap();
        assert_eq!(arm.current_pose(), Pose::new(100.0, 50.0, 200.0));
        assert!(arm.commands()[before..].iter().all(|p| p.x == 100.0 && p.y == 50.0));

        controller.move_to_position(100.0, 50.0, 300.0, None).await.unwrap();
        let report = controller.move_to_safe_position().await.unwrap();
        assert_eq!(report.waypoints, 0);
        assert_eq!(arm.current_pose(), Pose::new(100.0, 50.0, 300.0));
    }

    #[tokio::test]
    async fn cancel_stops_motion_early() {
        let (arm, controller) = ready(test_config(), 20).await;
        let controller = Arc::new(controller);

        let mover = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.move_to_position(200.0, 0.0, 200.0, None).await })
        };
        wait_for_state(&controller, RobotState::Moving).await;
        assert!(controller.cancel_motion());

        let err = mover.await.unwrap().unwrap_err();
        assert!(matches!(err, ArmError::Cancelled { .. }));
        assert!(arm.command_count() < 20);
        assert_eq!(controller.get_state(), RobotState::Simulation);
    }

    #[tokio::test]
    async fn estop_then_clear_and_rehome() {
        let (arm, controller) = ready(test_config(), 0).await;
        controller.move_to_position(100.0, 100.0, 250.0, None).await.unwrap();

        controller.emergency_stop().await.unwrap();
        assert_eq!(controller.get_state(), RobotState::Estop);
        let err = controller.move_to_home().await.unwrap_err();
        assert!(matches!(err, ArmError::EstopEngaged { .. }));

        let report = controller.clear_estop_and_rehome().await.unwrap();
        assert_eq!(report.final_state, RobotState::Simulation);
        assert_eq!(arm.current_pose(), Pose::new(0.0, 0.0, 200.0));
        assert_eq!(controller.get_state(), RobotState::Simulation);
    }

    #[tokio::test]
    async fn hardware_estop_is_picked_up_by_monitor() {
        let (arm, controller) = ready(test_config(), 0).await;
        arm.press_estop_button();
        wait_for_state(&controller, RobotState::Estop).await;

        let err = controller.clear_estop_and_rehome().await.unwrap_err();
        assert!(matches!(err, ArmError::Hardware { .. }));
        assert_eq!(controller.get_state(), RobotState::Estop);

        arm.release_estop_button();
        controller.clear_estop_and_rehome().await.unwrap();
        assert_eq!(controller.get_state(), RobotState::Simulation);
    }

    #[tokio::test]
    async fn ack_timeout_faults_until_reset() {
        let (arm, controller) = ready(test_config(), 0).await;
        arm.stall_from_command(0);

        let err = controller.move_to_position(20.0, 0.0, 200.0, None).await.unwrap_err();
        assert!(matches!(err, ArmError::HardwareTimeout { .. }));
        assert_eq!(controller.get_state(), RobotState::Fault);

        assert_eq!(controller.reset_fault().await.unwrap(), RobotState::Simulation);
    }

    #[tokio::test]
    async fn safety_zones_only_tighten() {
        let (_arm, controller) = ready(test_config(), 0).await;

        let mut tighter = controller.workspace_bounds();
        tighter.table_z = Some(100.0);
        controller.update_safety_zones(tighter.clone()).unwrap();
        let err = controller.move_to_position(0.0, 0.0, 80.0, None).await.unwrap_err();
        assert!(matches!(err, ArmError::Planning(_)));

        let mut wider = tighter;
        wider.x.max = 400.0;
        assert!(matches!(
            controller.update_safety_zones(wider),
            Err(ArmError::Config(_))
        ));
    }

    #[tokio::test]
    async fn manual_calibration_refused_when_too_few_points() {
        let (_arm, controller) = ready(test_config(), 0).await;
        let points = [
            Correspondence {
                pixel: PixelCoord::new(0.0, 0.0),
                robot: Pose::new(0.0, 0.0, 150.0),
            },
            Correspondence {
                pixel: PixelCoord::new(100.0, 0.0),
                robot: Pose::new(50.0, 0.0, 150.0),
            },
        ];
        let err = controller.calibrate(&points).unwrap_err();
        assert!(matches!(
            err,
            ArmError::Calibration(CalibrationError::InsufficientPoints { .. })
        ));
        assert!(!controller.is_calibrated());
        assert!(controller.calibration().is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_and_disconnects() {
        let (arm, controller) = ready(test_config(), 0).await;
        controller.shutdown().await.unwrap();

        assert!(!arm.is_connected());
        assert!(arm.stop_count() >= 1);
    }

    #[tokio::test]
    async fn dropping_initialized_controller_releases_hardware() {
        let (arm, controller) = ready(test_config(), 0).await;
        drop(controller);

        tokio::time::timeout(Duration::from_secs(1), async {
            while arm.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(arm.stop_count() >= 1);
    }
}
