//! [`SafetySupervisor`] – authoritative robot state, dispatch gate and
//! hardware monitor.
//!
//! The supervisor is the single writer of [`RobotState`].  The value lives in
//! a [`tokio::sync::watch`] channel and every change goes through a
//! compare-and-transition under the channel's lock, so the dispatch loop and
//! the monitor task can never both win a conflicting transition.  Each
//! successful transition is appended to the [`SafetyLog`].
//!
//! ```text
//! IDLE      --begin_motion-->        PLANNING
//! PLANNING  --dispatch-->            MOVING
//! PLANNING  --permit dropped-->      IDLE
//! MOVING    --trajectory complete--> IDLE
//! MOVING    --estop signal-->        ESTOP
//! MOVING    --ack timeout-->         FAULT
//! ANY       --emergency_stop-->      ESTOP
//! ESTOP     --begin_rehome+dispatch--> IDLE
//! FAULT     --reset_fault-->         IDLE
//! ```
//!
//! With a simulated adapter the resting state is `SIMULATION` instead of
//! `IDLE`.
//!
//! Motion admission is expressed as an RAII [`MotionPermit`]: holding one
//! means this caller owns the PLANNING/MOVING slot.  Dropping it early
//! returns the supervisor to its resting state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use armcore_hal::{HardwareAdapter, RetryPolicy, poll_status};
use armcore_types::{
    ArmError, HardwareStatus, Pose, RobotState, SafetyCause, SafetyEvent, Trajectory,
};

use crate::safety_log::SafetyLog;
use crate::workspace::LiveBounds;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum wait for the arrival acknowledgement of one waypoint.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Hardware status sampling period.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    #[serde(default)]
    pub status_retry: RetryPolicy,
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_monitor_interval_ms() -> u64 {
    50
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
            status_retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a completed motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionReport {
    pub trajectory_id: Uuid,
    pub waypoints: usize,
    pub final_pose: Option<Pose>,
    pub final_state: RobotState,
    pub elapsed: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// SafetySupervisor
// ────────────────────────────────────────────────────────────────────────────

pub struct SafetySupervisor {
    hardware: Arc<dyn HardwareAdapter>,
    bounds: Arc<LiveBounds>,
    log: Arc<SafetyLog>,
    config: SupervisorConfig,
    state: watch::Sender<RobotState>,
    calibrating: AtomicBool,
    cancel_requested: AtomicBool,
}

impl SafetySupervisor {
    /// Create a supervisor resting in `IDLE` (or `SIMULATION` for a simulated
    /// adapter).
    pub fn new(
        hardware: Arc<dyn HardwareAdapter>,
        bounds: Arc<LiveBounds>,
        log: Arc<SafetyLog>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let rest = Self::rest_state_for(hardware.as_ref());
        let (state, _) = watch::channel(rest);
        Arc::new(Self {
            hardware,
            bounds,
            log,
            config,
            state,
            calibrating: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
        })
    }

    fn rest_state_for(hardware: &dyn HardwareAdapter) -> RobotState {
        if hardware.is_simulated() {
            RobotState::Simulation
        } else {
            RobotState::Idle
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn state(&self) -> RobotState {
        *self.state.borrow()
    }

    /// Watch every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<RobotState> {
        self.state.subscribe()
    }

    pub fn rest_state(&self) -> RobotState {
        Self::rest_state_for(self.hardware.as_ref())
    }

    pub fn hardware(&self) -> &Arc<dyn HardwareAdapter> {
        &self.hardware
    }

    pub fn bounds(&self) -> &Arc<LiveBounds> {
        &self.bounds
    }

    pub fn log(&self) -> &Arc<SafetyLog> {
        &self.log
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::SeqCst)
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Atomically move to `to` when the current state satisfies `allowed`.
    ///
    /// Returns the previous state on success and the current (unchanged)
    /// state on refusal.  A transition to the state already held succeeds
    /// without logging.  The event is recorded under the state lock and
    /// mirrored to disk after it is released.
    fn transition_if(
        &self,
        allowed: impl FnOnce(RobotState) -> bool,
        to: RobotState,
        cause: SafetyCause,
    ) -> Result<RobotState, RobotState> {
        let mut outcome = Err(to);
        self.state.send_if_modified(|current| {
            let from = *current;
            if !allowed(from) {
                outcome = Err(from);
                return false;
            }
            outcome = Ok(from);
            if from == to {
                return false;
            }
            *current = to;
            let event = SafetyEvent::new(from, to, cause);
            info!(%from, %to, cause = ?event.cause, "robot state transition");
            self.log.record(event);
            true
        });
        self.log.flush();
        outcome
    }

    fn force(&self, to: RobotState, cause: SafetyCause) -> RobotState {
        match self.transition_if(|_| true, to, cause) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Append an event that does not change the state.
    fn note(&self, cause: SafetyCause) {
        let s = self.state();
        self.log.append(SafetyEvent::new(s, s, cause));
    }

    async fn halt_hardware(&self, reason: &str) {
        if let Err(e) = self.hardware.stop().await {
            error!(error = %e, reason, "hardware stop command failed");
        } else {
            debug!(reason, "hardware stop issued");
        }
    }

    /// Record that the controller came up.
    pub fn mark_initialized(&self) {
        self.note(SafetyCause::Initialized);
    }

    /// Record an orderly shutdown.
    pub fn mark_shutdown(&self) {
        self.note(SafetyCause::Shutdown);
    }

    // ── Admission ────────────────────────────────────────────────────────

    /// Claim the single motion slot: rest → PLANNING.
    ///
    /// # Errors
    ///
    /// - [`ArmError::Busy`] while another motion is planning or moving, or a
    ///   calibration is running.
    /// - [`ArmError::EstopEngaged`] while in ESTOP or FAULT.
    pub fn begin_motion(self: &Arc<Self>) -> Result<MotionPermit, ArmError> {
        self.admit(false)
    }

    fn admit(self: &Arc<Self>, under_lease: bool) -> Result<MotionPermit, ArmError> {
        let calibrating = &self.calibrating;
        let admitted = self.transition_if(
            |s| s.is_at_rest() && (under_lease || !calibrating.load(Ordering::SeqCst)),
            RobotState::Planning,
            SafetyCause::OperatorRequest,
        );
        match admitted {
            Ok(_) => {
                self.cancel_requested.store(false, Ordering::SeqCst);
                Ok(MotionPermit::new(Arc::clone(self), self.rest_state()))
            }
            Err(state) if state.is_latched() => {
                warn!(%state, "motion refused: estop engaged");
                Err(ArmError::EstopEngaged { state })
            }
            Err(state) => {
                warn!(%state, calibrating = self.is_calibrating(), "motion refused: busy");
                Err(ArmError::Busy { state })
            }
        }
    }

    /// Claim exclusive use of the arm for calibration.
    ///
    /// Motion requests are refused with [`ArmError::Busy`] while the returned
    /// lease is alive; the lease itself can still drive the arm.
    pub fn begin_calibration(self: &Arc<Self>) -> Result<CalibrationLease, ArmError> {
        let mut acquired = Err(self.state());
        self.state.send_if_modified(|current| {
            acquired = if current.is_at_rest()
                && self
                    .calibrating
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                Ok(())
            } else {
                Err(*current)
            };
            false
        });
        match acquired {
            Ok(()) => {
                self.note(SafetyCause::CalibrationStarted);
                info!("calibration lease acquired");
                Ok(CalibrationLease {
                    supervisor: Arc::clone(self),
                })
            }
            Err(state) => {
                warn!(%state, "calibration refused");
                Err(ArmError::CalibrationBusy { state })
            }
        }
    }

    /// Ask the in-flight motion to stop at its next waypoint boundary.
    ///
    /// Returns `false` when nothing is planning or moving.
    pub fn cancel_motion(&self) -> bool {
        if self.state().is_busy() {
            self.cancel_requested.store(true, Ordering::SeqCst);
            info!("motion cancellation requested");
            true
        } else {
            false
        }
    }

    // ── Operator actions ─────────────────────────────────────────────────

    /// Force ESTOP from any state and latch the hardware.
    pub async fn emergency_stop(&self) -> Result<(), ArmError> {
        let prev = self.force(RobotState::Estop, SafetyCause::ExplicitEstop);
        warn!(from = %prev, "emergency stop commanded");
        self.hardware.emergency_stop().await
    }

    /// Leave ESTOP: release the hardware latch, confirm the status is clear
    /// and claim the motion slot for the rehoming move.
    ///
    /// The returned permit falls back to ESTOP if it is dropped or the
    /// rehoming motion does not complete.  From a resting state this is an
    /// ordinary [`begin_motion`](Self::begin_motion).
    pub async fn begin_rehome(self: &Arc<Self>) -> Result<MotionPermit, ArmError> {
        match self.state() {
            RobotState::Estop => {}
            s if s.is_at_rest() => return self.begin_motion(),
            s if s.is_busy() => return Err(ArmError::Busy { state: s }),
            s => return Err(ArmError::EstopEngaged { state: s }),
        }

        self.hardware.clear_estop().await?;
        let status = poll_status(self.hardware.as_ref(), &self.config.status_retry).await?;
        if status.demands_stop() {
            let _ = self.hardware.emergency_stop().await;
            return Err(ArmError::hardware(
                self.hardware.id(),
                format!("estop condition still present (fault code {:?})", status.fault_code),
            ));
        }

        match self.transition_if(
            |s| s == RobotState::Estop,
            RobotState::Planning,
            SafetyCause::OperatorClear,
        ) {
            Ok(_) => {
                self.cancel_requested.store(false, Ordering::SeqCst);
                Ok(MotionPermit::new(Arc::clone(self), RobotState::Estop))
            }
            Err(state) => Err(ArmError::EstopEngaged { state }),
        }
    }

    /// Leave FAULT once the hardware reports a clean status.
    pub async fn reset_fault(&self) -> Result<RobotState, ArmError> {
        match self.state() {
            RobotState::Fault => {}
            s if s.is_at_rest() => return Ok(s),
            s if s.is_busy() => return Err(ArmError::Busy { state: s }),
            s => return Err(ArmError::EstopEngaged { state: s }),
        }

        let status = poll_status(self.hardware.as_ref(), &self.config.status_retry).await?;
        if !status.ok || status.demands_stop() {
            return Err(ArmError::hardware(
                self.hardware.id(),
                format!("hardware still reports a fault: {status:?}"),
            ));
        }

        let rest = self.rest_state();
        self.transition_if(|s| s == RobotState::Fault, rest, SafetyCause::OperatorReset)
            .map(|_| rest)
            .map_err(|state| ArmError::EstopEngaged { state })
    }

    // ── Monitoring ───────────────────────────────────────────────────────

    /// Sample the hardware once and react to what it reports.
    ///
    /// * estop or fault code → ESTOP (and latch the hardware),
    /// * `ok == false` → FAULT,
    /// * status unreachable after retries → FAULT.
    ///
    /// Latched states are never cleared here.
    pub async fn check_hardware(&self) -> Result<HardwareStatus, ArmError> {
        match poll_status(self.hardware.as_ref(), &self.config.status_retry).await {
            Ok(status) if status.demands_stop() => {
                let cause = SafetyCause::ExternalEstop {
                    fault_code: status.fault_code,
                };
                if let Ok(prev) = self.transition_if(|s| s != RobotState::Estop, RobotState::Estop, cause) {
                    warn!(from = %prev, fault_code = ?status.fault_code, "hardware raised estop");
                    if let Err(e) = self.hardware.emergency_stop().await {
                        error!(error = %e, "failed to latch hardware estop");
                    }
                }
                Ok(status)
            }
            Ok(status) if !status.ok => {
                let cause = SafetyCause::HardwareError {
                    detail: "hardware status reports not ok".to_string(),
                };
                if self
                    .transition_if(|s| !s.is_latched(), RobotState::Fault, cause)
                    .is_ok()
                {
                    error!(?status, "hardware unhealthy");
                    self.halt_hardware("hardware unhealthy").await;
                }
                Ok(status)
            }
            Ok(status) => Ok(status),
            Err(e) => {
                let cause = SafetyCause::StatusLinkLost {
                    detail: e.to_string(),
                };
                if self
                    .transition_if(|s| !s.is_latched(), RobotState::Fault, cause)
                    .is_ok()
                {
                    error!(error = %e, "hardware status link lost");
                    self.halt_hardware("status link lost").await;
                }
                Err(e)
            }
        }
    }

    /// Start the periodic status monitor.  It stops when the handle is
    /// dropped or the supervisor goes away.
    pub fn spawn_monitor(self: &Arc<Self>) -> MonitorHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.monitor_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(sup) = weak.upgrade() else { break };
                let _ = sup.check_hardware().await;
            }
            debug!("hardware monitor exited");
        });
        info!(interval_ms = period.as_millis() as u64, "hardware monitor started");
        MonitorHandle { task }
    }
}

impl std::fmt::Debug for SafetySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetySupervisor")
            .field("hardware", &self.hardware.id())
            .field("state", &self.state())
            .field("calibrating", &self.is_calibrating())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MotionPermit
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Planning,
    Moving { completed: usize, total: usize },
    Settled,
}

/// Exclusive right to plan and execute one trajectory.
#[must_use = "dropping the permit abandons the motion request"]
pub struct MotionPermit {
    supervisor: Arc<SafetySupervisor>,
    /// State to return to when the request is abandoned or refused.
    fallback: RobotState,
    stage: Stage,
}

impl MotionPermit {
    fn new(supervisor: Arc<SafetySupervisor>, fallback: RobotState) -> Self {
        Self {
            supervisor,
            fallback,
            stage: Stage::Planning,
        }
    }

    /// Give up before dispatch, recording why.
    pub fn fail(mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "motion planning failed");
        let _ = self.supervisor.transition_if(
            |s| s == RobotState::Planning,
            self.fallback,
            SafetyCause::PlanningFailed { reason },
        );
        self.stage = Stage::Settled;
    }

    /// Execute `trajectory` waypoint by waypoint.
    ///
    /// Before every send the live state, the cancellation flag and the live
    /// workspace bounds are re-read.  Each acknowledgement wait is bounded by
    /// `ack_timeout_ms` and abandoned the moment the state leaves MOVING.
    pub async fn dispatch(mut self, trajectory: Trajectory) -> Result<MotionReport, ArmError> {
        let sup = Arc::clone(&self.supervisor);
        let started = Instant::now();
        let total = trajectory.len();

        if let Err(state) = sup.transition_if(
            |s| s == RobotState::Planning,
            RobotState::Moving,
            SafetyCause::PlanReady {
                trajectory_id: trajectory.id,
                waypoints: total,
            },
        ) {
            self.stage = Stage::Settled;
            return Err(ArmError::EstopEngaged { state });
        }
        self.stage = Stage::Moving { completed: 0, total };

        let ack_timeout = Duration::from_millis(sup.config.ack_timeout_ms);
        let mut state_rx = sup.subscribe_state();

        for wp in trajectory.waypoints() {
            let i = wp.index;

            let state = sup.state();
            if state != RobotState::Moving {
                self.stage = Stage::Settled;
                sup.halt_hardware("state left MOVING").await;
                return Err(ArmError::EstopEngaged { state });
            }

            if sup.cancel_requested.swap(false, Ordering::SeqCst) {
                self.stage = Stage::Settled;
                sup.halt_hardware("motion cancelled").await;
                let cause = SafetyCause::Cancelled {
                    completed: i,
                    remaining: total - i,
                };
                return match sup.transition_if(|s| s == RobotState::Moving, self.fallback, cause) {
                    Ok(_) => Err(ArmError::Cancelled { completed: i, total }),
                    Err(state) => Err(ArmError::EstopEngaged { state }),
                };
            }

            if let Err(violation) = sup.bounds.snapshot().validate(&wp.pose) {
                self.stage = Stage::Settled;
                warn!(waypoint = i, %violation, "waypoint rejected by live bounds");
                sup.halt_hardware("waypoint out of live bounds").await;
                let cause = SafetyCause::BoundsViolation {
                    waypoint: i,
                    axis: violation.axis(),
                    detail: violation.to_string(),
                };
                return match sup.transition_if(|s| s == RobotState::Moving, self.fallback, cause) {
                    Ok(_) => Err(ArmError::Validation(violation)),
                    Err(state) => Err(ArmError::EstopEngaged { state }),
                };
            }

            debug!(waypoint = i, total, x = wp.pose.x, y = wp.pose.y, z = wp.pose.z, "sending waypoint");
            let ack = tokio::time::timeout(ack_timeout, sup.hardware.send_pose_command(&wp.pose));
            let step = tokio::select! {
                biased;
                changed = state_rx.wait_for(|s| *s != RobotState::Moving) => {
                    Step::Interrupted(changed.map(|s| *s).unwrap_or(RobotState::Fault))
                }
                res = ack => match res {
                    Ok(Ok(())) => Step::Arrived,
                    Ok(Err(e)) => Step::Failed(e),
                    Err(_) => Step::TimedOut,
                },
            };

            match step {
                Step::Arrived => {
                    self.stage = Stage::Moving { completed: i + 1, total };
                }
                Step::Interrupted(state) => {
                    self.stage = Stage::Settled;
                    warn!(waypoint = i, %state, "motion interrupted");
                    sup.halt_hardware("motion interrupted").await;
                    return Err(ArmError::EstopEngaged { state });
                }
                Step::TimedOut => {
                    self.stage = Stage::Settled;
                    let timeout_ms = sup.config.ack_timeout_ms;
                    let cause = SafetyCause::HardwareTimeout { waypoint: i, timeout_ms };
                    let moved = sup.transition_if(|s| s == RobotState::Moving, RobotState::Fault, cause);
                    error!(waypoint = i, timeout_ms, "arrival acknowledgement timed out");
                    sup.halt_hardware("acknowledgement timeout").await;
                    return match moved {
                        Ok(_) => Err(ArmError::HardwareTimeout {
                            operation: format!("waypoint {i} arrival acknowledgement"),
                            timeout_ms,
                        }),
                        Err(state) => Err(ArmError::EstopEngaged { state }),
                    };
                }
                Step::Failed(e) => {
                    self.stage = Stage::Settled;
                    // A refused command usually means the hardware estop fired
                    // before the monitor's next sample.
                    let _ = sup.check_hardware().await;
                    let state = sup.state();
                    if state != RobotState::Moving {
                        warn!(waypoint = i, %state, error = %e, "pose command refused after estop");
                        sup.halt_hardware("motion interrupted").await;
                        return Err(ArmError::EstopEngaged { state });
                    }
                    let cause = SafetyCause::HardwareError { detail: e.to_string() };
                    let moved = sup.transition_if(|s| s == RobotState::Moving, RobotState::Fault, cause);
                    error!(waypoint = i, error = %e, "pose command failed");
                    sup.halt_hardware("pose command failed").await;
                    return match moved {
                        Ok(_) => Err(e),
                        Err(state) => Err(ArmError::EstopEngaged { state }),
                    };
                }
            }
        }

        self.stage = Stage::Settled;
        let rest = sup.rest_state();
        match sup.transition_if(
            |s| s == RobotState::Moving,
            rest,
            SafetyCause::MotionComplete {
                trajectory_id: trajectory.id,
            },
        ) {
            Ok(_) => {
                let report = MotionReport {
                    trajectory_id: trajectory.id,
                    waypoints: total,
                    final_pose: trajectory.target().copied(),
                    final_state: rest,
                    elapsed: started.elapsed(),
                };
                info!(
                    trajectory = %report.trajectory_id,
                    waypoints = total,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "motion complete"
                );
                Ok(report)
            }
            Err(state) => {
                sup.halt_hardware("state left MOVING at completion").await;
                Err(ArmError::EstopEngaged { state })
            }
        }
    }
}

enum Step {
    Arrived,
    Interrupted(RobotState),
    TimedOut,
    Failed(ArmError),
}

impl Drop for MotionPermit {
    fn drop(&mut self) {
        match self.stage {
            Stage::Settled => {}
            Stage::Planning => {
                let _ = self.supervisor.transition_if(
                    |s| s == RobotState::Planning,
                    self.fallback,
                    SafetyCause::PlanningFailed {
                        reason: "motion request abandoned before dispatch".to_string(),
                    },
                );
            }
            Stage::Moving { completed, total } => {
                let cause = SafetyCause::Cancelled {
                    completed,
                    remaining: total - completed,
                };
                let _ = self
                    .supervisor
                    .transition_if(|s| s == RobotState::Moving, self.fallback, cause);
                warn!(completed, total, "dispatch abandoned mid-motion; stopping hardware");
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let sup = Arc::clone(&self.supervisor);
                        handle.spawn(async move { sup.halt_hardware("dispatch abandoned").await });
                    }
                    Err(_) => error!("no runtime available to stop hardware after abandoned dispatch"),
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CalibrationLease
// ────────────────────────────────────────────────────────────────────────────

/// Exclusive calibration session.  Released on drop.
pub struct CalibrationLease {
    supervisor: Arc<SafetySupervisor>,
}

impl CalibrationLease {
    /// Claim the motion slot on behalf of the calibration routine.
    pub fn begin_motion(&self) -> Result<MotionPermit, ArmError> {
        self.supervisor.admit(true)
    }
}

impl Drop for CalibrationLease {
    fn drop(&mut self) {
        self.supervisor.calibrating.store(false, Ordering::SeqCst);
        self.supervisor.note(SafetyCause::CalibrationFinished);
        info!("calibration lease released");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MonitorHandle
// ────────────────────────────────────────────────────────────────────────────

/// Owns the monitor task; aborts it on drop.
#[derive(Debug)]
pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
