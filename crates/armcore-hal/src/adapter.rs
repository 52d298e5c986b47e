//! Capability traits for physical arms and vision sources.
//!
//! The core never holds a concrete driver type: every arm is reached through
//! [`HardwareAdapter`], every detector through [`DetectionSource`], so a
//! driver can be swapped (or replaced by a simulation) without touching the
//! planning or supervision logic.

use async_trait::async_trait;
use armcore_types::{ArmError, Detection, HardwareStatus, Pose};

/// Capability set implemented once per physical arm.
///
/// # Contract
///
/// * [`send_pose_command`](HardwareAdapter::send_pose_command) resolves only
///   when the arm acknowledges arrival at the commanded pose.  The caller
///   bounds the wait; adapters must not retry motion commands on their own.
/// * [`get_status`](HardwareAdapter::get_status) must be cheap: it is polled
///   at a fixed interval by the safety monitor, concurrently with motion.
/// * [`stop`](HardwareAdapter::stop) halts the current motion;
///   [`emergency_stop`](HardwareAdapter::emergency_stop) additionally latches
///   the arm until [`clear_estop`](HardwareAdapter::clear_estop) is called.
#[async_trait]
pub trait HardwareAdapter: Send + Sync {
    /// Stable identifier, e.g. `"mycobot_280"` or `"sim_arm"`.
    fn id(&self) -> &str;

    /// `true` for adapters that synthesise status and acknowledgements.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Establish the hardware link.
    async fn connect(&self) -> Result<(), ArmError>;

    /// Close the hardware link.
    async fn disconnect(&self) -> Result<(), ArmError>;

    /// Command a Cartesian pose and wait for the arrival acknowledgement.
    async fn send_pose_command(&self, pose: &Pose) -> Result<(), ArmError>;

    async fn get_current_pose(&self) -> Result<Pose, ArmError>;

    async fn get_status(&self) -> Result<HardwareStatus, ArmError>;

    /// Halt the current motion without latching.
    async fn stop(&self) -> Result<(), ArmError>;

    /// Halt all motion and latch the arm.
    async fn emergency_stop(&self) -> Result<(), ArmError>;

    /// Release a software estop latch.  Fails while a physical estop is
    /// still engaged.
    async fn clear_estop(&self) -> Result<(), ArmError> {
        Ok(())
    }
}

/// A source of labelled pixel detections (camera + detector).
#[async_trait]
pub trait DetectionSource: Send + Sync {
    /// Return the best current detection for `label`, or `None` when the
    /// object is not visible.
    async fn detect(&self, label: &str) -> Result<Option<Detection>, ArmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Minimal in-process adapter used only for tests.
    struct MockArm {
        pose: Mutex<Pose>,
    }

    #[async_trait]
    impl HardwareAdapter for MockArm {
        fn id(&self) -> &str {
            "mock"
        }
        async fn connect(&self) -> Result<(), ArmError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), ArmError> {
            Ok(())
        }
        async fn send_pose_command(&self, pose: &Pose) -> Result<(), ArmError> {
            *self.pose.lock().unwrap() = *pose;
            Ok(())
        }
        async fn get_current_pose(&self) -> Result<Pose, ArmError> {
            Ok(*self.pose.lock().unwrap())
        }
        async fn get_status(&self) -> Result<HardwareStatus, ArmError> {
            Ok(HardwareStatus::healthy())
        }
        async fn stop(&self) -> Result<(), ArmError> {
            Ok(())
        }
        async fn emergency_stop(&self) -> Result<(), ArmError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_object_defaults() {
        let arm: Box<dyn HardwareAdapter> = Box::new(MockArm {
            pose: Mutex::new(Pose::new(0.0, 0.0, 0.0)),
        });
        assert!(!arm.is_simulated());
        assert!(arm.clear_estop().await.is_ok());
        arm.send_pose_command(&Pose::new(1.0, 2.0, 3.0)).await.unwrap();
        assert_eq!(arm.get_current_pose().await.unwrap(), Pose::new(1.0, 2.0, 3.0));
    }
}
