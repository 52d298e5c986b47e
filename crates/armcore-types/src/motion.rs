//! Planned motion: [`Waypoint`] and [`Trajectory`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pose::Pose;

/// One pose in a planned motion, with its motion hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Position of this waypoint within its trajectory.
    pub index: usize,
    pub pose: Pose,
    /// Commanded cruise speed towards this waypoint, in mm/s.
    pub speed_mm_s: f64,
    /// Expected travel time from the previous waypoint.
    pub duration_hint: Duration,
}

/// An ordered sequence of waypoints produced for a single motion request.
///
/// Indices are assigned by [`Trajectory::new`] and are strictly increasing.
/// A trajectory is moved into the safety supervisor for execution and never
/// shared between two requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: Uuid,
    waypoints: Vec<Waypoint>,
}

impl Trajectory {
    /// Build a trajectory, renumbering waypoints `0..n` in the given order.
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        let waypoints = waypoints
            .into_iter()
            .enumerate()
            .map(|(index, wp)| Waypoint { index, ..wp })
            .collect();
        Self {
            id: Uuid::new_v4(),
            waypoints,
        }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Final pose of the trajectory, if any.
    pub fn target(&self) -> Option<&Pose> {
        self.waypoints.last().map(|wp| &wp.pose)
    }

    /// Sum of the per-waypoint duration hints.
    pub fn estimated_duration(&self) -> Duration {
        self.waypoints.iter().map(|wp| wp.duration_hint).sum()
    }

    /// Largest distance between consecutive waypoints, measured from `start`.
    pub fn max_step_from(&self, start: &Pose) -> f64 {
        let mut prev = *start;
        let mut max = 0.0_f64;
        for wp in &self.waypoints {
            max = max.max(prev.distance_to(&wp.pose));
            prev = wp.pose;
        }
        max
    }
}
