//! Workspace Validator – the geometric safety interlock.
//!
//! [`WorkspaceValidator::validate`] evaluates a fixed, ordered set of rules
//! against a pose.  The first violation is returned and the pose must not be
//! commanded:
//!
//! 1. every coordinate is finite,
//! 2. every axis lies inside its inclusive `[min, max]` range,
//! 3. `z` is not below the table plane (when one is configured),
//! 4. the position is not inside any excluded cuboid.
//!
//! Validation is a pure function of the bounds and the pose.  Live updates
//! are handled by [`LiveBounds`], which swaps in a whole new validator.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use armcore_types::{ArmError, Axis, Pose, ValidationError};

// ────────────────────────────────────────────────────────────────────────────
// Configuration types
// ────────────────────────────────────────────────────────────────────────────

/// Inclusive range on one axis, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    /// `true` when `self` lies entirely inside `outer`.
    pub fn within(&self, outer: &AxisRange) -> bool {
        self.min >= outer.min && self.max <= outer.max
    }
}

/// Axis-aligned cuboid the arm must never enter (e.g. the base mount).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionZone {
    pub id: String,
    /// `[x, y, z]` lower corner.
    pub min: [f64; 3],
    /// `[x, y, z]` upper corner.
    pub max: [f64; 3],
}

impl ExclusionZone {
    pub fn new(id: impl Into<String>, min: [f64; 3], max: [f64; 3]) -> Self {
        Self {
            id: id.into(),
            min,
            max,
        }
    }

    /// Containment is inclusive: touching a face counts as inside.
    pub fn contains(&self, pose: &Pose) -> bool {
        let p = [pose.x, pose.y, pose.z];
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// `true` when `other` lies entirely inside `self`.
    pub fn covers(&self, other: &ExclusionZone) -> bool {
        (0..3).all(|i| self.min[i] <= other.min[i] && self.max[i] >= other.max[i])
    }

    pub fn is_well_formed(&self) -> bool {
        (0..3).all(|i| self.min[i].is_finite() && self.max[i].is_finite() && self.min[i] <= self.max[i])
    }
}

/// The configured safe volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    #[serde(default = "default_xy")]
    pub x: AxisRange,
    #[serde(default = "default_xy")]
    pub y: AxisRange,
    #[serde(default = "default_z")]
    pub z: AxisRange,
    /// Height of the work surface; poses below it are rejected.
    #[serde(default)]
    pub table_z: Option<f64>,
    #[serde(default)]
    pub exclusion_zones: Vec<ExclusionZone>,
}

fn default_xy() -> AxisRange {
    AxisRange::new(-250.0, 250.0)
}

fn default_z() -> AxisRange {
    AxisRange::new(50.0, 350.0)
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            x: default_xy(),
            y: default_xy(),
            z: default_z(),
            table_z: None,
            exclusion_zones: Vec::new(),
        }
    }
}

impl WorkspaceBounds {
    pub fn range(&self, axis: Axis) -> &AxisRange {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// Structural sanity: ordered finite ranges and well-formed zones.
    pub fn check(&self) -> Result<(), String> {
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            let r = self.range(axis);
            if !r.min.is_finite() || !r.max.is_finite() || r.min > r.max {
                return Err(format!("workspace {axis} range [{}, {}] is invalid", r.min, r.max));
            }
        }
        if let Some(t) = self.table_z.filter(|t| !t.is_finite()) {
            return Err(format!("table_z {t} is not finite"));
        }
        if let Some(zone) = self.exclusion_zones.iter().find(|z| !z.is_well_formed()) {
            return Err(format!("exclusion zone '{}' has an inverted or non-finite corner", zone.id));
        }
        Ok(())
    }

    /// `true` when every pose accepted by `self` is also accepted by
    /// `current`.
    pub fn tightens(&self, current: &WorkspaceBounds) -> bool {
        let ranges = [Axis::X, Axis::Y, Axis::Z]
            .iter()
            .all(|&a| self.range(a).within(current.range(a)));
        let table = match (current.table_z, self.table_z) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(cur), Some(new)) => new >= cur,
        };
        let zones = current
            .exclusion_zones
            .iter()
            .all(|old| self.exclusion_zones.iter().any(|new| new.covers(old)));
        ranges && table && zones
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rules
// ────────────────────────────────────────────────────────────────────────────

/// A single geometric invariant that a pose must satisfy.
trait Rule: Send + Sync {
    fn check(&self, pose: &Pose) -> Result<(), ValidationError>;
}

struct FiniteRule;

impl Rule for FiniteRule {
    fn check(&self, pose: &Pose) -> Result<(), ValidationError> {
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            if !pose.coord(axis).is_finite() {
                return Err(ValidationError::NonFinite { axis });
            }
        }
        Ok(())
    }
}

struct AxisRangeRule {
    axis: Axis,
    range: AxisRange,
}

impl Rule for AxisRangeRule {
    fn check(&self, pose: &Pose) -> Result<(), ValidationError> {
        let value = pose.coord(self.axis);
        if !self.range.contains(value) {
            return Err(ValidationError::OutOfBounds {
                axis: self.axis,
                value,
                min: self.range.min,
                max: self.range.max,
            });
        }
        Ok(())
    }
}

struct TablePlaneRule {
    table_z: f64,
}

impl Rule for TablePlaneRule {
    fn check(&self, pose: &Pose) -> Result<(), ValidationError> {
        if pose.z < self.table_z {
            return Err(ValidationError::BelowTablePlane {
                z: pose.z,
                table_z: self.table_z,
            });
        }
        Ok(())
    }
}

struct ExclusionZoneRule {
    zone: ExclusionZone,
}

impl Rule for ExclusionZoneRule {
    fn check(&self, pose: &Pose) -> Result<(), ValidationError> {
        if self.zone.contains(pose) {
            return Err(ValidationError::ExcludedZone {
                zone_id: self.zone.id.clone(),
                x: pose.x,
                y: pose.y,
                z: pose.z,
            });
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// WorkspaceValidator
// ────────────────────────────────────────────────────────────────────────────

/// Stateless predicate over poses, built once from [`WorkspaceBounds`].
///
/// # Example
///
/// ```
/// use armcore_kernel::workspace::{WorkspaceBounds, WorkspaceValidator};
/// use armcore_types::{Pose, ValidationError};
///
/// let v = WorkspaceValidator::new(WorkspaceBounds::default());
/// assert!(v.validate(&Pose::new(0.0, 0.0, 200.0)).is_ok());
/// assert!(matches!(
///     v.validate(&Pose::new(300.0, 0.0, 200.0)),
///     Err(ValidationError::OutOfBounds { .. })
/// ));
/// ```
pub struct WorkspaceValidator {
    bounds: WorkspaceBounds,
    rules: Vec<Box<dyn Rule>>,
}

impl WorkspaceValidator {
    pub fn new(bounds: WorkspaceBounds) -> Self {
        let mut rules: Vec<Box<dyn Rule>> = vec![Box::new(FiniteRule)];
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            rules.push(Box::new(AxisRangeRule {
                axis,
                range: *bounds.range(axis),
            }));
        }
        if let Some(table_z) = bounds.table_z {
            rules.push(Box::new(TablePlaneRule { table_z }));
        }
        for zone in &bounds.exclusion_zones {
            rules.push(Box::new(ExclusionZoneRule { zone: zone.clone() }));
        }
        Self { bounds, rules }
    }

    pub fn bounds(&self) -> &WorkspaceBounds {
        &self.bounds
    }

    /// Returns the first violated rule, or `Ok(())` when the pose is safe.
    pub fn validate(&self, pose: &Pose) -> Result<(), ValidationError> {
        for rule in &self.rules {
            rule.check(pose)?;
        }
        Ok(())
    }

    pub fn accepts(&self, pose: &Pose) -> bool {
        self.validate(pose).is_ok()
    }
}

impl std::fmt::Debug for WorkspaceValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceValidator")
            .field("bounds", &self.bounds)
            .field("rules", &self.rules.len())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LiveBounds
// ────────────────────────────────────────────────────────────────────────────

/// Hot-reloadable handle to the current validator.
///
/// Readers take an `Arc` snapshot; [`LiveBounds::update`] swaps the whole
/// validator.  Only tightening updates are accepted while running.
#[derive(Debug)]
pub struct LiveBounds {
    current: RwLock<Arc<WorkspaceValidator>>,
}

impl LiveBounds {
    pub fn new(bounds: WorkspaceBounds) -> Self {
        Self {
            current: RwLock::new(Arc::new(WorkspaceValidator::new(bounds))),
        }
    }

    pub fn snapshot(&self) -> Arc<WorkspaceValidator> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the bounds with a tighter set.
    ///
    /// Returns [`ArmError::Config`] when `bounds` is malformed or would
    /// admit any pose the current bounds reject.
    pub fn update(&self, bounds: WorkspaceBounds) -> Result<(), ArmError> {
        bounds.check().map_err(ArmError::Config)?;

        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        if !bounds.tightens(guard.bounds()) {
            warn!("safety zone update refused: it widens the workspace");
            return Err(ArmError::Config(
                "safety zone update may only tighten the workspace".to_string(),
            ));
        }
        info!(
            zones = bounds.exclusion_zones.len(),
            table_z = ?bounds.table_z,
            "safety zones updated"
        );
        *guard = Arc::new(WorkspaceValidator::new(bounds));
        Ok(())
    }
}
