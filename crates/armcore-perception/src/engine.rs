//! Calibration Engine.
//!
//! Owns the single active [`CalibrationTransform`].  Readers take a cheap
//! `Arc` snapshot; a refit builds a complete new transform, persists it and
//! only then swaps it in, so no reader ever observes a half-updated map.

use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use armcore_types::{CalibrationError, PixelCoord, Pose};

use crate::calibration::{self, CalibrationModel, CalibrationTransform, Correspondence};
use crate::record;

/// Engine settings, usually the `[calibration]` section of the controller
/// config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub model: CalibrationModel,
    /// Maximum accepted mean residual.
    #[serde(default = "default_tolerance_mm")]
    pub tolerance_mm: f64,
    /// Where the active transform is persisted.  `None` keeps it in memory.
    #[serde(default)]
    pub record_path: Option<PathBuf>,
}

fn default_tolerance_mm() -> f64 {
    5.0
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            model: CalibrationModel::default(),
            tolerance_mm: default_tolerance_mm(),
            record_path: None,
        }
    }
}

pub struct CalibrationEngine {
    config: CalibrationConfig,
    current: RwLock<Option<Arc<CalibrationTransform>>>,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Arc<CalibrationTransform>>> {
        self.current.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Arc<CalibrationTransform>>> {
        self.current.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Snapshot of the active transform.
    pub fn current(&self) -> Option<Arc<CalibrationTransform>> {
        self.read().clone()
    }

    pub fn is_calibrated(&self) -> bool {
        self.read().is_some()
    }

    /// Fit a new transform and make it active.
    ///
    /// On any failure (fit or persistence) the previously active transform
    /// stays in place.
    pub fn fit(
        &self,
        correspondences: &[Correspondence],
    ) -> Result<Arc<CalibrationTransform>, CalibrationError> {
        let transform = calibration::fit(correspondences, self.config.model, self.config.tolerance_mm)
            .inspect_err(|e| warn!(error = %e, points = correspondences.len(), "calibration fit rejected"))?;

        if let Some(path) = &self.config.record_path {
            record::save(path, &transform)?;
        }

        let transform = Arc::new(transform);
        *self.write() = Some(Arc::clone(&transform));
        info!(
            model = ?transform.model,
            points = transform.correspondences.len(),
            residual_mm = transform.residual_mm,
            "calibration installed"
        );
        Ok(transform)
    }

    /// Load the persisted record, if any.
    ///
    /// Returns `Ok(true)` when a transform was installed, `Ok(false)` when no
    /// record path is configured or the file does not exist.  A record whose
    /// residual exceeds the configured tolerance is refused.
    pub fn load(&self) -> Result<bool, CalibrationError> {
        let Some(path) = &self.config.record_path else {
            return Ok(false);
        };
        let Some(transform) = record::load(path)? else {
            return Ok(false);
        };
        let residual = transform.validate(self.config.tolerance_mm)?;
        info!(path = %path.display(), residual_mm = residual, "calibration record loaded");
        *self.write() = Some(Arc::new(transform));
        Ok(true)
    }

    pub fn to_robot(&self, pixel: PixelCoord) -> Result<Pose, CalibrationError> {
        self.current()
            .ok_or(CalibrationError::NotCalibrated)?
            .to_robot(pixel)
    }

    pub fn to_pixel(&self, pose: &Pose) -> Option<PixelCoord> {
        self.current()?.to_pixel(pose)
    }
}
