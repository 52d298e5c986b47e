//! Hand-eye calibration fitting.
//!
//! Maps camera pixels onto the robot's working plane.  Two models are
//! supported:
//!
//! - [`CalibrationModel::Affine`] – least-squares affine map, ≥ 3
//!   non-collinear correspondences.
//! - [`CalibrationModel::Homography`] – normalized DLT homography for
//!   cameras with perspective distortion, ≥ 4 correspondences.
//!
//! In both cases the robot `z` is fitted as an affine function of the pixel,
//! which reduces to the constant plane height for a level work surface.
//!
//! # Example
//!
//! ```
//! use armcore_perception::calibration::{fit, CalibrationModel, Correspondence};
//! use armcore_types::{PixelCoord, Pose};
//!
//! let pts = [
//!     (PixelCoord::new(100.0, 100.0), Pose::new(-50.0, -50.0, 90.0)),
//!     (PixelCoord::new(500.0, 100.0), Pose::new(150.0, -50.0, 90.0)),
//!     (PixelCoord::new(100.0, 400.0), Pose::new(-50.0, 100.0, 90.0)),
//! ];
//! let corr: Vec<_> = pts.iter().map(|&(pixel, robot)| Correspondence { pixel, robot }).collect();
//!
//! let t = fit(&corr, CalibrationModel::Affine, 1.0).unwrap();
//! let p = t.to_robot(PixelCoord::new(300.0, 250.0)).unwrap();
//! assert!((p.x - 50.0).abs() < 1e-6 && (p.y - 25.0).abs() < 1e-6);
//! ```

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use armcore_types::{CalibrationError, PixelCoord, Pose};

/// Below this, a homogeneous weight is treated as a point at infinity.
const EPS: f64 = 1e-9;

/// Relative scatter determinant below which a point set counts as collinear.
/// The ratio `det / trace²` is at most 0.25 (isotropic spread).
const COLLINEARITY_EPS: f64 = 1e-9;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Which pixel→plane mapping to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationModel {
    #[default]
    Affine,
    Homography,
}

impl CalibrationModel {
    /// Minimum number of correspondences for a well-posed fit.
    pub fn min_points(self) -> usize {
        match self {
            CalibrationModel::Affine => 3,
            CalibrationModel::Homography => 4,
        }
    }
}

/// A pixel observed while the arm was at a known pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub pixel: PixelCoord,
    pub robot: Pose,
}

/// A fitted pixel→robot transform.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTransform {
    pub model: CalibrationModel,
    /// Maps homogeneous `(u, v, 1)` to homogeneous planar `(x, y, w)`.
    pub planar: Matrix3<f64>,
    /// `z = plane · (u, v, 1)`.
    pub plane: Vector3<f64>,
    /// Mean 3-D reprojection error over `correspondences`, in millimetres.
    pub residual_mm: f64,
    pub correspondences: Vec<Correspondence>,
    pub fitted_at: DateTime<Utc>,
}

impl CalibrationTransform {
    /// Map a pixel onto the robot working plane.
    pub fn to_robot(&self, pixel: PixelCoord) -> Result<Pose, CalibrationError> {
        let h = Vector3::new(pixel.x, pixel.y, 1.0);
        let p = self.planar * h;
        if !p.z.is_finite() || p.z.abs() <= EPS {
            return Err(CalibrationError::DegenerateConfiguration {
                reason: format!("pixel ({}, {}) maps to the line at infinity", pixel.x, pixel.y),
            });
        }
        let pose = Pose::new(p.x / p.z, p.y / p.z, self.plane.dot(&h));
        if !pose.is_finite() {
            return Err(CalibrationError::DegenerateConfiguration {
                reason: format!("pixel ({}, {}) maps to a non-finite pose", pixel.x, pixel.y),
            });
        }
        Ok(pose)
    }

    /// Best-effort inverse: project a robot pose back into the image.
    ///
    /// Uses only `x` and `y`; the pose is assumed to lie on the working
    /// plane.  Returns `None` when the planar map is not invertible or the
    /// pose projects to infinity.
    pub fn to_pixel(&self, pose: &Pose) -> Option<PixelCoord> {
        let inv = self.planar.try_inverse()?;
        let q = inv * Vector3::new(pose.x, pose.y, 1.0);
        if !q.z.is_finite() || q.z.abs() <= EPS {
            return None;
        }
        Some(PixelCoord::new(q.x / q.z, q.y / q.z))
    }

    /// Recompute the mean reprojection error over the stored
    /// correspondences and check it against `tolerance_mm`.
    pub fn validate(&self, tolerance_mm: f64) -> Result<f64, CalibrationError> {
        let residual = mean_residual(self, &self.correspondences)?;
        if residual > tolerance_mm {
            return Err(CalibrationError::AccuracyExceeded {
                residual_mm: residual,
                tolerance_mm,
            });
        }
        Ok(residual)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fitting
// ────────────────────────────────────────────────────────────────────────────

/// Fit a transform of the given `model` to `correspondences`.
///
/// # Errors
///
/// - [`CalibrationError::InsufficientPoints`] – fewer than
///   [`CalibrationModel::min_points`] correspondences.
/// - [`CalibrationError::DegenerateConfiguration`] – non-finite input,
///   coincident or collinear pixel or robot points, or a singular solution.
/// - [`CalibrationError::AccuracyExceeded`] – mean residual above
///   `tolerance_mm`.
pub fn fit(
    correspondences: &[Correspondence],
    model: CalibrationModel,
    tolerance_mm: f64,
) -> Result<CalibrationTransform, CalibrationError> {
    let required = model.min_points();
    if correspondences.len() < required {
        return Err(CalibrationError::InsufficientPoints {
            required,
            provided: correspondences.len(),
        });
    }
    if correspondences
        .iter()
        .any(|c| !c.pixel.x.is_finite() || !c.pixel.y.is_finite() || !c.robot.is_finite())
    {
        return Err(degenerate("correspondences contain non-finite coordinates"));
    }

    let pixels: Vec<(f64, f64)> = correspondences.iter().map(|c| (c.pixel.x, c.pixel.y)).collect();
    let robots: Vec<(f64, f64)> = correspondences.iter().map(|c| (c.robot.x, c.robot.y)).collect();
    check_spread(&pixels, "pixel")?;
    check_spread(&robots, "robot")?;

    let affine = solve_affine(correspondences)?;
    let planar = match model {
        CalibrationModel::Affine => Matrix3::new(
            affine[(0, 0)], affine[(1, 0)], affine[(2, 0)],
            affine[(0, 1)], affine[(1, 1)], affine[(2, 1)],
            0.0, 0.0, 1.0,
        ),
        CalibrationModel::Homography => dlt_homography(&pixels, &robots)?,
    };
    if planar.determinant().abs() <= EPS {
        return Err(degenerate("fitted planar map is singular"));
    }
    let plane = Vector3::new(affine[(0, 2)], affine[(1, 2)], affine[(2, 2)]);

    let mut transform = CalibrationTransform {
        model,
        planar,
        plane,
        residual_mm: 0.0,
        correspondences: correspondences.to_vec(),
        fitted_at: Utc::now(),
    };
    transform.residual_mm = mean_residual(&transform, correspondences)?;

    if transform.residual_mm.is_nan() || transform.residual_mm > tolerance_mm {
        return Err(CalibrationError::AccuracyExceeded {
            residual_mm: transform.residual_mm,
            tolerance_mm,
        });
    }
    Ok(transform)
}

fn degenerate(reason: &str) -> CalibrationError {
    CalibrationError::DegenerateConfiguration {
        reason: reason.to_string(),
    }
}

/// Reject point sets that are coincident or collinear.
fn check_spread(points: &[(f64, f64)], what: &str) -> Result<(), CalibrationError> {
    let n = points.len() as f64;
    let (mx, my) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x / n, ay + y / n));
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in points {
        let (dx, dy) = (x - mx, y - my);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let trace = sxx + syy;
    if trace <= EPS {
        return Err(degenerate(&format!("all {what} points coincide")));
    }
    let det = sxx * syy - sxy * sxy;
    if det / (trace * trace) < COLLINEARITY_EPS {
        return Err(degenerate(&format!("{what} points are collinear")));
    }
    Ok(())
}

/// Least-squares solve of `[u v 1] · X = [x y z]`; returns the 3×3 `X`.
fn solve_affine(correspondences: &[Correspondence]) -> Result<DMatrix<f64>, CalibrationError> {
    let n = correspondences.len();
    let mut a = DMatrix::<f64>::zeros(n, 3);
    let mut b = DMatrix::<f64>::zeros(n, 3);
    for (i, c) in correspondences.iter().enumerate() {
        a[(i, 0)] = c.pixel.x;
        a[(i, 1)] = c.pixel.y;
        a[(i, 2)] = 1.0;
        b[(i, 0)] = c.robot.x;
        b[(i, 1)] = c.robot.y;
        b[(i, 2)] = c.robot.z;
    }
    a.svd(true, true)
        .solve(&b, EPS)
        .map_err(|e| degenerate(&format!("least-squares solve failed: {e}")))
}

/// Hartley normalization: zero mean, average distance √2.
fn normalizing_transform(points: &[(f64, f64)]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let (cx, cy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x / n, ay + y / n));
    let mean_dist = points
        .iter()
        .map(|(x, y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > EPS {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Normalized DLT estimate of `H` with `(x, y, 1)ᵀ ~ H (u, v, 1)ᵀ`.
fn dlt_homography(
    pixels: &[(f64, f64)],
    robots: &[(f64, f64)],
) -> Result<Matrix3<f64>, CalibrationError> {
    let t_p = normalizing_transform(pixels);
    let t_r = normalizing_transform(robots);
    let apply = |t: &Matrix3<f64>, (x, y): (f64, f64)| {
        let v = t * Vector3::new(x, y, 1.0);
        (v.x, v.y)
    };

    let n = pixels.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (&p, &r)) in pixels.iter().zip(robots).enumerate() {
        let (u, v) = apply(&t_p, p);
        let (x, y) = apply(&t_r, r);
        let (r0, r1) = (2 * i, 2 * i + 1);

        a[(r0, 0)] = -u;
        a[(r0, 1)] = -v;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = x * u;
        a[(r0, 7)] = x * v;
        a[(r0, 8)] = x;

        a[(r1, 3)] = -u;
        a[(r1, 4)] = -v;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = y * u;
        a[(r1, 7)] = y * v;
        a[(r1, 8)] = y;
    }

    // With exactly four points A is 8×9; pad to square so the SVD exposes
    // the null-space vector.
    if a.nrows() < a.ncols() {
        let mut padded = DMatrix::<f64>::zeros(9, 9);
        padded.view_mut((0, 0), (a.nrows(), 9)).copy_from(&a);
        a = padded;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| degenerate("SVD did not produce right singular vectors"))?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &s)| if s < best.1 { (i, s) } else { best });
    let h = v_t.row(min_idx);

    let mut hn = Matrix3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            hn[(r, c)] = h[3 * r + c];
        }
    }

    let t_r_inv = t_r
        .try_inverse()
        .ok_or_else(|| degenerate("robot normalization is not invertible"))?;
    let mut hm = t_r_inv * hn * t_p;
    let scale = hm[(2, 2)];
    if scale.abs() > f64::EPSILON {
        hm /= scale;
    }
    Ok(hm)
}

fn mean_residual(
    transform: &CalibrationTransform,
    correspondences: &[Correspondence],
) -> Result<f64, CalibrationError> {
    if correspondences.is_empty() {
        return Err(CalibrationError::InsufficientPoints {
            required: transform.model.min_points(),
            provided: 0,
        });
    }
    let mut total = 0.0;
    for c in correspondences {
        total += transform.to_robot(c.pixel)?.distance_to(&c.robot);
    }
    Ok(total / correspondences.len() as f64)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
