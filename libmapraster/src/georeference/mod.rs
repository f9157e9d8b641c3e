//! Pixel-to-geographic transform fitting and application.
//!
//! WebMercator is the working projection for transform fitting (Euclidean
//! least squares needs a conformal planar CRS, not raw lon/lat degrees),
//! and the final geometry is reprojected back to WGS84 lon/lat. Affine,
//! homography, and thin-plate-spline are the transform families offered,
//! chosen by how many control points are available and how rich a warp
//! they justify.

mod homography;
mod tps;
mod webmercator;

use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::feature::FeatureGeometry;
use crate::job::ControlPoint;
use crate::linalg::least_squares;

pub use webmercator::{lonlat_to_webmercator, webmercator_to_lonlat};

/// Errors from fitting or applying a georeferencing transform.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GeoreferenceError {
    /// Fewer than 3 control points were supplied; no transform can be fit.
    #[error("at least 3 control points are required, got {0}")]
    InsufficientControlPoints(usize),

    /// The least-squares system for the chosen transform was singular
    /// (degenerate control-point configuration, e.g. all collinear).
    #[error("control points are degenerate for a {0:?} transform")]
    TransformSingular(TransformKind),
}

/// Which transform family to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// 6-parameter affine (translation, rotation, scale, shear).
    Affine,
    /// 8-parameter projective homography.
    Homography,
    /// Thin-plate spline (exact interpolation through every control point).
    ThinPlateSpline,
}

impl TransformKind {
    /// Stable name for persisted `transform_method` properties.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Affine => "affine",
            Self::Homography => "homography",
            Self::ThinPlateSpline => "thin_plate_spline",
        }
    }
}

/// A fitted transform plus its fit diagnostics.
#[derive(Debug, Clone)]
pub struct Transform {
    kind: TransformKind,
    fit: FitResult,
    /// Root-mean-square residual, in WebMercator meters, over the control
    /// points used for the final fit.
    pub rmse_m: f64,
    /// Per-control-point inlier flags, in the order `fit` was called with.
    pub inliers: Vec<bool>,
}

impl Transform {
    fn map_xy(&self, x: f64, y: f64) -> (f64, f64) {
        self.fit.map_xy(x, y)
    }

    /// Which transform family was actually fit (after any degenerate-system
    /// fallback), for callers that want to stamp `transform_method` on their
    /// persisted properties.
    #[must_use]
    pub const fn kind(&self) -> TransformKind {
        self.kind
    }

    /// Maps a single pixel coordinate to WGS84 `(lon, lat)`.
    #[must_use]
    pub fn apply_point(&self, pixel: (f64, f64)) -> (f64, f64) {
        let (mx, my) = self.map_xy(pixel.0, pixel.1);
        webmercator_to_lonlat(mx, my)
    }

    /// Rewrites a pixel-space geometry into WGS84 `(lon, lat)` coordinates in
    /// place.
    #[must_use]
    pub fn apply(&self, geometry: &FeatureGeometry) -> FeatureGeometry {
        match geometry {
            FeatureGeometry::Point(p) => {
                let (lon, lat) = self.apply_point((p.x(), p.y()));
                FeatureGeometry::Point(Point::new(lon, lat))
            }
            FeatureGeometry::LineString(ls) => FeatureGeometry::LineString(self.apply_line(ls)),
            FeatureGeometry::Polygon(poly) => FeatureGeometry::Polygon(self.apply_polygon(poly)),
            FeatureGeometry::MultiPolygon(multi) => {
                FeatureGeometry::MultiPolygon(MultiPolygon::new(multi.0.iter().map(|p| self.apply_polygon(p)).collect()))
            }
        }
    }

    fn apply_line(&self, line: &LineString<f64>) -> LineString<f64> {
        LineString::new(
            line.coords()
                .map(|c| {
                    let (lon, lat) = self.apply_point((c.x, c.y));
                    Coord { x: lon, y: lat }
                })
                .collect(),
        )
    }

    fn apply_polygon(&self, polygon: &Polygon<f64>) -> Polygon<f64> {
        Polygon::new(
            self.apply_line(polygon.exterior()),
            polygon.interiors().iter().map(|r| self.apply_line(r)).collect(),
        )
    }
}

/// Tunable parameters for [`Georeferencer`].
#[derive(Debug, Clone, Copy, bon::Builder)]
pub struct GeoreferenceConfig {
    /// Force a specific transform family instead of choosing by control
    /// point count.
    pub force: Option<TransformKind>,
    /// Run RANSAC robust fitting before the final least-squares fit.
    #[builder(default = true)]
    pub ransac: bool,
    /// RANSAC inlier threshold, in WebMercator meters.
    #[builder(default = 5.0)]
    pub ransac_inlier_threshold_m: f64,
    /// RANSAC iteration count.
    #[builder(default = 200)]
    pub ransac_iterations: usize,
}

impl Default for GeoreferenceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Fits a pixel-to-geographic transform from control points and applies it
/// to pixel-space geometries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Georeferencer {
    config: GeoreferenceConfig,
}

impl Georeferencer {
    /// Builds a georeferencer with the given configuration.
    #[must_use]
    pub fn new(config: GeoreferenceConfig) -> Self {
        Self { config }
    }

    /// Chooses a transform family (unless [`GeoreferenceConfig::force`] is
    /// set) and fits it to `control_points`.
    ///
    /// Selection: fewer than 3 points is an error; 3 points forces affine
    /// regardless of `force` (homography and TPS are underdetermined below
    /// 4 and need at least 3 respectively, but TPS with exactly 3 points
    /// degenerates to an affine map, so affine is used directly); 4 or more
    /// points default to homography; thin-plate-spline only runs when
    /// explicitly forced, since it exactly interpolates every point and can
    /// overfit noisy digitization clicks.
    ///
    /// # Errors
    /// Returns [`GeoreferenceError::InsufficientControlPoints`] if fewer
    /// than 3 points are given, or [`GeoreferenceError::TransformSingular`]
    /// if the chosen transform's fitting system is degenerate.
    #[instrument(skip(self, control_points))]
    pub fn fit(&self, control_points: &[ControlPoint]) -> Result<Transform, GeoreferenceError> {
        let n = control_points.len();
        if n < 3 {
            return Err(GeoreferenceError::InsufficientControlPoints(n));
        }

        let kind = if n == 3 {
            TransformKind::Affine
        } else {
            match self.config.force {
                Some(TransformKind::ThinPlateSpline) => {
                    if n < 7 {
                        warn!(count = n, "thin-plate spline forced with few control points, fit may be unstable");
                    }
                    TransformKind::ThinPlateSpline
                }
                Some(kind) => kind,
                None => TransformKind::Homography,
            }
        };

        let merc: Vec<(f64, f64)> = control_points
            .iter()
            .map(|cp| lonlat_to_webmercator(cp.lonlat.0, cp.lonlat.1))
            .collect();
        let pixels: Vec<(f64, f64)> = control_points.iter().map(|cp| cp.pixel).collect();

        let inliers = if self.config.ransac && kind != TransformKind::ThinPlateSpline {
            self.ransac_inliers(&pixels, &merc, kind)
        } else {
            vec![true; n]
        };

        let fit_pixels: Vec<(f64, f64)> = pixels
            .iter()
            .zip(&inliers)
            .filter(|(_, keep)| **keep)
            .map(|(p, _)| *p)
            .collect();
        let fit_merc: Vec<(f64, f64)> = merc
            .iter()
            .zip(&inliers)
            .filter(|(_, keep)| **keep)
            .map(|(p, _)| *p)
            .collect();

        // A rank-deficient system falls back to a more
        // robust method before the stage gives up: affine has the fewest
        // degrees of freedom of the three families and is the least prone
        // to degenerate control-point configurations.
        let (kind, fit) = match fit_kind(kind, &fit_pixels, &fit_merc) {
            Some(fit) => (kind, fit),
            None if kind != TransformKind::Affine => {
                warn!(?kind, "fit was singular, falling back to affine");
                let fit = fit_kind(TransformKind::Affine, &fit_pixels, &fit_merc)
                    .ok_or(GeoreferenceError::TransformSingular(kind))?;
                (TransformKind::Affine, fit)
            }
            None => return Err(GeoreferenceError::TransformSingular(kind)),
        };
        let rmse_m = rmse(&fit, &pixels, &merc);

        Ok(Transform {
            kind,
            fit,
            rmse_m,
            inliers,
        })
    }

    fn ransac_inliers(&self, pixels: &[(f64, f64)], merc: &[(f64, f64)], kind: TransformKind) -> Vec<bool> {
        let n = pixels.len();
        let min_sample = match kind {
            TransformKind::Affine => 3,
            TransformKind::Homography => 4,
            TransformKind::ThinPlateSpline => n,
        };
        if n <= min_sample {
            return vec![true; n];
        }

        let mut rng = StdRng::seed_from_u64(0xC0FFEE ^ n as u64);
        let indices: Vec<usize> = (0..n).collect();
        let mut best_inliers = vec![true; n];
        let mut best_count = 0;

        for _ in 0..self.config.ransac_iterations {
            let mut sample = indices.clone();
            sample.shuffle(&mut rng);
            let sample = &sample[..min_sample];
            let sample_pixels: Vec<(f64, f64)> = sample.iter().map(|&i| pixels[i]).collect();
            let sample_merc: Vec<(f64, f64)> = sample.iter().map(|&i| merc[i]).collect();

            let Some(candidate) = fit_kind(kind, &sample_pixels, &sample_merc) else {
                continue;
            };

            let mut inliers = vec![false; n];
            let mut count = 0;
            for i in 0..n {
                let (mx, my) = candidate.map_xy(pixels[i].0, pixels[i].1);
                let dist = (mx - merc[i].0).hypot(my - merc[i].1);
                if dist <= self.config.ransac_inlier_threshold_m {
                    inliers[i] = true;
                    count += 1;
                }
            }
            if count > best_count {
                best_count = count;
                best_inliers = inliers;
            }
        }

        // RANSAC may reject too aggressively on a small, clean set; never
        // drop below the minimum sample size for the chosen transform.
        if best_inliers.iter().filter(|b| **b).count() < min_sample {
            return vec![true; n];
        }
        best_inliers
    }
}

#[derive(Debug, Clone)]
struct FitResult {
    affine: Option<[f64; 6]>,
    homography: Option<homography::Homography>,
    tps: Option<tps::ThinPlateSpline>,
}

impl FitResult {
    fn map_xy(&self, x: f64, y: f64) -> (f64, f64) {
        if let Some([a, b, tx, c, d, ty]) = self.affine {
            return (a * x + b * y + tx, c * x + d * y + ty);
        }
        if let Some(h) = &self.homography {
            return h.apply(x, y);
        }
        if let Some(t) = &self.tps {
            return t.apply(x, y);
        }
        unreachable!("FitResult always carries exactly one transform")
    }
}

fn fit_kind(kind: TransformKind, pixels: &[(f64, f64)], merc: &[(f64, f64)]) -> Option<FitResult> {
    match kind {
        TransformKind::Affine => fit_affine(pixels, merc).map(|affine| FitResult {
            affine: Some(affine),
            homography: None,
            tps: None,
        }),
        TransformKind::Homography => homography::fit(pixels, merc).map(|h| FitResult {
            affine: None,
            homography: Some(h),
            tps: None,
        }),
        TransformKind::ThinPlateSpline => tps::fit(pixels, merc).map(|t| FitResult {
            affine: None,
            homography: None,
            tps: Some(t),
        }),
    }
}

/// Solves the 2N×6 least-squares system for `X = a*x + b*y + tx`,
/// `Y = c*x + d*y + ty`.
fn fit_affine(pixels: &[(f64, f64)], merc: &[(f64, f64)]) -> Option<[f64; 6]> {
    let n = pixels.len();
    let mut a = Vec::with_capacity(2 * n);
    let mut b = Vec::with_capacity(2 * n);
    for i in 0..n {
        let (x, y) = pixels[i];
        let (bigx, bigy) = merc[i];
        a.push(vec![x, y, 1.0, 0.0, 0.0, 0.0]);
        b.push(bigx);
        a.push(vec![0.0, 0.0, 0.0, x, y, 1.0]);
        b.push(bigy);
    }
    let params = least_squares(&a, &b)?;
    Some([params[0], params[1], params[2], params[3], params[4], params[5]])
}

fn rmse(transform: &FitResult, pixels: &[(f64, f64)], merc: &[(f64, f64)]) -> f64 {
    let sum_sq: f64 = pixels
        .iter()
        .zip(merc)
        .map(|(p, m)| {
            let (mx, my) = transform.map_xy(p.0, p.1);
            (mx - m.0).powi(2) + (my - m.1).powi(2)
        })
        .sum();
    (sum_sq / pixels.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(pixel: (f64, f64), lonlat: (f64, f64)) -> ControlPoint {
        ControlPoint::new(pixel, lonlat)
    }

    #[test]
    fn rejects_fewer_than_three_points() {
        let georef = Georeferencer::default();
        let points = vec![cp((0.0, 0.0), (0.0, 0.0)), cp((1.0, 0.0), (1.0, 0.0))];
        let err = georef.fit(&points).unwrap_err();
        assert!(matches!(err, GeoreferenceError::InsufficientControlPoints(2)));
    }

    #[test]
    fn three_points_use_affine_and_round_trip_closely() {
        let georef = Georeferencer::new(GeoreferenceConfig::builder().ransac(false).build());
        let points = vec![
            cp((0.0, 0.0), (-74.0, 40.7)),
            cp((100.0, 0.0), (-73.9, 40.7)),
            cp((0.0, 100.0), (-74.0, 40.6)),
        ];
        let transform = georef.fit(&points).unwrap();
        assert_eq!(transform.kind, TransformKind::Affine);
        let (lon, lat) = transform.apply_point((0.0, 0.0));
        assert!((lon - (-74.0)).abs() < 0.01);
        assert!((lat - 40.7).abs() < 0.01);
    }

    #[test]
    fn four_points_default_to_homography() {
        let georef = Georeferencer::new(GeoreferenceConfig::builder().ransac(false).build());
        let points = vec![
            cp((0.0, 0.0), (-74.0, 40.7)),
            cp((100.0, 0.0), (-73.9, 40.7)),
            cp((100.0, 100.0), (-73.9, 40.6)),
            cp((0.0, 100.0), (-74.0, 40.6)),
        ];
        let transform = georef.fit(&points).unwrap();
        assert_eq!(transform.kind, TransformKind::Homography);
    }

    #[test]
    fn forced_tps_warns_below_seven_points_but_still_fits() {
        let georef = Georeferencer::new(
            GeoreferenceConfig::builder()
                .force(TransformKind::ThinPlateSpline)
                .ransac(false)
                .build(),
        );
        let points = vec![
            cp((0.0, 0.0), (-74.0, 40.7)),
            cp((100.0, 0.0), (-73.9, 40.7)),
            cp((100.0, 100.0), (-73.9, 40.6)),
            cp((0.0, 100.0), (-74.0, 40.6)),
        ];
        let transform = georef.fit(&points).unwrap();
        assert_eq!(transform.kind, TransformKind::ThinPlateSpline);
    }
}
