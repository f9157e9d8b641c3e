//! Selective coastline snapping: nudges already-georeferenced shape
//! vertices onto a reference coastline, but only where there's independent
//! evidence the vertex actually represents a coastline.
//!
//! Snapping every vertex near the reference line would also drag inland
//! shapes that merely happen to cross it, so a vertex only qualifies when
//! it is *both* near a known coastline anchor (any caller-supplied lon/lat
//! marker, typically the control points already used for georeferencing)
//! and near the reference coastline itself. The coastline-proximity check
//! uses a more lenient radius than the actual snap distance, since
//! detection and correction don't need the same tolerance.

use geo_types::{Coord, LineString, MultiLineString, MultiPolygon, Polygon};
use serde_json::json;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::feature::{Feature, FeatureCollection, FeatureGeometry};
use crate::georeference::lonlat_to_webmercator;
use crate::resources::Resources;

/// Errors from coastline snapping.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoastlineError {
    /// Snapping was requested but no reference coastline is loaded.
    #[error("no reference coastline is available")]
    ReferenceMissing,
}

/// Tunable parameters for [`CoastlineSnapper`].
#[derive(Debug, Clone, Copy, bon::Builder)]
pub struct CoastlineConfig {
    /// Maximum distance, in kilometers, from a known coastline anchor for a
    /// vertex to even be considered for snapping.
    #[builder(default = 25.0)]
    pub sift_proximity_km: f64,
    /// Maximum distance, in kilometers, a vertex may actually move to reach
    /// the reference coastline.
    #[builder(default = 10.0)]
    pub max_snap_distance_km: f64,
}

impl Default for CoastlineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Snaps shape vertices onto a reference coastline where there's anchor
/// evidence they should be coastline in the first place.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoastlineSnapper {
    config: CoastlineConfig,
}

impl CoastlineSnapper {
    /// Builds a snapper with the given configuration.
    #[must_use]
    pub fn new(config: CoastlineConfig) -> Self {
        Self { config }
    }

    /// Snaps polygon/multi-polygon geometries in `features` onto
    /// `resources`'s reference coastline, using `anchors` (lon/lat) as the
    /// independent evidence a vertex is actually a coastline point.
    ///
    /// Point and line-string features pass through unchanged. Interior
    /// rings (holes) are never snapped.
    ///
    /// # Errors
    /// Returns [`CoastlineError::ReferenceMissing`] if `resources` carries
    /// no reference coastline.
    #[instrument(skip(self, features, anchors, resources))]
    pub fn snap(
        &self,
        features: &FeatureCollection,
        anchors: &[(f64, f64)],
        resources: &Resources,
    ) -> Result<FeatureCollection, CoastlineError> {
        let coastline = resources.reference_coastline().ok_or(CoastlineError::ReferenceMissing)?;

        let anchors_merc: Vec<(f64, f64)> = anchors.iter().map(|&(lon, lat)| lonlat_to_webmercator(lon, lat)).collect();

        let mut out = Vec::with_capacity(features.features.len());
        for feature in &features.features {
            out.push(self.snap_feature(feature, &anchors_merc, coastline));
        }
        Ok(FeatureCollection { features: out })
    }

    fn snap_feature(&self, feature: &Feature, anchors_merc: &[(f64, f64)], coastline: &MultiLineString<f64>) -> Feature {
        let mut counts = SnapCounts::default();
        let geometry = match &feature.geometry {
            FeatureGeometry::Polygon(poly) => {
                let (snapped, polygon_counts) = self.snap_polygon(poly, anchors_merc, coastline);
                counts += polygon_counts;
                snapped.map(FeatureGeometry::Polygon).unwrap_or_else(|| feature.geometry.clone())
            }
            FeatureGeometry::MultiPolygon(multi) => {
                let snapped: Vec<Polygon<f64>> = multi
                    .0
                    .iter()
                    .filter_map(|poly| {
                        let (snapped, polygon_counts) = self.snap_polygon(poly, anchors_merc, coastline);
                        counts += polygon_counts;
                        snapped
                    })
                    .collect();
                if snapped.is_empty() {
                    feature.geometry.clone()
                } else {
                    FeatureGeometry::MultiPolygon(MultiPolygon::new(snapped))
                }
            }
            other => other.clone(),
        };

        let mut properties = feature.properties.clone();
        if counts.detected > 0 || counts.snapped > 0 {
            let annotations = &mut properties.common_mut().annotations;
            annotations.insert("coastline_snapped".into(), json!(counts.snapped > 0));
            annotations.insert("points_snapped".into(), json!(counts.snapped));
            annotations.insert("coastline_points_detected".into(), json!(counts.detected));
        }
        // unit_box was normalized from the pixel-space shape before
        // georeferencing and snapping ever ran; it never gets re-derived.
        Feature { geometry, unit_box: feature.unit_box.clone(), properties }
    }

    fn snap_polygon(
        &self,
        polygon: &Polygon<f64>,
        anchors_merc: &[(f64, f64)],
        coastline: &MultiLineString<f64>,
    ) -> (Option<Polygon<f64>>, SnapCounts) {
        let sift_m = self.config.sift_proximity_km * 1000.0;
        let detect_m = 2.0 * self.config.max_snap_distance_km * 1000.0;
        let snap_m = self.config.max_snap_distance_km * 1000.0;

        let (exterior, counts) = self.snap_ring(polygon.exterior(), anchors_merc, coastline, sift_m, detect_m, snap_m);
        let candidate = Polygon::new(exterior, polygon.interiors().to_vec());

        if crate::geometry::polygon_is_valid(&candidate) {
            return (Some(candidate), counts);
        }
        match crate::geometry::repair_polygon(&candidate) {
            Some(repaired) if repaired.0.len() == 1 => (Some(repaired.0.into_iter().next().unwrap()), counts),
            _ => {
                warn!("coastline-snapped polygon failed to repair, keeping original geometry");
                (None, counts)
            }
        }
    }

    fn snap_ring(
        &self,
        ring: &LineString<f64>,
        anchors_merc: &[(f64, f64)],
        coastline: &MultiLineString<f64>,
        sift_m: f64,
        detect_m: f64,
        snap_m: f64,
    ) -> (LineString<f64>, SnapCounts) {
        let mut counts = SnapCounts::default();
        let snapped: Vec<Coord<f64>> = ring
            .coords()
            .map(|&c| {
                let (mx, my) = lonlat_to_webmercator(c.x, c.y);
                if !near_any(anchors_merc, mx, my, sift_m) {
                    return c;
                }
                let Some((nearest, dist)) = nearest_point_on_multiline(mx, my, coastline) else {
                    return c;
                };
                if dist > detect_m {
                    return c;
                }
                counts.detected += 1;
                if dist > snap_m {
                    return c;
                }
                counts.snapped += 1;
                let (lon, lat) = crate::georeference::webmercator_to_lonlat(nearest.0, nearest.1);
                Coord { x: lon, y: lat }
            })
            .collect();

        let deduped = crate::geometry::dedupe_consecutive(&snapped, 1e-9);
        (LineString::new(deduped), counts)
    }
}

/// Per-feature tallies of how many vertices qualified as coastline (within
/// `detect_m` of the reference line) and how many of those were actually
/// moved (within `snap_m`).
#[derive(Debug, Clone, Copy, Default)]
struct SnapCounts {
    snapped: usize,
    detected: usize,
}

impl std::ops::AddAssign for SnapCounts {
    fn add_assign(&mut self, other: Self) {
        self.snapped += other.snapped;
        self.detected += other.detected;
    }
}

fn near_any(anchors_merc: &[(f64, f64)], x: f64, y: f64, threshold_m: f64) -> bool {
    anchors_merc.iter().any(|&(ax, ay)| (x - ax).hypot(y - ay) <= threshold_m)
}

/// Nearest point (in WebMercator coordinates, reprojecting the reference
/// coastline's lon/lat on the fly) to `(x, y)` across every line segment of
/// `lines`, plus the Euclidean distance to it.
fn nearest_point_on_multiline(x: f64, y: f64, lines: &MultiLineString<f64>) -> Option<((f64, f64), f64)> {
    let mut best: Option<((f64, f64), f64)> = None;
    for line in &lines.0 {
        let merc: Vec<(f64, f64)> = line.coords().map(|c| lonlat_to_webmercator(c.x, c.y)).collect();
        for pair in merc.windows(2) {
            let (ax, ay) = pair[0];
            let (bx, by) = pair[1];
            let (px, py) = closest_point_on_segment(x, y, ax, ay, bx, by);
            let dist = (x - px).hypot(y - py);
            let better = match best {
                Some((_, best_dist)) => dist < best_dist,
                None => true,
            };
            if better {
                best = Some(((px, py), dist));
            }
        }
    }
    best
}

fn closest_point_on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> (f64, f64) {
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f64::EPSILON {
        return (ax, ay);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);
    (ax + t * dx, ay + t * dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{CommonProps, FeatureProperties};

    fn square_feature(min: f64, max: f64) -> Feature {
        let exterior = LineString::new(vec![
            Coord { x: min, y: min },
            Coord { x: max, y: min },
            Coord { x: max, y: max },
            Coord { x: min, y: max },
            Coord { x: min, y: min },
        ]);
        Feature::new(
            FeatureGeometry::Polygon(Polygon::new(exterior, vec![])),
            FeatureProperties::Shape {
                common: CommonProps::new("shape"),
                color_rgb: (0, 0, 0),
                color_hex: "#000000".into(),
                area: 1.0,
                perimeter: 4.0,
                aspect_ratio: 1.0,
                extent: 1.0,
                solidity: 1.0,
                vertex_count: 4,
            },
        )
    }

    #[test]
    fn snapping_without_reference_errors() {
        let resources = Resources::new(std::sync::Arc::new(crate::resources::StaticGazetteer::new(vec![])), None);
        let snapper = CoastlineSnapper::default();
        let features = FeatureCollection { features: vec![square_feature(-74.0, -73.9)] };
        let err = snapper.snap(&features, &[], &resources).unwrap_err();
        assert!(matches!(err, CoastlineError::ReferenceMissing));
    }

    #[test]
    fn vertex_far_from_any_anchor_is_untouched() {
        let coastline = MultiLineString::new(vec![LineString::new(vec![
            Coord { x: -74.0, y: 40.7 },
            Coord { x: -73.9, y: 40.7 },
        ])]);
        let resources = Resources::new(
            std::sync::Arc::new(crate::resources::StaticGazetteer::new(vec![])),
            Some(std::sync::Arc::new(coastline)),
        );
        let snapper = CoastlineSnapper::default();
        let features = FeatureCollection { features: vec![square_feature(10.0, 10.1)] };
        // No anchors at all, so nothing should move.
        let result = snapper.snap(&features, &[], &resources).unwrap();
        assert_eq!(result.features[0].geometry, features.features[0].geometry);
    }

    #[test]
    fn nearest_point_on_segment_finds_perpendicular_foot() {
        let (x, y) = closest_point_on_segment(5.0, 5.0, 0.0, 0.0, 10.0, 0.0);
        assert!((x - 5.0).abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn snapped_vertex_records_numeric_point_counts() {
        let coastline = MultiLineString::new(vec![LineString::new(vec![
            Coord { x: -74.0, y: 40.0 },
            Coord { x: -73.9, y: 40.0 },
        ])]);
        let resources = Resources::new(
            std::sync::Arc::new(crate::resources::StaticGazetteer::new(vec![])),
            Some(std::sync::Arc::new(coastline)),
        );
        let snapper = CoastlineSnapper::default();
        // The bottom two vertices sit right on the reference coastline; the
        // top two are ~13km away — inside the 20km detection radius but
        // outside the 10km snap radius, so they count as detected but not
        // snapped.
        let exterior = LineString::new(vec![
            Coord { x: -74.0, y: 40.0 },
            Coord { x: -73.95, y: 40.0 },
            Coord { x: -73.95, y: 40.12 },
            Coord { x: -74.0, y: 40.12 },
            Coord { x: -74.0, y: 40.0 },
        ]);
        let feature = Feature::new(
            FeatureGeometry::Polygon(Polygon::new(exterior, vec![])),
            FeatureProperties::Shape {
                common: CommonProps::new("shape"),
                color_rgb: (0, 0, 0),
                color_hex: "#000000".into(),
                area: 1.0,
                perimeter: 4.0,
                aspect_ratio: 1.0,
                extent: 1.0,
                solidity: 1.0,
                vertex_count: 4,
            },
        );
        let features = FeatureCollection { features: vec![feature] };
        let anchors = [(-74.0, 40.0), (-73.95, 40.0)];
        let result = snapper.snap(&features, &anchors, &resources).unwrap();
        let annotations = &result.features[0].properties.common().annotations;
        let points_snapped = annotations["points_snapped"].as_u64().unwrap();
        let points_detected = annotations["coastline_points_detected"].as_u64().unwrap();
        assert_eq!(points_snapped, 2, "only the two on-coastline vertices should actually move");
        assert_eq!(points_detected, 4, "all four vertices have anchor evidence and fall within the detection radius");
        assert_eq!(annotations["coastline_snapped"], json!(true));
    }
}
