//! Geometry helpers shared by every vectorizing stage: unit-box
//! normalization, ring repair, and coordinate-space tagging.
//!
//! Pixel-space geometries use pixel coordinates `(x, y)` with `x in [0, W]`,
//! `y in [0, H]`; georeferenced geometries use `(lon, lat)` in WGS84. Both are
//! represented with the same `geo_types` primitives — the distinction is
//! tracked by [`crate::feature::FeatureProperties::is_pixel_space`], not by
//! the type system, since the georeferencer rewrites geometries in place.

use geo::{Area, BooleanOps};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};

/// Bounding box of a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum x.
    pub min_x: f64,
    /// Minimum y.
    pub min_y: f64,
    /// Maximum x.
    pub max_x: f64,
    /// Maximum y.
    pub max_y: f64,
}

impl BoundingBox {
    /// Width of the box.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the box.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    fn from_coords(coords: impl Iterator<Item = Coord<f64>>) -> Option<Self> {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        let mut any = false;
        for c in coords {
            any = true;
            min_x = min_x.min(c.x);
            min_y = min_y.min(c.y);
            max_x = max_x.max(c.x);
            max_y = max_y.max(c.y);
        }
        any.then_some(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }
}

/// Bounding box of a polygon's exterior + interior rings.
#[must_use]
pub fn polygon_bbox(polygon: &Polygon<f64>) -> Option<BoundingBox> {
    let coords = polygon
        .exterior()
        .coords()
        .copied()
        .chain(polygon.interiors().iter().flat_map(|r| r.coords().copied()));
    BoundingBox::from_coords(coords)
}

/// Bounding box across every polygon in a [`MultiPolygon`].
#[must_use]
pub fn multi_polygon_bbox(multi: &MultiPolygon<f64>) -> Option<BoundingBox> {
    let mut acc: Option<BoundingBox> = None;
    for poly in &multi.0 {
        if let Some(bbox) = polygon_bbox(poly) {
            acc = Some(match acc {
                None => bbox,
                Some(a) => BoundingBox {
                    min_x: a.min_x.min(bbox.min_x),
                    min_y: a.min_y.min(bbox.min_y),
                    max_x: a.max_x.max(bbox.max_x),
                    max_y: a.max_y.max(bbox.max_y),
                },
            });
        }
    }
    acc
}

/// Normalizes a [`MultiPolygon`] into the unit box.
///
/// Translates to the origin, uniformly scales so the longest side equals 1,
/// then translates so the shape is centered within `[0, 1]^2`.
#[must_use]
pub fn normalize_to_unit_box(multi: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let bbox = multi_polygon_bbox(multi)?;
    let longest_side = bbox.width().max(bbox.height());
    if longest_side <= 0.0 {
        return None;
    }
    let scale = 1.0 / longest_side;
    let scaled_w = bbox.width() * scale;
    let scaled_h = bbox.height() * scale;
    let offset_x = (1.0 - scaled_w) / 2.0;
    let offset_y = (1.0 - scaled_h) / 2.0;

    let transform_coord = |c: Coord<f64>| Coord {
        x: (c.x - bbox.min_x) * scale + offset_x,
        y: (c.y - bbox.min_y) * scale + offset_y,
    };

    let polygons = multi
        .0
        .iter()
        .map(|poly| {
            let exterior = LineString::new(poly.exterior().coords().map(|c| transform_coord(*c)).collect());
            let interiors = poly
                .interiors()
                .iter()
                .map(|r| LineString::new(r.coords().map(|c| transform_coord(*c)).collect()))
                .collect::<Vec<_>>();
            Polygon::new(exterior, interiors)
        })
        .collect::<Vec<_>>();

    Some(MultiPolygon::new(polygons))
}

/// Collapses consecutive duplicate vertices in a ring (closed coordinate
/// sequence), within `tolerance`.
#[must_use]
pub fn dedupe_consecutive(coords: &[Coord<f64>], tolerance: f64) -> Vec<Coord<f64>> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for c in coords {
        if let Some(prev) = out.last() {
            if (c.x - prev.x).abs() <= tolerance && (c.y - prev.y).abs() <= tolerance {
                continue;
            }
        }
        out.push(*c);
    }
    out
}

/// Returns `true` if no two non-adjacent edges of the ring intersect.
///
/// A cheap, dependency-free stand-in for full OGC polygon validity, adequate
/// for the contour-traced and control-point-warped rings this pipeline
/// produces.
#[must_use]
pub fn ring_is_simple(coords: &[Coord<f64>]) -> bool {
    let n = coords.len();
    if n < 4 {
        return true;
    }
    // coords[n-1] == coords[0] for a closed ring; iterate edges [i, i+1).
    let edge_count = n - 1;
    for i in 0..edge_count {
        let (a1, a2) = (coords[i], coords[i + 1]);
        for j in (i + 1)..edge_count {
            // Adjacent edges share an endpoint by construction; skip them.
            if j == i || j == i + 1 || (i == 0 && j == edge_count - 1) {
                continue;
            }
            let (b1, b2) = (coords[j], coords[j + 1]);
            if segments_intersect(a1, a2, b1, b2) {
                return false;
            }
        }
    }
    true
}

fn orientation(p: Coord<f64>, q: Coord<f64>, r: Coord<f64>) -> f64 {
    (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y)
}

fn on_segment(p: Coord<f64>, q: Coord<f64>, r: Coord<f64>) -> bool {
    q.x <= p.x.max(r.x) && q.x >= p.x.min(r.x) && q.y <= p.y.max(r.y) && q.y >= p.y.min(r.y)
}

fn segments_intersect(p1: Coord<f64>, q1: Coord<f64>, p2: Coord<f64>, q2: Coord<f64>) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if (o1 > 0.0) != (o2 > 0.0) && (o3 > 0.0) != (o4 > 0.0) && o1 != 0.0 && o2 != 0.0 {
        return true;
    }
    if o1 == 0.0 && on_segment(p1, p2, q1) {
        return true;
    }
    if o2 == 0.0 && on_segment(p1, q2, q1) {
        return true;
    }
    if o3 == 0.0 && on_segment(p2, p1, q2) {
        return true;
    }
    if o4 == 0.0 && on_segment(p2, q1, q2) {
        return true;
    }
    false
}

/// Whether a [`Polygon`] is valid in the Shapely sense used by this pipeline:
/// non-zero area and a simple (non-self-intersecting) exterior ring.
#[must_use]
pub fn polygon_is_valid(polygon: &Polygon<f64>) -> bool {
    if polygon.unsigned_area() <= 0.0 {
        return false;
    }
    ring_is_simple(polygon.exterior().coords().copied().collect::<Vec<_>>().as_slice())
}

/// Attempts to repair an invalid polygon via self-union (the "zero-buffer"
/// trick): unioning a polygon with itself normalizes overlapping/crossing
/// rings the same way `shapely.buffer(0)` does.
///
/// Returns `None` if the repaired geometry is still invalid — the caller
/// should then drop the feature and log a warning.
#[must_use]
pub fn repair_polygon(polygon: &Polygon<f64>) -> Option<MultiPolygon<f64>> {
    if polygon_is_valid(polygon) {
        return Some(MultiPolygon::new(vec![polygon.clone()]));
    }
    let single = MultiPolygon::new(vec![polygon.clone()]);
    let repaired = single.union(&single);
    let all_valid = repaired.0.iter().all(polygon_is_valid);
    (all_valid && !repaired.0.is_empty()).then_some(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;

    #[test]
    fn unit_box_normalization_touches_opposite_sides() {
        let square = MultiPolygon::new(vec![polygon![
            (x: 10.0, y: 20.0),
            (x: 30.0, y: 20.0),
            (x: 30.0, y: 60.0),
            (x: 10.0, y: 60.0),
            (x: 10.0, y: 20.0),
        ]]);
        let normalized = normalize_to_unit_box(&square).unwrap();
        let bbox = multi_polygon_bbox(&normalized).unwrap();
        assert!(bbox.min_x >= -1e-9 && bbox.max_x <= 1.0 + 1e-9);
        assert!(bbox.min_y >= -1e-9 && bbox.max_y <= 1.0 + 1e-9);
        // longest side was height (40), so after scaling height should span [0, 1]
        assert!((bbox.min_y - 0.0).abs() < 1e-9);
        assert!((bbox.max_y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dedupe_consecutive_collapses_near_duplicates() {
        let coords = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 1e-12, y: 0.0 },
            Coord { x: 1.0, y: 1.0 },
        ];
        let out = dedupe_consecutive(&coords, 1e-9);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn simple_square_is_valid() {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ];
        assert!(polygon_is_valid(&square));
    }

    #[test]
    fn self_intersecting_bowtie_is_invalid() {
        let bowtie = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ];
        assert!(!polygon_is_valid(&bowtie));
    }
}
