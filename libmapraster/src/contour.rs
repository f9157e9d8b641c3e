//! Boundary tracing over boolean raster masks: a `cv2.findContours`
//! equivalent, shared by the color and shape stages.
//!
//! Connected components are found by 4-connected flood fill; each
//! component's outer boundary is traced by Moore-neighbor tracing, and a
//! background component fully enclosed by a single foreground component
//! (i.e. it never touches the raster edge and every adjacent foreground
//! pixel belongs to the same component) is recorded as that component's
//! hole.

use geo_types::{Coord, LineString, MultiPolygon, Polygon};

/// One traced connected component: its pixel area, exterior ring, and any
/// interior rings (holes).
#[derive(Debug, Clone)]
pub struct ComponentContour {
    /// Label assigned during flood fill, stable within one [`trace_components`] call.
    pub label: u32,
    /// Pixel count of the component.
    pub area_px: usize,
    /// Exterior boundary, in pixel-center coordinates, closed (first == last).
    pub exterior: Vec<Coord<f64>>,
    /// Hole boundaries, in pixel-center coordinates, closed.
    pub holes: Vec<Vec<Coord<f64>>>,
}

impl ComponentContour {
    /// Converts the traced rings into a [`Polygon`].
    #[must_use]
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::new(self.exterior.clone()),
            self.holes.iter().cloned().map(LineString::new).collect(),
        )
    }
}

fn flood_label(mask: &[bool], width: usize, height: usize, target: bool) -> (Vec<i64>, u32) {
    let mut labels = vec![-1i64; mask.len()];
    let mut next_label = 0u32;
    let mut stack = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if mask[idx] != target || labels[idx] != -1 {
                continue;
            }
            let label = i64::from(next_label);
            stack.push((x, y));
            labels[idx] = label;
            while let Some((cx, cy)) = stack.pop() {
                for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let nx = cx as i64 + dx;
                    let ny = cy as i64 + dy;
                    if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                        continue;
                    }
                    let (nx, ny) = (nx as usize, ny as usize);
                    let nidx = ny * width + nx;
                    if mask[nidx] == target && labels[nidx] == -1 {
                        labels[nidx] = label;
                        stack.push((nx, ny));
                    }
                }
            }
            next_label += 1;
        }
    }
    (labels, next_label)
}

const CLOCKWISE_8: [(i64, i64); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Traces the outer boundary of the connected region containing `start`,
/// using Moore-neighbor tracing with a bounded step count as a safety net
/// against pathological single-pixel spurs.
fn moore_trace(is_member: impl Fn(i64, i64) -> bool, start: (usize, usize), width: usize, height: usize) -> Vec<Coord<f64>> {
    let start = (start.0 as i64, start.1 as i64);
    let mut boundary = vec![start];
    let mut backtrack_dir = 6usize; // west: the scan that found `start` approached from the left
    let mut current = start;
    let safety_cap = width.saturating_mul(height).saturating_mul(8).max(8);

    loop {
        let mut found = None;
        for k in 1..=8 {
            let dir_idx = (backtrack_dir + k) % 8;
            let (dx, dy) = CLOCKWISE_8[dir_idx];
            let (nx, ny) = (current.0 + dx, current.1 + dy);
            if is_member(nx, ny) {
                found = Some((nx, ny, dir_idx));
                break;
            }
        }
        let Some((nx, ny, dir_idx)) = found else {
            break; // isolated pixel: single-point "boundary"
        };
        backtrack_dir = (dir_idx + 4) % 8;
        current = (nx, ny);
        if current == start && boundary.len() > 1 {
            break;
        }
        boundary.push(current);
        if boundary.len() > safety_cap {
            break;
        }
    }

    if boundary.first() != boundary.last() {
        boundary.push(boundary[0]);
    }
    boundary
        .into_iter()
        .map(|(x, y)| Coord { x: x as f64, y: y as f64 })
        .collect()
}

fn touches_border(labels: &[i64], width: usize, height: usize, label: i64) -> bool {
    for x in 0..width {
        if labels[x] == label || labels[(height - 1) * width + x] == label {
            return true;
        }
    }
    for y in 0..height {
        if labels[y * width] == label || labels[y * width + width - 1] == label {
            return true;
        }
    }
    false
}

/// Finds every connected foreground component in `mask` (4-connected, true
/// pixels), traces its exterior boundary, and attaches any enclosed
/// background region as a hole.
///
/// Components are returned ordered by decreasing pixel area.
#[must_use]
pub fn trace_components(mask: &[bool], width: usize, height: usize) -> Vec<ComponentContour> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let (fg_labels, fg_count) = flood_label(mask, width, height, true);
    let (bg_labels, bg_count) = flood_label(mask, width, height, false);

    let mut fg_area = vec![0usize; fg_count as usize];
    let mut fg_start = vec![None; fg_count as usize];
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let l = fg_labels[idx];
            if l >= 0 {
                fg_area[l as usize] += 1;
                if fg_start[l as usize].is_none() {
                    fg_start[l as usize] = Some((x, y));
                }
            }
        }
    }

    // For each background component not touching the border, determine
    // whether every adjacent foreground pixel belongs to a single label.
    let mut bg_owner: Vec<Option<i64>> = vec![None; bg_count as usize];
    let mut bg_start: Vec<Option<(usize, usize)>> = vec![None; bg_count as usize];
    let mut bg_ambiguous = vec![false; bg_count as usize];
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let bl = bg_labels[idx];
            if bl < 0 {
                continue;
            }
            let bl = bl as usize;
            if bg_start[bl].is_none() {
                bg_start[bl] = Some((x, y));
            }
            for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                    continue;
                }
                let fidx = ny as usize * width + nx as usize;
                let fl = fg_labels[fidx];
                if fl < 0 {
                    continue;
                }
                match bg_owner[bl] {
                    None => bg_owner[bl] = Some(fl),
                    Some(owner) if owner != fl => bg_ambiguous[bl] = true,
                    _ => {}
                }
            }
        }
    }

    let mut components: Vec<ComponentContour> = Vec::with_capacity(fg_count as usize);
    for label in 0..fg_count {
        let Some(start) = fg_start[label as usize] else {
            continue;
        };
        let exterior = moore_trace(
            |x, y| x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height && fg_labels[y as usize * width + x as usize] == i64::from(label),
            start,
            width,
            height,
        );

        let mut holes = Vec::new();
        for bg_label in 0..bg_count {
            if bg_ambiguous[bg_label as usize] {
                continue;
            }
            if bg_owner[bg_label as usize] != Some(i64::from(label)) {
                continue;
            }
            if touches_border(&bg_labels, width, height, i64::from(bg_label)) {
                continue;
            }
            let Some(hole_start) = bg_start[bg_label as usize] else {
                continue;
            };
            let hole = moore_trace(
                |x, y| x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height && bg_labels[y as usize * width + x as usize] == i64::from(bg_label),
                hole_start,
                width,
                height,
            );
            holes.push(hole);
        }

        components.push(ComponentContour {
            label,
            area_px: fg_area[label as usize],
            exterior,
            holes,
        });
    }

    components.sort_by(|a, b| b.area_px.cmp(&a.area_px));
    components
}

/// Converts every traced component into one [`MultiPolygon`], ignoring
/// components whose repair (via [`crate::geometry::repair_polygon`]) fails.
#[must_use]
pub fn components_to_multi_polygon(components: &[ComponentContour]) -> MultiPolygon<f64> {
    let mut polygons = Vec::new();
    for component in components {
        let polygon = component.to_polygon();
        if let Some(repaired) = crate::geometry::repair_polygon(&polygon) {
            polygons.extend(repaired.0);
        }
    }
    MultiPolygon::new(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&str]) -> (Vec<bool>, usize, usize) {
        let height = rows.len();
        let width = rows[0].len();
        let mut mask = vec![false; width * height];
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                mask[y * width + x] = c == '#';
            }
        }
        (mask, width, height)
    }

    #[test]
    fn traces_single_solid_square() {
        let (mask, w, h) = grid(&["####", "####", "####", "####"]);
        let components = trace_components(&mask, w, h);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].area_px, 16);
        assert!(components[0].holes.is_empty());
    }

    #[test]
    fn detects_enclosed_hole() {
        let (mask, w, h) = grid(&["#####", "#...#", "#...#", "#...#", "#####"]);
        let components = trace_components(&mask, w, h);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].holes.len(), 1);
    }

    #[test]
    fn two_disjoint_blobs_yield_two_components() {
        let (mask, w, h) = grid(&["##..##", "##..##"]);
        let components = trace_components(&mask, w, h);
        assert_eq!(components.len(), 2);
    }
}
