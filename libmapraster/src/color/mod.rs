//! Dominant and accent color-layer extraction.
//!
//! Quantizes valid pixels into LAB bins, ranks bins by coverage, merges
//! perceptually close bins, then assigns every valid pixel exclusively to
//! its nearest surviving color center (within a ΔE₀₀ tolerance) and
//! vectorizes each resulting mask.

mod names;

use std::collections::HashMap;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::contour::{components_to_multi_polygon, trace_components};
use crate::feature::{CommonProps, Feature, FeatureCollection, FeatureGeometry, FeatureProperties};
use crate::image::{delta_e2000, lab_to_srgb, Image};
use crate::ocr::OcrBlock;

/// Errors from the color extraction stage.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ColorError {
    /// The source image has no valid (unmasked) pixels.
    #[error("image has no valid pixels to extract colors from")]
    EmptyImage,
    /// No candidate color survived selection and mask assignment; the
    /// caller should expect a single fallback layer built from the highest-
    /// count bin instead of an empty collection.
    #[error("no color layer survived selection and mask assignment")]
    SelectionEmpty,
}

/// Tunable parameters for [`ColorExtractor`]: bin widths, candidate-center
/// count, and the ΔE thresholds governing selection and mask assignment.
#[derive(Debug, Clone, Copy, bon::Builder)]
pub struct ColorConfig {
    /// LAB L-channel bin width.
    #[builder(default = 4.0)]
    pub bin_l: f32,
    /// LAB a-channel bin width.
    #[builder(default = 8.0)]
    pub bin_a: f32,
    /// LAB b-channel bin width.
    #[builder(default = 8.0)]
    pub bin_b: f32,
    /// Maximum number of dominant bins considered before merging.
    #[builder(default = 200)]
    pub top_n: usize,
    /// Minimum pixel-coverage ratio for a bin to be considered dominant.
    #[builder(default = 0.001)]
    pub dominant_min_ratio: f64,
    /// Minimum pixel-coverage ratio for a bin to be considered as an accent
    /// color (below the dominant threshold but still visually distinct).
    #[builder(default = 0.0005)]
    pub accent_min_ratio: f64,
    /// Minimum ΔE₀₀ an accent candidate must have from every already-selected
    /// center to be kept as a separate color.
    #[builder(default = 20.0)]
    pub accent_min_delta_e: f32,
    /// ΔE₀₀ below which two dominant bins are merged into one center.
    #[builder(default = 12.0)]
    pub merge_delta_e: f32,
    /// ΔE₀₀ tolerance for assigning a pixel to its nearest selected center.
    #[builder(default = 10.0)]
    pub mask_delta_e: f32,
    /// If set, and fewer than this many colors were selected by the
    /// threshold-driven passes, additional high-count bins are added
    /// (ignoring the ratio thresholds) until this many are selected or bins
    /// run out.
    #[builder(default = None)]
    pub min_colors_fallback: Option<usize>,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct Bin {
    center: [f32; 3],
    count: usize,
}

fn quantize(lab: &crate::image::LabImage, config: &ColorConfig) -> Vec<Bin> {
    let mut bins: HashMap<(i32, i32, i32), (usize, [f32; 3])> = HashMap::new();
    for (_, px) in lab.valid_pixels() {
        let lq = (px[0] / config.bin_l).floor() as i32;
        let aq = ((px[1] + 128.0) / config.bin_a).floor() as i32;
        let bq = ((px[2] + 128.0) / config.bin_b).floor() as i32;
        let l_center = (lq as f32 + 0.5) * config.bin_l;
        let a_center = (aq as f32 + 0.5) * config.bin_a - 128.0;
        let b_center = (bq as f32 + 0.5) * config.bin_b - 128.0;
        let entry = bins.entry((lq, aq, bq)).or_insert((0, [l_center, a_center, b_center]));
        entry.0 += 1;
    }
    let mut out: Vec<Bin> = bins
        .into_iter()
        .map(|(_, (count, center))| Bin { center, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

struct Selected {
    center: [f32; 3],
    count: usize,
}

fn select_centers(bins: &[Bin], config: &ColorConfig, total_valid: usize) -> Vec<Selected> {
    let mut selected: Vec<Selected> = Vec::new();

    let dominant_candidates = bins
        .iter()
        .take(config.top_n)
        .filter(|b| (b.count as f64 / total_valid as f64) >= config.dominant_min_ratio);
    for bin in dominant_candidates {
        merge_or_push(&mut selected, bin, config.merge_delta_e);
    }

    for bin in bins {
        let ratio = bin.count as f64 / total_valid as f64;
        if ratio < config.accent_min_ratio || ratio >= config.dominant_min_ratio {
            continue;
        }
        let is_distinct = selected
            .iter()
            .all(|s| delta_e2000(s.center, bin.center) >= config.accent_min_delta_e);
        if is_distinct {
            selected.push(Selected {
                center: bin.center,
                count: bin.count,
            });
        }
    }

    if let Some(min_colors) = config.min_colors_fallback {
        if selected.len() < min_colors {
            // Still floor-filling by descending ratio (bins are pre-sorted),
            // but at half the usual accent separation: close enough to add
            // coverage, not so close the added center is a duplicate.
            let relaxed_delta_e = config.accent_min_delta_e / 2.0;
            let used: std::collections::HashSet<_> = selected
                .iter()
                .map(|s| (s.center[0].to_bits(), s.center[1].to_bits(), s.center[2].to_bits()))
                .collect();
            for bin in bins {
                if selected.len() >= min_colors {
                    break;
                }
                let key = (bin.center[0].to_bits(), bin.center[1].to_bits(), bin.center[2].to_bits());
                if used.contains(&key) {
                    continue;
                }
                let is_distinct = selected
                    .iter()
                    .all(|s| delta_e2000(s.center, bin.center) >= relaxed_delta_e);
                if !is_distinct {
                    continue;
                }
                selected.push(Selected {
                    center: bin.center,
                    count: bin.count,
                });
            }
        }
    }

    selected
}

/// Marks every pixel whose center falls inside an OCR text block's
/// axis-aligned bounding box, the same bbox notion
/// [`crate::shape::ShapeExtractor`] uses for its own text-overlap filter.
fn rasterize_text_quads(width: usize, height: usize, text_blocks: &[OcrBlock]) -> Vec<bool> {
    let mut mask = vec![false; width * height];
    if text_blocks.is_empty() {
        return mask;
    }
    for block in text_blocks {
        let (bx, by, bw, bh) = block.bbox();
        let x0 = bx.max(0) as usize;
        let y0 = by.max(0) as usize;
        let x1 = ((bx + bw).max(0) as usize).min(width);
        let y1 = ((by + bh).max(0) as usize).min(height);
        for y in y0..y1 {
            for x in x0..x1 {
                mask[y * width + x] = true;
            }
        }
    }
    mask
}

fn merge_or_push(selected: &mut Vec<Selected>, bin: &Bin, merge_delta_e: f32) {
    for existing in selected.iter_mut() {
        if delta_e2000(existing.center, bin.center) < merge_delta_e {
            existing.count += bin.count;
            return;
        }
    }
    selected.push(Selected {
        center: bin.center,
        count: bin.count,
    });
}

/// Extracts dominant and accent color layers from a preprocessed image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorExtractor {
    config: ColorConfig,
}

impl ColorExtractor {
    /// Builds an extractor with the given configuration.
    #[must_use]
    pub fn new(config: ColorConfig) -> Self {
        Self { config }
    }

    /// Runs the extraction pipeline, returning one [`Feature`] per surviving
    /// color, ordered by decreasing pixel-coverage ratio.
    ///
    /// # Errors
    /// Returns [`ColorError::EmptyImage`] if `image` has no valid pixels.
    #[instrument(skip(self, image))]
    pub fn extract(&self, image: &Image) -> Result<FeatureCollection, ColorError> {
        self.extract_excluding_text(image, &[])
    }

    /// Runs the extraction pipeline, additionally excluding pixels under any
    /// OCR'd text quad from every color layer's mask before vectorization, so
    /// label glyphs don't get absorbed into the surrounding zone's polygon.
    ///
    /// # Errors
    /// Returns [`ColorError::EmptyImage`] if `image` has no valid pixels.
    #[instrument(skip(self, image, text_blocks))]
    pub fn extract_excluding_text(&self, image: &Image, text_blocks: &[OcrBlock]) -> Result<FeatureCollection, ColorError> {
        let total_valid = image.valid_count();
        if total_valid == 0 {
            return Err(ColorError::EmptyImage);
        }

        let lab = image.to_lab();
        let bins = quantize(&lab, &self.config);
        let selected = select_centers(&bins, &self.config, total_valid);
        debug!(bin_count = bins.len(), selected_count = selected.len(), "color bins quantized");

        let width = lab.width();
        let height = lab.height();
        let text_mask = rasterize_text_quads(width, height, text_blocks);
        let assignments: Vec<Option<usize>> = (0..lab.pixels().len())
            .into_par_iter()
            .map(|idx| {
                if !lab.mask()[idx] || text_mask[idx] {
                    return None;
                }
                let px = lab.pixels()[idx];
                let mut best_idx = None;
                let mut best_de = f32::INFINITY;
                for (i, s) in selected.iter().enumerate() {
                    let de = delta_e2000(px, s.center);
                    if de < best_de {
                        best_de = de;
                        best_idx = Some(i);
                    }
                }
                if best_de <= self.config.mask_delta_e {
                    best_idx
                } else {
                    None
                }
            })
            .collect();

        let mut used_names: HashMap<&'static str, usize> = HashMap::new();
        let mut features = Vec::new();
        for (i, s) in selected.iter().enumerate() {
            let mask: Vec<bool> = assignments.iter().map(|a| *a == Some(i)).collect();
            if let Some(feature) = zone_from_mask(s.center, &mask, width, height, total_valid, &mut used_names) {
                features.push(feature);
            }
        }

        if features.is_empty() {
            if let Some(top) = bins.first() {
                warn!(error = %ColorError::SelectionEmpty, "no layer survived selection, falling back to the single top bin");
                let mask: Vec<bool> = (0..lab.pixels().len()).map(|idx| lab.mask()[idx] && !text_mask[idx]).collect();
                if let Some(feature) = zone_from_mask(top.center, &mask, width, height, total_valid, &mut used_names) {
                    features.push(feature);
                }
            }
        }

        features.sort_by(|a, b| {
            let FeatureProperties::Zone { ratio: ra, .. } = &a.properties else { unreachable!() };
            let FeatureProperties::Zone { ratio: rb, .. } = &b.properties else { unreachable!() };
            rb.partial_cmp(ra).unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(FeatureCollection { features })
    }
}

/// Vectorizes `mask` and builds the `Zone` feature for it, or `None` if the
/// mask is empty or traces to no polygon. Shared by the per-center pass and
/// the [`ColorError::SelectionEmpty`] single-top-bin fallback.
fn zone_from_mask(
    center: [f32; 3],
    mask: &[bool],
    width: usize,
    height: usize,
    total_valid: usize,
    used_names: &mut HashMap<&'static str, usize>,
) -> Option<Feature> {
    let assigned_count = mask.iter().filter(|v| **v).count();
    if assigned_count == 0 {
        return None;
    }

    let components = trace_components(mask, width, height);
    let multi = components_to_multi_polygon(&components);
    if multi.0.is_empty() {
        return None;
    }

    let rgb_f = lab_to_srgb(center);
    let color_rgb = (
        (rgb_f[0].clamp(0.0, 1.0) * 255.0).round() as u8,
        (rgb_f[1].clamp(0.0, 1.0) * 255.0).round() as u8,
        (rgb_f[2].clamp(0.0, 1.0) * 255.0).round() as u8,
    );
    let color_hex = format!("#{:02x}{:02x}{:02x}", color_rgb.0, color_rgb.1, color_rgb.2);
    let base_name = names::nearest_name(color_rgb);
    let seen = used_names.entry(base_name).or_insert(0);
    *seen += 1;
    let color_name = if *seen == 1 {
        base_name.to_string()
    } else {
        format!("{base_name} {}", *seen)
    };

    let ratio = assigned_count as f64 / total_valid as f64;
    let common = CommonProps::new(color_name.clone());
    let properties = FeatureProperties::Zone {
        common,
        color_name,
        color_rgb,
        color_hex,
        ratio,
    };
    let geometry = FeatureGeometry::MultiPolygon(multi.clone());
    Some(match crate::geometry::normalize_to_unit_box(&multi) {
        Some(unit_box) => Feature::with_unit_box(geometry, FeatureGeometry::MultiPolygon(unit_box), properties),
        None => Feature::new(geometry, properties),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_color_image() -> Image {
        let width = 8;
        let height = 8;
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                if x < width / 2 {
                    pixels.push([1.0, 0.0, 0.0]);
                } else {
                    pixels.push([0.0, 0.0, 1.0]);
                }
            }
        }
        Image::new(width, height, pixels, vec![true; width * height])
    }

    #[test]
    fn two_solid_colors_yield_two_zones() {
        let extractor = ColorExtractor::default();
        let result = extractor.extract(&two_color_image()).unwrap();
        assert_eq!(result.features.len(), 2);
        for feature in &result.features {
            let FeatureProperties::Zone { ratio, .. } = &feature.properties else {
                panic!("expected zone");
            };
            assert!((*ratio - 0.5).abs() < 0.05);
        }
    }

    #[test]
    fn zones_carry_a_unit_box_normalized_polygon() {
        let extractor = ColorExtractor::default();
        let result = extractor.extract(&two_color_image()).unwrap();
        for feature in &result.features {
            let FeatureGeometry::MultiPolygon(unit_box) = feature.unit_box.as_ref().expect("zone carries a unit box") else {
                panic!("expected multi-polygon unit box");
            };
            let bbox = crate::geometry::multi_polygon_bbox(unit_box).expect("non-empty polygon has a bbox");
            assert!(bbox.min_x >= -1e-9 && bbox.max_x <= 1.0 + 1e-9);
            assert!(bbox.min_y >= -1e-9 && bbox.max_y <= 1.0 + 1e-9);
            let touches_a_side = bbox.min_x.abs() < 1e-6
                || bbox.min_y.abs() < 1e-6
                || (bbox.max_x - 1.0).abs() < 1e-6
                || (bbox.max_y - 1.0).abs() < 1e-6;
            assert!(touches_a_side, "unit box did not touch any side: {bbox:?}");
        }
    }

    #[test]
    fn empty_image_is_rejected() {
        let image = Image::new(2, 2, vec![[1.0, 1.0, 1.0]; 4], vec![false; 4]);
        let extractor = ColorExtractor::default();
        assert!(matches!(extractor.extract(&image), Err(ColorError::EmptyImage)));
    }

    #[test]
    fn text_quads_are_excluded_from_every_layer_mask() {
        let extractor = ColorExtractor::default();
        let text_blocks = vec![OcrBlock {
            quad: [(0, 0), (4, 0), (4, 4), (0, 4)],
            text: "label".into(),
            confidence: 0.9,
        }];
        let excluded_mask = rasterize_text_quads(8, 8, &text_blocks);
        assert!(excluded_mask[0]);
        assert!(!excluded_mask[8 * 7 + 7]);

        // The excluded corner falls inside the red half, so total assigned
        // coverage (ratio sums over the same valid-pixel denominator) shrinks
        // relative to running with no text blocks at all.
        let baseline = extractor.extract(&two_color_image()).unwrap();
        let excluding_text = extractor.extract_excluding_text(&two_color_image(), &text_blocks).unwrap();
        assert!(total_ratio(&excluding_text) < total_ratio(&baseline));
    }

    #[test]
    fn no_surviving_selection_falls_back_to_the_single_top_bin() {
        // Thresholds no bin can ever clear, so `select_centers` returns
        // nothing, yet the image plainly has a dominant color.
        let config = ColorConfig::builder().dominant_min_ratio(2.0).accent_min_ratio(2.0).build();
        let extractor = ColorExtractor::new(config);
        let result = extractor.extract(&two_color_image()).unwrap();
        assert_eq!(result.features.len(), 1);
        let FeatureProperties::Zone { ratio, .. } = &result.features[0].properties else {
            panic!("expected zone");
        };
        assert!((*ratio - 1.0).abs() < 1e-9, "fallback layer should cover every valid pixel, ratio was {ratio}");
    }

    fn total_ratio(collection: &FeatureCollection) -> f64 {
        collection
            .features
            .iter()
            .map(|f| match &f.properties {
                FeatureProperties::Zone { ratio, .. } => *ratio,
                _ => 0.0,
            })
            .sum()
    }
}
