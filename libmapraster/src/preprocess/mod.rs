//! Scan-cleanup pipeline run once, after loading and before any extraction
//! stage, to undo the optical and photometric artifacts that scanned paper
//! maps share: gamma-encoded pixel values, uneven illumination, a warm or
//! cool color cast from the scanner lamp, sensor noise, and low local
//! contrast in faded regions.
//!
//! Operations run in a fixed order, each individually toggleable via
//! [`PreprocessConfig`]: linearize, flat-field correction, white balance,
//! denoise, CLAHE, percentile normalization, and finally the paper mask.
//! Each step only touches pixels already marked valid; none of them can
//! make an invalid pixel valid again.

use tracing::{debug, instrument};

use crate::image::{delta_e2000, srgb_channel_to_linear, Image};

/// Tunable parameters for [`preprocess`]. Every operation defaults on; set
/// the corresponding flag to `false` to skip it.
#[derive(Debug, Clone, Copy, bon::Builder)]
pub struct PreprocessConfig {
    /// Undo the sRGB gamma curve before any other photometric operation.
    #[builder(default = true)]
    pub linearize: bool,
    /// Divide by a wide blur of the image's luminance to correct uneven
    /// illumination (vignetting, scanner bed lighting gradients).
    #[builder(default = true)]
    pub flat_field: bool,
    /// Gaussian-blur sigma, in pixels, used to estimate the illumination
    /// field for flat-field correction.
    #[builder(default = 100.0)]
    pub flat_field_sigma_px: f64,
    /// Rescale each channel so its high-percentile value maps to white.
    #[builder(default = true)]
    pub white_balance: bool,
    /// Percentile (0-100) used as the white-balance reference point.
    #[builder(default = 99.5)]
    pub white_balance_percentile: f64,
    /// Edge-preserving bilateral smoothing to suppress scan noise.
    #[builder(default = true)]
    pub denoise: bool,
    /// Bilateral filter window radius, in pixels.
    #[builder(default = 2)]
    pub denoise_radius: i32,
    /// Bilateral filter spatial-domain sigma, in pixels.
    #[builder(default = 3.0)]
    pub denoise_sigma_spatial: f64,
    /// Bilateral filter range-domain sigma, in normalized `[0, 1]` color units.
    #[builder(default = 0.08)]
    pub denoise_sigma_range: f64,
    /// Contrast-limited adaptive histogram equalization on the CIELAB `L`
    /// channel.
    #[builder(default = true)]
    pub clahe: bool,
    /// CLAHE tile grid dimension (an `n x n` grid of tiles).
    #[builder(default = 8)]
    pub clahe_tiles: usize,
    /// CLAHE clip limit, as a multiple of the uniform per-bin average count.
    #[builder(default = 2.0)]
    pub clahe_clip_limit: f32,
    /// Final linear contrast stretch against low/high percentiles.
    #[builder(default = true)]
    pub percentile_normalize: bool,
    /// Low percentile (0-100) mapped to 0.
    #[builder(default = 1.0)]
    pub percentile_low: f64,
    /// High percentile (0-100) mapped to 1.
    #[builder(default = 99.0)]
    pub percentile_high: f64,
    /// Excludes the border-connected background region (scanner bed, desk,
    /// margin outside the physical page) from the validity mask.
    #[builder(default = true)]
    pub paper_mask: bool,
    /// CIEDE2000 threshold used to grow the background region from the
    /// image border.
    #[builder(default = 10.0)]
    pub paper_mask_delta_e: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs the scan-cleanup pipeline over `image`, returning a new [`Image`]
/// with the same dimensions.
#[instrument(skip(image, config))]
#[must_use]
pub fn preprocess(image: &Image, config: &PreprocessConfig) -> Image {
    let mut current = image.clone();

    if config.linearize {
        linearize(&mut current);
        debug!("linearized");
    }
    if config.flat_field {
        flat_field(&mut current, config.flat_field_sigma_px);
        debug!("flat-field corrected");
    }
    if config.white_balance {
        white_balance(&mut current, config.white_balance_percentile);
        debug!("white balanced");
    }
    if config.denoise {
        current = denoise(&current, config.denoise_radius, config.denoise_sigma_spatial, config.denoise_sigma_range);
        debug!("denoised");
    }
    if config.clahe {
        current = clahe(&current, config.clahe_tiles, config.clahe_clip_limit);
        debug!("clahe applied");
    }
    if config.percentile_normalize {
        percentile_normalize(&mut current, config.percentile_low, config.percentile_high);
        debug!("percentile normalized");
    }
    if config.paper_mask {
        apply_paper_mask(&mut current, config.paper_mask_delta_e);
        debug!(valid = current.valid_count(), "paper mask applied");
    }

    current
}

fn linearize(image: &mut Image) {
    for px in image.pixels_mut() {
        for c in px.iter_mut() {
            *c = srgb_channel_to_linear(*c);
        }
    }
}

fn flat_field(image: &mut Image, sigma_px: f64) {
    let width = image.width();
    let height = image.height();
    let mask = image.mask().to_vec();
    let luminance: Vec<f32> = image.pixels().iter().map(|[r, g, b]| 0.299 * r + 0.587 * g + 0.114 * b).collect();

    let blurred = repeated_box_blur(&luminance, &mask, width, height, sigma_px);
    let mean_blurred: f32 = {
        let valid: Vec<f32> = blurred.iter().zip(&mask).filter(|(_, m)| **m).map(|(v, _)| *v).collect();
        if valid.is_empty() {
            1.0
        } else {
            valid.iter().sum::<f32>() / valid.len() as f32
        }
    };

    for (idx, px) in image.pixels_mut().iter_mut().enumerate() {
        if !mask[idx] {
            continue;
        }
        let field = (blurred[idx] / mean_blurred.max(1e-6)).max(0.05);
        for c in px.iter_mut() {
            *c = (*c / field).clamp(0.0, 1.0);
        }
    }
}

/// Three passes of box blur, with a radius chosen per Kovesi's
/// near-Gaussian approximation, approximate a true Gaussian blur cheaply.
fn repeated_box_blur(values: &[f32], mask: &[bool], width: usize, height: usize, sigma: f64) -> Vec<f32> {
    let radius = box_blur_radius_for_sigma(sigma, 3);
    let mut current = values.to_vec();
    for _ in 0..3 {
        current = box_blur_2d(&current, mask, width, height, radius);
    }
    current
}

fn box_blur_radius_for_sigma(sigma: f64, passes: u32) -> usize {
    if sigma <= 0.0 {
        return 0;
    }
    let ideal_width = (12.0 * sigma * sigma / f64::from(passes) + 1.0).sqrt();
    let mut width_l = ideal_width.floor() as i64;
    if width_l % 2 == 0 {
        width_l -= 1;
    }
    width_l = width_l.max(1);
    ((width_l - 1) / 2) as usize
}

fn box_blur_2d(values: &[f32], mask: &[bool], width: usize, height: usize, radius: usize) -> Vec<f32> {
    if radius == 0 {
        return values.to_vec();
    }
    let masked: Vec<f32> = values.iter().zip(mask).map(|(v, m)| if *m { *v } else { 0.0 }).collect();
    let counts: Vec<f32> = mask.iter().map(|m| if *m { 1.0 } else { 0.0 }).collect();

    let (h_sum, h_count) = box_blur_1d(&masked, &counts, width, height, radius, true);
    let (v_sum, v_count) = box_blur_1d(&h_sum, &h_count, width, height, radius, false);

    v_sum.iter().zip(&v_count).map(|(s, c)| if *c > 0.0 { s / c } else { 0.0 }).collect()
}

fn box_blur_1d(values: &[f32], counts: &[f32], width: usize, height: usize, radius: usize, horizontal: bool) -> (Vec<f32>, Vec<f32>) {
    let mut out_v = vec![0.0f32; values.len()];
    let mut out_c = vec![0.0f32; values.len()];
    let (outer, inner) = if horizontal { (height, width) } else { (width, height) };

    for o in 0..outer {
        let idx_of = |i: usize| -> usize {
            if horizontal {
                o * width + i
            } else {
                i * width + o
            }
        };

        let mut sum_v = 0.0f32;
        let mut sum_c = 0.0f32;
        let first_end = radius.min(inner.saturating_sub(1));
        for i in 0..=first_end {
            sum_v += values[idx_of(i)];
            sum_c += counts[idx_of(i)];
        }
        for i in 0..inner {
            let idx = idx_of(i);
            out_v[idx] = sum_v;
            out_c[idx] = sum_c;
            if i + 1 < inner {
                let remove = i as i64 - radius as i64;
                if remove >= 0 {
                    let r = idx_of(remove as usize);
                    sum_v -= values[r];
                    sum_c -= counts[r];
                }
                let add = i + 1 + radius;
                if add < inner {
                    let a = idx_of(add);
                    sum_v += values[a];
                    sum_c += counts[a];
                }
            }
        }
    }

    (out_v, out_c)
}

fn percentile(values: &mut [f32], p: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let rank = ((p / 100.0) * (values.len() - 1) as f64).round().clamp(0.0, (values.len() - 1) as f64);
    values[rank as usize]
}

fn white_balance(image: &mut Image, pct: f64) {
    let mask = image.mask().to_vec();
    for channel in 0..3 {
        let mut values: Vec<f32> = image
            .pixels()
            .iter()
            .zip(&mask)
            .filter(|(_, m)| **m)
            .map(|(px, _)| px[channel])
            .collect();
        if values.is_empty() {
            continue;
        }
        let reference = percentile(&mut values, pct).max(1e-4);
        for (idx, px) in image.pixels_mut().iter_mut().enumerate() {
            if mask[idx] {
                px[channel] = (px[channel] / reference).clamp(0.0, 1.0);
            }
        }
    }
}

fn denoise(image: &Image, radius: i32, sigma_spatial: f64, sigma_range: f64) -> Image {
    let width = image.width();
    let height = image.height();
    let mask = image.mask().to_vec();
    let pixels = image.pixels();

    let spatial_weight = |dx: i32, dy: i32| -> f64 {
        let d2 = f64::from(dx * dx + dy * dy);
        (-d2 / (2.0 * sigma_spatial * sigma_spatial)).exp()
    };
    let range_weight = |d2: f64| -> f64 { (-d2 / (2.0 * sigma_range * sigma_range)).exp() };

    let mut out = pixels.to_vec();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if !mask[idx] {
                continue;
            }
            let center = pixels[idx];
            let mut acc = [0.0f64; 3];
            let mut weight_sum = 0.0f64;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (nx, ny) = (x as i64 + i64::from(dx), y as i64 + i64::from(dy));
                    if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                        continue;
                    }
                    let nidx = ny as usize * width + nx as usize;
                    if !mask[nidx] {
                        continue;
                    }
                    let neighbor = pixels[nidx];
                    let color_d2: f64 = (0..3)
                        .map(|c| f64::from(neighbor[c] - center[c]).powi(2))
                        .sum();
                    let w = spatial_weight(dx, dy) * range_weight(color_d2);
                    for c in 0..3 {
                        acc[c] += w * f64::from(neighbor[c]);
                    }
                    weight_sum += w;
                }
            }
            if weight_sum > 0.0 {
                for c in 0..3 {
                    out[idx][c] = (acc[c] / weight_sum) as f32;
                }
            }
        }
    }

    Image::new(width, height, out, mask)
}

fn clahe(image: &Image, tiles: usize, clip_limit: f32) -> Image {
    let width = image.width();
    let height = image.height();
    let mask = image.mask().to_vec();
    let tiles = tiles.max(1);

    let lab = image.to_lab();
    let l_values: Vec<f32> = lab.pixels().iter().map(|[l, _, _]| *l).collect();

    const BINS: usize = 256;
    let tile_w = width.div_ceil(tiles).max(1);
    let tile_h = height.div_ceil(tiles).max(1);
    let tiles_x = width.div_ceil(tile_w).max(1);
    let tiles_y = height.div_ceil(tile_h).max(1);

    // Per-tile cumulative mapping: bin index -> equalized L value in [0, 100].
    let mut luts = vec![vec![0.0f32; BINS]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; BINS];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    let idx = y * width + x;
                    if !mask[idx] {
                        continue;
                    }
                    let bin = l_to_bin(l_values[idx]);
                    hist[bin] += 1;
                    count += 1;
                }
            }

            if count > 0 {
                let clip = (clip_limit * count as f32 / BINS as f32).max(1.0) as u32;
                let mut excess = 0u32;
                for h in &mut hist {
                    if *h > clip {
                        excess += *h - clip;
                        *h = clip;
                    }
                }
                let redistribute = excess / BINS as u32;
                for h in &mut hist {
                    *h += redistribute;
                }
            }

            let lut = &mut luts[ty * tiles_x + tx];
            let mut cdf = 0u32;
            for (bin, count_in_bin) in hist.iter().enumerate() {
                cdf += count_in_bin;
                lut[bin] = if count > 0 { (cdf as f32 / count as f32) * 100.0 } else { bin_to_l(bin) };
            }
        }
    }

    let mut out_pixels = image.pixels().to_vec();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if !mask[idx] {
                continue;
            }
            let bin = l_to_bin(l_values[idx]);

            // Bilinear-interpolate between the up-to-4 nearest tile LUTs.
            let fx = (x as f64 + 0.5) / tile_w as f64 - 0.5;
            let fy = (y as f64 + 0.5) / tile_h as f64 - 0.5;
            let tx0 = fx.floor().clamp(0.0, (tiles_x - 1) as f64) as usize;
            let ty0 = fy.floor().clamp(0.0, (tiles_y - 1) as f64) as usize;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let ty1 = (ty0 + 1).min(tiles_y - 1);
            let wx = (fx - tx0 as f64).clamp(0.0, 1.0) as f32;
            let wy = (fy - ty0 as f64).clamp(0.0, 1.0) as f32;

            let v00 = luts[ty0 * tiles_x + tx0][bin];
            let v10 = luts[ty0 * tiles_x + tx1][bin];
            let v01 = luts[ty1 * tiles_x + tx0][bin];
            let v11 = luts[ty1 * tiles_x + tx1][bin];
            let new_l = v00 * (1.0 - wx) * (1.0 - wy) + v10 * wx * (1.0 - wy) + v01 * (1.0 - wx) * wy + v11 * wx * wy;

            let [_, a, b] = lab.pixels()[idx];
            out_pixels[idx] = crate::image::lab_to_srgb([new_l, a, b]);
        }
    }

    Image::new(width, height, out_pixels, mask)
}

fn l_to_bin(l: f32) -> usize {
    ((l.clamp(0.0, 100.0) / 100.0) * 255.0).round() as usize
}

fn bin_to_l(bin: usize) -> f32 {
    (bin as f32 / 255.0) * 100.0
}

fn percentile_normalize(image: &mut Image, low: f64, high: f64) {
    let mask = image.mask().to_vec();
    for channel in 0..3 {
        let mut values: Vec<f32> = image
            .pixels()
            .iter()
            .zip(&mask)
            .filter(|(_, m)| **m)
            .map(|(px, _)| px[channel])
            .collect();
        if values.is_empty() {
            continue;
        }
        let lo = percentile(&mut values.clone(), low);
        let hi = percentile(&mut values, high);
        let span = (hi - lo).max(1e-6);
        for (idx, px) in image.pixels_mut().iter_mut().enumerate() {
            if mask[idx] {
                px[channel] = ((px[channel] - lo) / span).clamp(0.0, 1.0);
            }
        }
    }
}

/// Flood-fills from the image border, growing through pixels within
/// `delta_e` of the dominant border color, and marks that region invalid.
///
/// The dominant border color is the mean LAB of the border ring, a
/// reasonable stand-in for "the scanner bed / desk / margin surrounding the
/// physical page" without requiring a separate background classifier.
fn apply_paper_mask(image: &mut Image, delta_e_threshold: f32) {
    let width = image.width();
    let height = image.height();
    if width == 0 || height == 0 {
        return;
    }
    let lab = image.to_lab();

    let mut border_coords = Vec::new();
    for x in 0..width {
        border_coords.push((x, 0));
        border_coords.push((x, height - 1));
    }
    for y in 0..height {
        border_coords.push((0, y));
        border_coords.push((width - 1, y));
    }

    let valid_border: Vec<[f32; 3]> = border_coords
        .iter()
        .filter(|&&(x, y)| image.is_valid(x, y))
        .map(|&(x, y)| lab.pixels()[y * width + x])
        .collect();
    if valid_border.is_empty() {
        return;
    }
    let n = valid_border.len() as f32;
    let mean_lab = valid_border.iter().fold([0.0f32; 3], |acc, lab| [acc[0] + lab[0] / n, acc[1] + lab[1] / n, acc[2] + lab[2] / n]);

    let mut background = vec![false; width * height];
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for &(x, y) in &border_coords {
        let idx = y * width + x;
        if !image.is_valid(x, y) || background[idx] {
            continue;
        }
        if delta_e2000(lab.pixels()[idx], mean_lab) <= delta_e_threshold {
            background[idx] = true;
            stack.push((x, y));
        }
    }
    while let Some((x, y)) = stack.pop() {
        for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            let nidx = ny * width + nx;
            if background[nidx] || !image.is_valid(nx, ny) {
                continue;
            }
            if delta_e2000(lab.pixels()[nidx], mean_lab) <= delta_e_threshold {
                background[nidx] = true;
                stack.push((nx, ny));
            }
        }
    }

    for (idx, bg) in background.iter().enumerate() {
        if *bg {
            image.mask_mut()[idx] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_image(width: usize, height: usize, rgb: [f32; 3]) -> Image {
        Image::new(width, height, vec![rgb; width * height], vec![true; width * height])
    }

    #[test]
    fn linearize_darkens_midtones() {
        let mut image = solid_image(2, 2, [0.5, 0.5, 0.5]);
        linearize(&mut image);
        assert!(image.pixels()[0][0] < 0.5);
    }

    #[test]
    fn white_balance_maps_reference_percentile_to_white() {
        let mut image = solid_image(4, 4, [0.5, 0.4, 0.3]);
        white_balance(&mut image, 99.5);
        for px in image.pixels() {
            assert!((px[0] - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn percentile_normalize_stretches_range() {
        let mut pixels = vec![[0.2, 0.2, 0.2]; 10];
        pixels[0] = [0.0, 0.0, 0.0];
        pixels[9] = [1.0, 1.0, 1.0];
        let mut image = Image::new(10, 1, pixels, vec![true; 10]);
        percentile_normalize(&mut image, 10.0, 90.0);
        // interior values should land near the middle of the stretched range
        assert!(image.pixels()[1][0] > 0.0 && image.pixels()[1][0] < 1.0);
    }

    #[test]
    fn paper_mask_removes_border_connected_uniform_background() {
        // A 6x6 white border around a darker 4x4 interior: the border should
        // be masked out, the interior should remain valid.
        let mut pixels = vec![[1.0, 1.0, 1.0]; 36];
        for y in 1..5 {
            for x in 1..5 {
                pixels[y * 6 + x] = [0.1, 0.1, 0.1];
            }
        }
        let mut image = Image::new(6, 6, pixels, vec![true; 36]);
        apply_paper_mask(&mut image, 10.0);
        assert!(!image.is_valid(0, 0));
        assert!(image.is_valid(3, 3));
    }

    #[test]
    fn denoise_preserves_dimensions_and_validity() {
        let image = solid_image(5, 5, [0.3, 0.4, 0.5]);
        let out = denoise(&image, 1, 2.0, 0.1);
        assert_eq!(out.width(), 5);
        assert_eq!(out.valid_count(), 25);
    }

    #[test]
    fn clahe_preserves_dimensions() {
        let image = solid_image(8, 8, [0.3, 0.4, 0.5]);
        let out = clahe(&image, 2, 2.0);
        assert_eq!(out.width(), 8);
        assert_eq!(out.height(), 8);
    }
}
