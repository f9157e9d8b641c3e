//! In-memory image representations used across every stage.
//!
//! [`Image`] is the pipeline's native pixel format: row-major RGB floats in
//! `[0, 1]` plus a validity mask, the shape [`crate::loader::Loader`] produces
//! and [`crate::preprocess`] refines. [`LabImage`] is the CIELAB counterpart
//! the color extractor works in.

/// A 2-D grid of RGB triples (float in `[0, 1]`) plus a boolean validity mask
/// of the same dimensions.
///
/// Created by [`crate::loader::Loader`]; immutable after
/// [`crate::preprocess::preprocess`] returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    /// Row-major RGB triples, length `width * height`.
    pixels: Vec<[f32; 3]>,
    /// Row-major validity flags, length `width * height`.
    mask: Vec<bool>,
}

impl Image {
    /// Builds a new image from row-major pixel and mask buffers.
    ///
    /// # Panics
    /// Panics if `pixels.len() != width * height` or `mask.len() != width * height`.
    #[must_use]
    pub fn new(width: usize, height: usize, pixels: Vec<[f32; 3]>, mask: Vec<bool>) -> Self {
        assert_eq!(pixels.len(), width * height, "pixel buffer size mismatch");
        assert_eq!(mask.len(), width * height, "mask buffer size mismatch");
        Self {
            width,
            height,
            pixels,
            mask,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// Raw RGB pixel buffer, row-major.
    #[must_use]
    pub fn pixels(&self) -> &[[f32; 3]] {
        &self.pixels
    }

    /// Mutable access to the raw RGB pixel buffer.
    pub fn pixels_mut(&mut self) -> &mut [[f32; 3]] {
        &mut self.pixels
    }

    /// Raw validity mask, row-major.
    #[must_use]
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Mutable access to the raw validity mask.
    pub fn mask_mut(&mut self) -> &mut [bool] {
        &mut self.mask
    }

    /// The pixel at `(x, y)`, if in bounds.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y * self.width + x])
    }

    /// Whether `(x, y)` is a valid pixel.
    #[must_use]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.mask[y * self.width + x]
    }

    /// Number of valid pixels under the mask.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|v| **v).count()
    }

    /// True when no pixel is valid.
    #[must_use]
    pub fn is_empty_image(&self) -> bool {
        self.valid_count() == 0
    }

    /// Converts this image to CIELAB.
    #[must_use]
    pub fn to_lab(&self) -> LabImage {
        let lab = self
            .pixels
            .iter()
            .map(|rgb| srgb_to_lab(*rgb))
            .collect::<Vec<_>>();
        LabImage {
            width: self.width,
            height: self.height,
            pixels: lab,
            mask: self.mask.clone(),
        }
    }

    /// Converts this image to 8-bit grayscale values using ITU-R BT.601 luma weights.
    #[must_use]
    pub fn to_grayscale_u8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .map(|[r, g, b]| {
                let y = 0.299 * r + 0.587 * g + 0.114 * b;
                (y.clamp(0.0, 1.0) * 255.0).round() as u8
            })
            .collect()
    }
}

/// Same shape as [`Image`], pixel values in CIELAB (`L` in `[0, 100]`, `a`/`b`
/// in `[-128, 128]`).
#[derive(Debug, Clone, PartialEq)]
pub struct LabImage {
    width: usize,
    height: usize,
    pixels: Vec<[f32; 3]>,
    mask: Vec<bool>,
}

impl LabImage {
    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Raw LAB pixel buffer, row-major.
    #[must_use]
    pub fn pixels(&self) -> &[[f32; 3]] {
        &self.pixels
    }

    /// Raw validity mask, row-major.
    #[must_use]
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Iterates `(index, lab)` pairs for valid pixels only.
    pub fn valid_pixels(&self) -> impl Iterator<Item = (usize, [f32; 3])> + '_ {
        self.pixels
            .iter()
            .copied()
            .enumerate()
            .filter(move |(i, _)| self.mask[*i])
    }
}

/// sRGB D65 reference white in CIE XYZ.
const REF_X: f32 = 95.047;
const REF_Y: f32 = 100.0;
const REF_Z: f32 = 108.883;

pub(crate) fn srgb_channel_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Converts a single sRGB-ish `[0,1]` triple to CIELAB.
#[must_use]
pub fn srgb_to_lab([r, g, b]: [f32; 3]) -> [f32; 3] {
    let r = srgb_channel_to_linear(r);
    let g = srgb_channel_to_linear(g);
    let b = srgb_channel_to_linear(b);

    // sRGB -> XYZ (D65)
    let x = (r * 0.4124 + g * 0.3576 + b * 0.1805) * 100.0;
    let y = (r * 0.2126 + g * 0.7152 + b * 0.0722) * 100.0;
    let z = (r * 0.0193 + g * 0.1192 + b * 0.9505) * 100.0;

    let xr = x / REF_X;
    let yr = y / REF_Y;
    let zr = z / REF_Z;

    let f = |t: f32| -> f32 {
        const DELTA: f32 = 6.0 / 29.0;
        if t > DELTA.powi(3) {
            t.cbrt()
        } else {
            t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
        }
    };

    let fx = f(xr);
    let fy = f(yr);
    let fz = f(zr);

    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let bb = 200.0 * (fy - fz);
    [l, a, bb]
}

/// Converts a single CIELAB triple back to an approximate sRGB `[0,1]` triple,
/// clamped to range. Used only for naming/debug purposes (bin-center -> RGB).
#[must_use]
pub fn lab_to_srgb([l, a, b]: [f32; 3]) -> [f32; 3] {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    const DELTA: f32 = 6.0 / 29.0;
    let finv = |t: f32| -> f32 {
        if t > DELTA {
            t.powi(3)
        } else {
            3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
        }
    };

    let x = REF_X * finv(fx);
    let y = REF_Y * finv(fy);
    let z = REF_Z * finv(fz);

    let xr = x / 100.0;
    let yr = y / 100.0;
    let zr = z / 100.0;

    let r = xr * 3.2406 + yr * -1.5372 + zr * -0.4986;
    let g = xr * -0.9689 + yr * 1.8758 + zr * 0.0415;
    let b2 = xr * 0.0557 + yr * -0.2040 + zr * 1.0570;

    let gamma = |c: f32| -> f32 {
        let c = c.clamp(0.0, 1.0);
        if c <= 0.003_130_8 {
            12.92 * c
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        }
    };

    [gamma(r), gamma(g), gamma(b2)]
}

/// CIEDE2000 color-difference metric between two LAB triples.
///
/// Perceptually uniform; used throughout [`crate::color`] for bin merging,
/// selection, and exclusive pixel assignment.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn delta_e2000(lab1: [f32; 3], lab2: [f32; 3]) -> f32 {
    let (l1, a1, b1) = (f64::from(lab1[0]), f64::from(lab1[1]), f64::from(lab1[2]));
    let (l2, a2, b2) = (f64::from(lab2[0]), f64::from(lab2[1]), f64::from(lab2[2]));

    let c1 = (a1 * a1 + b1 * b1).sqrt();
    let c2 = (a2 * a2 + b2 * b2).sqrt();
    let c_bar = (c1 + c2) / 2.0;

    let g = 0.5 * (1.0 - (c_bar.powi(7) / (c_bar.powi(7) + 25.0_f64.powi(7))).sqrt());
    let a1p = a1 * (1.0 + g);
    let a2p = a2 * (1.0 + g);

    let c1p = (a1p * a1p + b1 * b1).sqrt();
    let c2p = (a2p * a2p + b2 * b2).sqrt();

    let h1p = if a1p == 0.0 && b1 == 0.0 {
        0.0
    } else {
        b1.atan2(a1p).to_degrees().rem_euclid(360.0)
    };
    let h2p = if a2p == 0.0 && b2 == 0.0 {
        0.0
    } else {
        b2.atan2(a2p).to_degrees().rem_euclid(360.0)
    };

    let delta_lp = l2 - l1;
    let delta_cp = c2p - c1p;

    let delta_hp = if c1p * c2p == 0.0 {
        0.0
    } else {
        let diff = h2p - h1p;
        if diff.abs() <= 180.0 {
            diff
        } else if diff > 180.0 {
            diff - 360.0
        } else {
            diff + 360.0
        }
    };
    let delta_big_hp = 2.0 * (c1p * c2p).sqrt() * (delta_hp.to_radians() / 2.0).sin();

    let l_bar_p = (l1 + l2) / 2.0;
    let c_bar_p = (c1p + c2p) / 2.0;

    let h_bar_p = if c1p * c2p == 0.0 {
        h1p + h2p
    } else if (h1p - h2p).abs() <= 180.0 {
        (h1p + h2p) / 2.0
    } else if h1p + h2p < 360.0 {
        (h1p + h2p + 360.0) / 2.0
    } else {
        (h1p + h2p - 360.0) / 2.0
    };

    let t = 1.0 - 0.17 * (h_bar_p - 30.0).to_radians().cos()
        + 0.24 * (2.0 * h_bar_p).to_radians().cos()
        + 0.32 * (3.0 * h_bar_p + 6.0).to_radians().cos()
        - 0.20 * (4.0 * h_bar_p - 63.0).to_radians().cos();

    let delta_theta = 30.0 * (-((h_bar_p - 275.0) / 25.0).powi(2)).exp();
    let r_c = 2.0 * (c_bar_p.powi(7) / (c_bar_p.powi(7) + 25.0_f64.powi(7))).sqrt();
    let s_l = 1.0 + (0.015 * (l_bar_p - 50.0).powi(2)) / (20.0 + (l_bar_p - 50.0).powi(2)).sqrt();
    let s_c = 1.0 + 0.045 * c_bar_p;
    let s_h = 1.0 + 0.015 * c_bar_p * t;
    let r_t = -(2.0 * delta_theta.to_radians()).sin() * r_c;

    let k_l = 1.0;
    let k_c = 1.0;
    let k_h = 1.0;

    let term_l = delta_lp / (k_l * s_l);
    let term_c = delta_cp / (k_c * s_c);
    let term_h = delta_big_hp / (k_h * s_h);

    (term_l * term_l + term_c * term_c + term_h * term_h + r_t * term_c * term_h)
        .max(0.0)
        .sqrt() as f32
}
