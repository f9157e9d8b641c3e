//! Decodes uploaded image bytes into the pipeline's native [`Image`] form.

use image::{DynamicImage, GenericImageView};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::image::Image;

/// Extensions the loader will accept, matched case-insensitively and without
/// the leading dot.
pub const ACCEPTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp", "ppm", "pgm", "pbm",
];

/// Default maximum accepted upload size (10 MiB).
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Errors raised while decoding an uploaded map image.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LoaderError {
    /// The declared extension is not in [`ACCEPTED_EXTENSIONS`].
    #[error("unsupported file extension: {0}")]
    UnsupportedFormat(String),

    /// The byte buffer exceeds the configured maximum size.
    #[error("file exceeds maximum accepted size: {size} > {max}")]
    TooLarge {
        /// Size of the buffer, in bytes.
        size: usize,
        /// The configured maximum, in bytes.
        max: usize,
    },

    /// The bytes could not be decoded as an image of the declared format.
    #[error("failed to decode image: {0}")]
    DecodeFailure(#[from] image::ImageError),
}

/// Decodes raw bytes plus a declared extension into an [`Image`].
#[derive(Debug, Clone, bon::Builder)]
pub struct Loader {
    /// Maximum accepted byte-buffer size.
    #[builder(default = DEFAULT_MAX_BYTES)]
    max_bytes: usize,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl Loader {
    /// Decodes `bytes` (declared as `extension`, without the leading dot) into
    /// an [`Image`].
    ///
    /// For 4-channel input, composes over an opaque white background using
    /// the alpha channel as weight, then drops alpha; the validity mask is
    /// `alpha > 0`. For grayscale input, replicates into three channels with
    /// validity set to all-true.
    ///
    /// # Errors
    /// Returns [`LoaderError::UnsupportedFormat`] if `extension` is not
    /// accepted, [`LoaderError::TooLarge`] if `bytes` exceeds
    /// [`Self::max_bytes`], and [`LoaderError::DecodeFailure`] if the bytes
    /// cannot be decoded.
    #[instrument(skip(self, bytes))]
    pub fn load(&self, bytes: &[u8], extension: &str) -> Result<Image, LoaderError> {
        let normalized = extension.trim_start_matches('.').to_ascii_lowercase();
        if !ACCEPTED_EXTENSIONS.contains(&normalized.as_str()) {
            return Err(LoaderError::UnsupportedFormat(normalized));
        }
        if bytes.len() > self.max_bytes {
            return Err(LoaderError::TooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        let dynamic = image::load_from_memory(bytes)?;
        debug!(width = dynamic.width(), height = dynamic.height(), "decoded image");
        Ok(dynamic_to_image(&dynamic))
    }
}

fn dynamic_to_image(dynamic: &DynamicImage) -> Image {
    let (width, height) = dynamic.dimensions();
    let (width, height) = (width as usize, height as usize);
    let mut pixels = Vec::with_capacity(width * height);
    let mut mask = Vec::with_capacity(width * height);

    let rgba = dynamic.to_rgba8();
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = f32::from(a) / 255.0;
        // Compose over opaque white using alpha as weight, then drop alpha.
        let composite = |channel: u8| -> f32 {
            let c = f32::from(channel) / 255.0;
            c * alpha + 1.0 * (1.0 - alpha)
        };
        pixels.push([composite(r), composite(g), composite(b)]);
        mask.push(a > 0);
    }

    // Grayscale/RGB sources decode to fully-opaque RGBA via `to_rgba8`, so the
    // alpha-derived mask above is already all-true for them; no special case
    // is required.
    Image::new(width, height, pixels, mask)
}
