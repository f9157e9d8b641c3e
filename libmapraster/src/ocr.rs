//! The OCR adapter boundary: language-code validation plus the shape of
//! recognized text blocks the text/place resolver consumes.

use thiserror::Error;

/// The fixed set of language codes the external OCR engine accepts.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "abq", "ady", "af", "ang", "ar", "as", "ava", "az", "be", "bg", "bh", "bho", "bn", "bs",
    "ch_sim", "ch_tra", "che", "cs", "cy", "da", "dar", "de", "en", "es", "et", "fa", "fr", "ga",
    "gom", "hi", "hr", "hu", "id", "inh", "is", "it", "ja", "kbd", "kn", "ko", "ku", "la", "lbe",
    "lez", "lt", "lv", "mah", "mai", "mi", "mn", "mr", "ms", "mt", "ne", "new", "nl", "no", "oc",
    "pi", "pl", "pt", "ro", "ru", "rs_cyrillic", "rs_latin", "sck", "sk", "sl", "sq", "sv", "sw",
    "ta", "tab", "te", "th", "tjk", "tl", "tr", "ug", "uk", "ur", "uz", "vi",
];

/// A quad of four pixel corners, in the order the OCR engine returns them.
pub type Quad = [(i32, i32); 4];

/// One recognized text block.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrBlock {
    /// The four-corner pixel quadrilateral bounding the text.
    pub quad: Quad,
    /// The recognized text.
    pub text: String,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f64,
}

impl OcrBlock {
    /// Axis-aligned bounding box of [`Self::quad`], as `(x, y, w, h)`.
    #[must_use]
    pub fn bbox(&self) -> (i32, i32, i32, i32) {
        let xs = self.quad.iter().map(|(x, _)| *x);
        let ys = self.quad.iter().map(|(_, y)| *y);
        let min_x = xs.clone().min().unwrap_or_default();
        let max_x = xs.max().unwrap_or_default();
        let min_y = ys.clone().min().unwrap_or_default();
        let max_y = ys.max().unwrap_or_default();
        (min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

/// Errors from language validation or the external OCR engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OcrError {
    /// A requested language code is not in [`SUPPORTED_LANGUAGES`].
    #[error("invalid OCR language code: {0}")]
    InvalidLanguageCode(String),

    /// The external OCR adapter could not be reached or failed internally.
    /// This makes the text stage skip rather than fail the job.
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
}

/// Validates every requested language code against [`SUPPORTED_LANGUAGES`].
///
/// # Errors
/// Returns [`OcrError::InvalidLanguageCode`] for the first code not in the
/// fixed set.
pub fn check_language_codes(languages: &[String]) -> Result<(), OcrError> {
    for code in languages {
        if !SUPPORTED_LANGUAGES.contains(&code.as_str()) {
            return Err(OcrError::InvalidLanguageCode(code.clone()));
        }
    }
    Ok(())
}

/// The external OCR engine's interface, as seen by the core.
///
/// The core validates language codes via [`check_language_codes`] before ever
/// calling this trait.
pub trait OcrAdapter {
    /// Recognizes text in `image`, restricted to `languages`.
    ///
    /// # Errors
    /// Returns [`OcrError::Unavailable`] if the engine cannot process the
    /// request.
    fn recognize(
        &self,
        image: &crate::image::Image,
        languages: &[String],
    ) -> Result<Vec<OcrBlock>, OcrError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_codes() {
        assert!(check_language_codes(&["en".to_string(), "fr".to_string()]).is_ok());
    }

    #[test]
    fn rejects_unknown_codes() {
        let err = check_language_codes(&["xx".to_string()]).unwrap_err();
        assert!(matches!(err, OcrError::InvalidLanguageCode(code) if code == "xx"));
    }

    #[test]
    fn bbox_of_axis_aligned_quad() {
        let block = OcrBlock {
            quad: [(0, 0), (100, 0), (100, 30), (0, 30)],
            text: "Montreal".into(),
            confidence: 0.9,
        };
        assert_eq!(block.bbox(), (0, 0, 100, 30));
    }
}
