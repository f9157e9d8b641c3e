//! Text detection → tokenization → gazetteer resolution.
//!
//! A greedy longest-n-gram scan over word tokens, each candidate phrase
//! normalized (NFKD, strip combining marks, casefold) before an exact
//! lookup against the gazetteer.

use regex::Regex;
use thiserror::Error;
use tracing::{instrument, warn};
use unicode_normalization::UnicodeNormalization;

use crate::feature::{CommonProps, Feature, FeatureCollection, FeatureGeometry, FeatureProperties};
use crate::ocr::{OcrAdapter, OcrBlock, OcrError};
use crate::resources::GazetteerAdapter;

/// Longest phrase (in tokens) considered as a single gazetteer lookup when
/// the n-gram phase is enabled via [`TextConfig::max_ngram`].
pub const MAX_NGRAM_WINDOW: usize = 4;

/// Errors from the text/place resolution stage.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TextError {
    /// A requested OCR language code was invalid.
    #[error(transparent)]
    InvalidLanguage(#[from] OcrError),
}

/// Tunable parameters for [`TextResolver`].
#[derive(Debug, Clone, Copy, bon::Builder)]
pub struct TextConfig {
    /// Longest phrase, in tokens, considered as one gazetteer lookup.
    /// Defaults to 1 (single-token lookups only); the multi-token n-gram
    /// phase is opt-in per spec, since it's prone to spurious long-phrase
    /// matches on noisy OCR output. Set to [`MAX_NGRAM_WINDOW`] to enable
    /// windows of up to 4 consecutive tokens.
    #[builder(default = 1)]
    pub max_ngram: usize,
    /// Whether an OCR failure should be treated as "the stage produced no
    /// features" rather than a job-terminating error.
    #[builder(default = true)]
    pub tolerate_ocr_failure: bool,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Normalizes a token the way the gazetteer's keys are normalized: NFKD
/// decomposition, combining-mark removal, then Unicode casefolding.
#[must_use]
pub fn normalize_token(token: &str) -> String {
    token
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

fn word_regex() -> Regex {
    Regex::new(r"[\w\-']+").expect("static word pattern is valid")
}

/// A candidate phrase scanned out of recognized text, with the resolved
/// gazetteer candidates (if any).
#[derive(Debug, Clone)]
struct Match {
    phrase: String,
    lon: f64,
    lat: f64,
    found: bool,
    confidence: f64,
}

/// Resolves OCR-recognized text blocks into place-name features.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextResolver {
    config: TextConfig,
}

impl TextResolver {
    /// Builds a resolver with the given configuration.
    #[must_use]
    pub fn new(config: TextConfig) -> Self {
        Self { config }
    }

    /// Runs OCR over `image`, then resolves each recognized block's text
    /// against the gazetteer, emitting one [`Feature`] per resolved phrase
    /// (including unresolved ones, flagged `found: false`, so a caller can
    /// see what text was seen but not matched).
    ///
    /// An OCR engine failure yields an empty collection rather than
    /// propagating when [`TextConfig::tolerate_ocr_failure`] is set (the
    /// default).
    ///
    /// # Errors
    /// Returns [`TextError::InvalidLanguage`] if any requested language code
    /// is invalid.
    #[instrument(skip(self, image, ocr, gazetteer))]
    pub fn resolve(
        &self,
        image: &crate::image::Image,
        languages: &[String],
        ocr: &dyn OcrAdapter,
        gazetteer: &dyn GazetteerAdapter,
    ) -> Result<FeatureCollection, TextError> {
        crate::ocr::check_language_codes(languages)?;

        let blocks = match ocr.recognize(image, languages) {
            Ok(blocks) => blocks,
            Err(err) if self.config.tolerate_ocr_failure => {
                warn!(%err, "OCR engine unavailable, text stage producing no features");
                Vec::new()
            }
            Err(err) => return Err(TextError::InvalidLanguage(err)),
        };

        Ok(self.resolve_blocks(&blocks, gazetteer))
    }

    /// Resolves already-recognized OCR blocks against the gazetteer, without
    /// invoking an OCR engine itself.
    ///
    /// Exposed so a caller that also needs the raw blocks for another stage
    /// (e.g. [`crate::shape::ShapeExtractor`]'s text-overlap filter) can run
    /// OCR once and feed the result to both.
    #[must_use]
    pub fn resolve_blocks(&self, blocks: &[OcrBlock], gazetteer: &dyn GazetteerAdapter) -> FeatureCollection {
        let mut features = Vec::new();
        for block in blocks {
            for m in self.resolve_block(block, gazetteer) {
                let mut common = CommonProps::new(m.phrase.clone());
                common.is_pixel_space = false;
                common.crs = Some("EPSG:4326".to_string());
                let properties = FeatureProperties::Place {
                    common,
                    token: m.phrase.clone(),
                    found: m.found,
                    confidence: m.confidence,
                };
                features.push(Feature::new(FeatureGeometry::Point(geo_types::point!(x: m.lon, y: m.lat)), properties));
            }
        }
        FeatureCollection { features }
    }

    /// Greedy longest-n-gram scan of one OCR block's text against the
    /// gazetteer. Among same-key candidates, the largest
    /// population wins; ties are broken by the lexicographically earliest
    /// canonical name.
    fn resolve_block(&self, block: &OcrBlock, gazetteer: &dyn GazetteerAdapter) -> Vec<Match> {
        let re = word_regex();
        let tokens: Vec<&str> = re.find_iter(&block.text).map(|m| m.as_str()).collect();

        let mut matches = Vec::new();
        let total = tokens.len();
        let mut i = 0;
        while i < total {
            let max_n = self.config.max_ngram.min(total - i);
            let mut matched = false;
            for n in (1..=max_n).rev() {
                let phrase = tokens[i..i + n].join(" ");
                let key = normalize_token(&phrase);
                let candidates = gazetteer.lookup(&key);
                if let Some(best) = candidates.iter().max_by(|a, b| {
                    a.population
                        .unwrap_or(0)
                        .cmp(&b.population.unwrap_or(0))
                        .then_with(|| b.name.cmp(&a.name))
                }) {
                    matches.push(Match {
                        phrase,
                        lon: best.lon,
                        lat: best.lat,
                        found: true,
                        confidence: block.confidence.clamp(0.0, 1.0),
                    });
                    i += n;
                    matched = true;
                    break;
                }
            }
            if !matched {
                // An unresolved token still gets a point feature, at the
                // null island coordinate; callers filter on `found`.
                matches.push(Match {
                    phrase: tokens[i].to_string(),
                    lon: 0.0,
                    lat: 0.0,
                    found: false,
                    confidence: 0.0,
                });
                i += 1;
            }
        }
        matches
    }
}
