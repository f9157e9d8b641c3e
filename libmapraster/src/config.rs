//! Aggregates every stage's configuration into the single value an
//! [`crate::orchestrator::Orchestrator`] is built from.

use crate::coastline::CoastlineConfig;
use crate::color::ColorConfig;
use crate::georeference::GeoreferenceConfig;
use crate::loader::Loader;
use crate::preprocess::PreprocessConfig;
use crate::shape::ShapeConfig;
use crate::text::TextConfig;

/// The CRS every persisted feature is reprojected to once georeferenced.
pub const OUTPUT_CRS: &str = "EPSG:4326";

/// Default per-job wall-clock budget.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 600;

/// Full configuration for one run of the extraction pipeline.
#[derive(Debug, Clone, bon::Builder)]
pub struct PipelineConfig {
    /// Byte-decoding configuration.
    #[builder(default)]
    pub loader: Loader,
    /// Scan-cleanup configuration.
    #[builder(default)]
    pub preprocess: PreprocessConfig,
    /// Color-extraction configuration.
    #[builder(default)]
    pub color: ColorConfig,
    /// Shape-extraction configuration.
    #[builder(default)]
    pub shape: ShapeConfig,
    /// Text/place-resolution configuration.
    #[builder(default)]
    pub text: TextConfig,
    /// Georeferencing configuration.
    #[builder(default)]
    pub georeference: GeoreferenceConfig,
    /// Coastline-snapping configuration.
    #[builder(default)]
    pub coastline: CoastlineConfig,
    /// Per-job wall-clock budget, in seconds.
    #[builder(default = DEFAULT_JOB_TIMEOUT_SECS)]
    pub job_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_timeout() {
        let config = PipelineConfig::default();
        assert_eq!(config.job_timeout_secs, DEFAULT_JOB_TIMEOUT_SECS);
    }
}
