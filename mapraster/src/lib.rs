//! Filesystem sinks and a null OCR adapter wiring [`libmapraster`]'s
//! [`Orchestrator`] up to a command-line invocation.
//!
//! None of this is part of the extraction core; it exists only so the CLI
//! has somewhere to write results and a way to satisfy the OCR adapter
//! boundary when no real OCR engine is configured.

use std::fs;
use std::path::{Path, PathBuf};

use libmapraster::feature::FeatureCollection;
use libmapraster::image::Image;
use libmapraster::job::Progress;
use libmapraster::ocr::{OcrAdapter, OcrBlock, OcrError};
use libmapraster::orchestrator::{PersistenceError, PersistenceSink, ProgressSink};
use tracing::info;
use uuid::Uuid;

/// Writes each stage's features to `<output_dir>/<stage>.geojson`.
pub struct FilePersistence {
    output_dir: PathBuf,
}

impl FilePersistence {
    /// Builds a sink rooted at `output_dir`, creating it if necessary.
    ///
    /// # Errors
    /// Returns any I/O error from creating the directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }
}

impl PersistenceSink for FilePersistence {
    fn persist(&self, map_id: Uuid, stage: &str, features: &FeatureCollection) -> Result<(), PersistenceError> {
        let path: &Path = &self.output_dir.join(format!("{stage}.geojson"));
        let value = features.to_json_value().map_err(|err| PersistenceError::new(stage, err))?;
        let body = serde_json::to_string_pretty(&value).map_err(|err| PersistenceError::new(stage, err))?;
        fs::write(path, body).map_err(|err| PersistenceError::new(stage, err))?;
        info!(%map_id, stage, path = %path.display(), "wrote features");
        Ok(())
    }
}

/// Logs each progress event via `tracing`.
pub struct LoggingProgress;

impl ProgressSink for LoggingProgress {
    fn on_progress(&self, map_id: Uuid, progress: Progress) {
        info!(%map_id, current = progress.current, total = progress.total, status = %progress.status, "progress");
    }
}

/// An [`OcrAdapter`] that never recognizes anything, for runs with no OCR
/// engine configured. The text and shape-overlap stages treat this exactly
/// like a transient engine outage: they proceed with an empty block list.
pub struct NullOcr;

impl OcrAdapter for NullOcr {
    fn recognize(&self, _image: &Image, _languages: &[String]) -> Result<Vec<OcrBlock>, OcrError> {
        Err(OcrError::Unavailable("no OCR engine configured for this invocation".to_string()))
    }
}
