use thiserror::Error;

use crate::color::ColorError;
use crate::coastline::CoastlineError;
use crate::georeference::GeoreferenceError;
use crate::loader::LoaderError;
use crate::orchestrator::PersistenceError;
use crate::shape::ShapeError;
use crate::text::TextError;

/// Top-level errors produced by the extraction core.
///
/// Terminal variants bubble to the [`crate::orchestrator::Orchestrator`], which
/// emits a single `FAILURE` event and stops. Non-terminal, stage-recoverable
/// errors (`GeometryInvalid`, adapter unavailability) are represented inside
/// the individual stage error types and are logged and swallowed by the
/// orchestrator rather than surfaced here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Image decoding failed before any stage ran.
    #[error("loader error")]
    Loader(#[from] LoaderError),

    /// Color extraction failed in a way that cannot be recovered within the stage.
    #[error("color extraction error")]
    Color(#[from] ColorError),

    /// Shape extraction failed in a way that cannot be recovered within the stage.
    #[error("shape extraction error")]
    Shape(#[from] ShapeError),

    /// Text/place resolution failed in a way that cannot be recovered within the stage.
    #[error("text resolution error")]
    Text(#[from] TextError),

    /// Georeferencing failed in a way that cannot be recovered within the stage.
    #[error("georeferencing error")]
    Georeference(#[from] GeoreferenceError),

    /// Coastline snapping failed in a way that cannot be recovered within the stage.
    #[error("coastline snapping error")]
    Coastline(#[from] CoastlineError),

    /// A sink failed to persist extracted features.
    #[error("persistence error")]
    Persistence(#[from] PersistenceError),

    /// The job was cancelled at a stage boundary.
    #[error("job was cancelled")]
    Cancelled,

    /// The job exceeded its configured wall-clock budget.
    #[error("job exceeded its time budget")]
    TimeoutExceeded,
}
