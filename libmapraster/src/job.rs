//! The unit of work the orchestrator consumes: a [`MapJob`], its control
//! points, and the stages enabled for it.

use uuid::Uuid;

/// A pixel `(x, y)` coordinate.
pub type PixelXy = (f64, f64);
/// A geographic `(lon, lat)` coordinate, WGS84 degrees.
pub type LonLat = (f64, f64);

/// A matched pair used to fit the georeferencing transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    /// Pixel coordinate on the raster.
    pub pixel: PixelXy,
    /// Geographic coordinate on Earth.
    pub lonlat: LonLat,
}

impl ControlPoint {
    /// Builds a control point from a pixel/lon-lat pair.
    #[must_use]
    pub const fn new(pixel: PixelXy, lonlat: LonLat) -> Self {
        Self { pixel, lonlat }
    }
}

/// Which optional stages are enabled for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder)]
pub struct StageFlags {
    /// Run the color extractor.
    #[builder(default = true)]
    pub color: bool,
    /// Run the shape extractor.
    #[builder(default = true)]
    pub shapes: bool,
    /// Run the text/place resolver.
    #[builder(default = true)]
    pub text: bool,
    /// Run the coastline snapper (requires georeferencing to have produced
    /// output; this flag alone does not enable georeferencing).
    #[builder(default = false)]
    pub coastline_snap: bool,
    /// Run the georeferencer, if control points are present.
    #[builder(default = true)]
    pub georeference: bool,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A decoded, not-yet-processed unit of work.
#[derive(Debug, Clone)]
pub struct MapJob {
    /// Identifier this job's features are persisted under.
    pub map_id: Uuid,
    /// Raw image bytes, not yet decoded.
    pub source_bytes: Vec<u8>,
    /// Declared file extension (without leading dot).
    pub extension: String,
    /// Which optional stages run.
    pub stages: StageFlags,
    /// Control points supplied by the caller, if any.
    pub control_points: Vec<ControlPoint>,
    /// Coastline marker points supplied by the caller, if any.
    pub coastline_markers: Vec<LonLat>,
    /// OCR language codes requested for the text stage.
    pub ocr_languages: Vec<String>,
}

impl MapJob {
    /// Builds a job with no control points, no coastline markers, English
    /// OCR, and every non-coastline stage enabled.
    #[must_use]
    pub fn new(map_id: Uuid, source_bytes: Vec<u8>, extension: impl Into<String>) -> Self {
        Self {
            map_id,
            source_bytes,
            extension: extension.into(),
            stages: StageFlags::default(),
            control_points: Vec::new(),
            coastline_markers: Vec::new(),
            ocr_languages: vec!["en".to_string()],
        }
    }
}

/// One of the values a polling client observes for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Accepted, not yet started.
    Pending,
    /// A stage boundary was crossed.
    Progress {
        /// Number of stages completed so far.
        current: u32,
        /// Total number of enabled stages.
        total: u32,
        /// Human-readable status, e.g. the stage name.
        status: String,
    },
    /// The job completed; every enabled stage ran (or was skipped per
    /// policy) without a terminal error.
    Success {
        /// Feature counts per stage, for the caller's own summary.
        summary: JobResult,
    },
    /// The job ended with a terminal error.
    Failure {
        /// The error message.
        message: String,
    },
}

/// Progress event shape reported to the external [`crate::orchestrator::ProgressSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Number of stages completed so far.
    pub current: u32,
    /// Total number of enabled stages.
    pub total: u32,
    /// Human-readable status.
    pub status: String,
}

/// Summary of a completed job, returned from [`crate::orchestrator::Orchestrator::run`]
/// in addition to whatever the sinks received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobResult {
    /// Number of color-zone features emitted.
    pub zones_emitted: usize,
    /// Number of shape features emitted.
    pub shapes_emitted: usize,
    /// Number of place-point features emitted.
    pub places_emitted: usize,
    /// Whether georeferencing ran and succeeded.
    pub georeferenced: bool,
    /// Whether coastline snapping ran.
    pub coastline_snapped: bool,
}
