//! Drives one job through every enabled stage, in order, reporting
//! progress and persisting each feature kind as it's finalized.
//!
//! State machine: `PENDING` is reported once at the start,
//! then one `PROGRESS` event per completed stage, ending in either
//! `SUCCESS` (every enabled stage ran to completion) or `FAILURE` (a
//! terminal error, cancellation, or timeout). Non-terminal stage failures
//! — an unavailable OCR engine, a missing reference coastline — degrade
//! gracefully instead of failing the job; see each stage's own tolerance
//! policy.

use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, OUTPUT_CRS};
use crate::error::Error;
use crate::feature::FeatureCollection;
use crate::georeference::Transform;
use crate::job::{JobResult, MapJob, Progress};
use crate::ocr::OcrAdapter;
use crate::resources::Resources;

/// A sink a caller implements to persist each stage's finalized features,
/// e.g. writing GeoJSON files or inserting rows into a database.
pub trait PersistenceSink: Send + Sync {
    /// Persists `features` for `map_id` under the named stage
    /// (`"zones"`, `"shapes"`, or `"places"`).
    ///
    /// # Errors
    /// Implementations return [`PersistenceError`] on any I/O or storage
    /// failure; this is treated as a terminal job failure.
    fn persist(&self, map_id: Uuid, stage: &str, features: &FeatureCollection) -> Result<(), PersistenceError>;
}

/// A sink a caller implements to observe job progress and request
/// cancellation.
pub trait ProgressSink: Send + Sync {
    /// Called once per `PENDING`/`PROGRESS`/`SUCCESS` transition.
    fn on_progress(&self, map_id: Uuid, progress: Progress);

    /// Polled at each stage boundary; returning `true` aborts the job with
    /// [`Error::Cancelled`]. Defaults to never cancelling.
    fn is_cancelled(&self, map_id: Uuid) -> bool {
        let _ = map_id;
        false
    }
}

/// A sink failed to persist a stage's features.
#[derive(Error, Debug)]
#[error("failed to persist {stage} features")]
pub struct PersistenceError {
    stage: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl PersistenceError {
    /// Builds a persistence error for the named stage.
    pub fn new(stage: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            stage: stage.into(),
            source: Box::new(source),
        }
    }
}

/// Runs the full extraction pipeline for one [`MapJob`].
pub struct Orchestrator {
    config: PipelineConfig,
    resources: Resources,
}

impl Orchestrator {
    /// Builds an orchestrator from a pipeline configuration and shared
    /// resources.
    #[must_use]
    pub fn new(config: PipelineConfig, resources: Resources) -> Self {
        Self { config, resources }
    }

    /// Runs `job` to completion (or until it is cancelled, times out, or a
    /// terminal error occurs), reporting progress to `progress` and
    /// persisting each finalized feature collection to `persistence`.
    ///
    /// # Errors
    /// Returns the first terminal [`Error`] encountered: a decode failure,
    /// a stage error not covered by that stage's own tolerance policy,
    /// [`Error::Cancelled`] if `progress` requests cancellation at a stage
    /// boundary, or [`Error::TimeoutExceeded`] if the job outlives its
    /// configured wall-clock budget.
    #[instrument(skip(self, job, ocr, progress, persistence))]
    pub fn run(&self, job: &MapJob, ocr: &dyn OcrAdapter, progress: &dyn ProgressSink, persistence: &dyn PersistenceSink) -> Result<JobResult, Error> {
        progress.on_progress(job.map_id, Progress { current: 0, total: 0, status: "pending".into() });

        match self.execute(job, ocr, progress, persistence) {
            Ok((summary, total)) => {
                progress.on_progress(job.map_id, Progress { current: total, total, status: "success".into() });
                Ok(summary)
            }
            Err(err) => {
                warn!(%err, "job failed");
                progress.on_progress(job.map_id, failure_progress(&err));
                Err(err)
            }
        }
    }

    /// Runs every enabled stage to completion, returning the job summary and
    /// the total number of stages that ran. Does not itself report the
    /// initial `pending` or final `success`/`failure` progress events; [`Self::run`]
    /// wraps this so a terminal error is always observed by `progress`
    /// before it propagates.
    fn execute(
        &self,
        job: &MapJob,
        ocr: &dyn OcrAdapter,
        progress: &dyn ProgressSink,
        persistence: &dyn PersistenceSink,
    ) -> Result<(JobResult, u32), Error> {
        let deadline = Instant::now() + Duration::from_secs(self.config.job_timeout_secs.max(1));

        let image = self.config.loader.load(&job.source_bytes, &job.extension)?;
        let image = crate::preprocess::preprocess(&image, &self.config.preprocess);

        let transform = if job.stages.georeference {
            match crate::georeference::Georeferencer::new(self.config.georeference).fit(&job.control_points) {
                Ok(transform) => Some(transform),
                Err(crate::georeference::GeoreferenceError::InsufficientControlPoints(count)) => {
                    warn!(count, "georeferencing requested but too few control points; pixel-space outputs will be persisted unchanged");
                    None
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            None
        };
        let do_georeference = transform.is_some();
        let do_coastline = job.stages.coastline_snap && do_georeference && self.resources.reference_coastline().is_some();

        let mut planned = Vec::new();
        if job.stages.color {
            planned.push("color");
        }
        if job.stages.shapes {
            planned.push("shapes");
        }
        if job.stages.text {
            planned.push("text");
        }
        if do_georeference {
            planned.push("georeference");
        }
        if do_coastline {
            planned.push("coastline");
        }
        let total = planned.len() as u32;
        let mut current = 0u32;

        let ocr_blocks = if job.stages.text || job.stages.shapes || job.stages.color {
            crate::ocr::check_language_codes(&job.ocr_languages).map_err(crate::text::TextError::from)?;
            ocr.recognize(&image, &job.ocr_languages).unwrap_or_else(|err| {
                warn!(%err, "OCR engine unavailable; text will be empty and shapes will not exclude text regions");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let mut zones = FeatureCollection::default();
        let mut shapes = FeatureCollection::default();
        let mut places = FeatureCollection::default();

        // Each stage's collection is persisted as soon as it reaches its
        // final form for this job: immediately in pixel-space if no later
        // stage will transform it further, re-persisted (same stage name,
        // so a file-based sink just overwrites) once georeferencing and/or
        // coastline snapping update it. This way a cancellation partway
        // through never loses a stage that already completed.
        if job.stages.color {
            zones = crate::color::ColorExtractor::new(self.config.color).extract_excluding_text(&image, &ocr_blocks)?;
            persistence.persist(job.map_id, "zones", &zones).map_err(Error::from)?;
            current += 1;
            self.advance(progress, job.map_id, current, total, "color", deadline)?;
        }

        if job.stages.shapes {
            shapes = crate::shape::ShapeExtractor::new(self.config.shape).extract(&image, &ocr_blocks)?;
            persistence.persist(job.map_id, "shapes", &shapes).map_err(Error::from)?;
            current += 1;
            self.advance(progress, job.map_id, current, total, "shapes", deadline)?;
        }

        if job.stages.text {
            places = crate::text::TextResolver::new(self.config.text).resolve_blocks(&ocr_blocks, self.resources.gazetteer());
            persistence.persist(job.map_id, "places", &places).map_err(Error::from)?;
            current += 1;
            self.advance(progress, job.map_id, current, total, "text", deadline)?;
        }

        let mut georeferenced = false;
        let mut coastline_snapped = false;

        if let Some(transform) = transform {
            zones = apply_transform(&transform, zones);
            shapes = apply_transform(&transform, shapes);
            georeferenced = true;
            persistence.persist(job.map_id, "zones", &zones).map_err(Error::from)?;
            persistence.persist(job.map_id, "shapes", &shapes).map_err(Error::from)?;
            current += 1;
            self.advance(progress, job.map_id, current, total, "georeference", deadline)?;
        }

        if do_coastline {
            let snapper = crate::coastline::CoastlineSnapper::new(self.config.coastline);
            zones = snapper.snap(&zones, &job.coastline_markers, &self.resources)?;
            shapes = snapper.snap(&shapes, &job.coastline_markers, &self.resources)?;
            coastline_snapped = true;
            persistence.persist(job.map_id, "zones", &zones).map_err(Error::from)?;
            persistence.persist(job.map_id, "shapes", &shapes).map_err(Error::from)?;
            current += 1;
            self.advance(progress, job.map_id, current, total, "coastline", deadline)?;
        }

        let summary = JobResult {
            zones_emitted: zones.features.len(),
            shapes_emitted: shapes.features.len(),
            places_emitted: places.features.len(),
            georeferenced,
            coastline_snapped,
        };
        Ok((summary, total))
    }

    fn advance(&self, progress: &dyn ProgressSink, map_id: Uuid, current: u32, total: u32, status: &str, deadline: Instant) -> Result<(), Error> {
        progress.on_progress(map_id, Progress { current, total, status: status.to_string() });
        if progress.is_cancelled(map_id) {
            return Err(Error::Cancelled);
        }
        if Instant::now() > deadline {
            return Err(Error::TimeoutExceeded);
        }
        Ok(())
    }
}

/// Builds the terminal `Progress` event for a job that ended in a terminal
/// error: `status` is `"cancelled"`/`"timeout"` for those two reasons (per
/// spec §5's `reason="cancelled"`), and `"failure: {err}"` otherwise.
fn failure_progress(err: &Error) -> Progress {
    let status = match err {
        Error::Cancelled => "cancelled".to_string(),
        Error::TimeoutExceeded => "timeout".to_string(),
        other => format!("failure: {other}"),
    };
    Progress { current: 0, total: 0, status }
}

fn apply_transform(transform: &Transform, collection: FeatureCollection) -> FeatureCollection {
    let features = collection
        .features
        .into_iter()
        .map(|mut f| {
            f.geometry = transform.apply(&f.geometry);
            let common = f.properties.common_mut();
            common.is_pixel_space = false;
            common.crs = Some(OUTPUT_CRS.to_string());
            common.annotations.insert("georeference_rmse_m".into(), json!(transform.rmse_m));
            common.annotations.insert("transform_method".into(), json!(transform.kind().as_str()));
            f
        })
        .collect();
    FeatureCollection { features }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ControlPoint, StageFlags};
    use crate::ocr::{OcrBlock, OcrError};
    use crate::resources::StaticGazetteer;
    use std::sync::{Arc, Mutex};

    struct NoOcr;
    impl OcrAdapter for NoOcr {
        fn recognize(&self, _image: &crate::image::Image, _languages: &[String]) -> Result<Vec<OcrBlock>, OcrError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<Progress>>,
    }
    impl ProgressSink for RecordingProgress {
        fn on_progress(&self, _map_id: Uuid, progress: Progress) {
            self.events.lock().unwrap().push(progress);
        }
    }

    #[derive(Default)]
    struct RecordingPersistence {
        stages: Mutex<Vec<String>>,
    }
    impl PersistenceSink for RecordingPersistence {
        fn persist(&self, _map_id: Uuid, stage: &str, _features: &FeatureCollection) -> Result<(), PersistenceError> {
            self.stages.lock().unwrap().push(stage.to_string());
            Ok(())
        }
    }

    fn encode_png(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        use image::{ImageBuffer, Rgba};
        let buf: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |_, _| Rgba(pixel));
        let mut out = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut out);
        buf.write_to(&mut cursor, image::ImageFormat::Png).expect("encode png");
        out
    }

    #[test]
    fn runs_every_enabled_stage_and_persists_each_kind() {
        let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
        let orchestrator = Orchestrator::new(PipelineConfig::default(), resources);

        let bytes = encode_png(16, 16, [200, 200, 200, 255]);
        let mut job = MapJob::new(Uuid::new_v4(), bytes, "png");
        job.stages = StageFlags::builder().color(true).shapes(true).text(true).coastline_snap(false).georeference(true).build();
        job.control_points = vec![
            ControlPoint::new((0.0, 0.0), (-74.0, 40.7)),
            ControlPoint::new((16.0, 0.0), (-73.9, 40.7)),
            ControlPoint::new((0.0, 16.0), (-74.0, 40.6)),
        ];

        let progress = RecordingProgress::default();
        let persistence = RecordingPersistence::default();
        let result = orchestrator.run(&job, &NoOcr, &progress, &persistence).unwrap();

        assert!(result.georeferenced);
        assert!(!result.coastline_snapped);
        // zones/shapes persist once in pixel-space, then again once
        // georeferencing has transformed them; places persist only once.
        assert_eq!(
            persistence.stages.lock().unwrap().as_slice(),
            ["zones", "shapes", "places", "zones", "shapes"]
        );
        assert!(!progress.events.lock().unwrap().is_empty());
    }

    #[test]
    fn cancellation_reports_a_failure_progress_event() {
        struct CancelImmediately;
        impl ProgressSink for CancelImmediately {
            fn on_progress(&self, _map_id: Uuid, _progress: Progress) {}
            fn is_cancelled(&self, _map_id: Uuid) -> bool {
                true
            }
        }

        let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
        let orchestrator = Orchestrator::new(PipelineConfig::default(), resources);
        let bytes = encode_png(8, 8, [200, 200, 200, 255]);
        let mut job = MapJob::new(Uuid::new_v4(), bytes, "png");
        job.stages = StageFlags::builder().color(true).shapes(false).text(false).georeference(false).build();

        let progress = RecordingProgress::default();
        let err = orchestrator.run(&job, &NoOcr, &progress, &RecordingPersistence::default()).unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let events = progress.events.lock().unwrap();
        let last = events.last().expect("at least one progress event");
        assert_eq!(last.status, "cancelled");
    }

    #[test]
    fn loader_failure_reports_a_failure_progress_event() {
        let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
        let orchestrator = Orchestrator::new(PipelineConfig::default(), resources);
        let job = MapJob::new(Uuid::new_v4(), b"not an image".to_vec(), "png");

        let progress = RecordingProgress::default();
        let err = orchestrator.run(&job, &NoOcr, &progress, &RecordingPersistence::default()).unwrap_err();
        assert!(matches!(err, Error::Loader(_)));

        let events = progress.events.lock().unwrap();
        let last = events.last().expect("at least one progress event");
        assert!(last.status.starts_with("failure: "), "status was {:?}", last.status);
    }

    #[test]
    fn fewer_than_three_control_points_skips_georeferencing() {
        let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
        let orchestrator = Orchestrator::new(PipelineConfig::default(), resources);
        let bytes = encode_png(8, 8, [200, 200, 200, 255]);
        let mut job = MapJob::new(Uuid::new_v4(), bytes, "png");
        job.stages = StageFlags::builder().color(false).shapes(false).text(false).build();
        job.control_points = vec![ControlPoint::new((0.0, 0.0), (-74.0, 40.7))];

        let progress = RecordingProgress::default();
        let persistence = RecordingPersistence::default();
        let result = orchestrator.run(&job, &NoOcr, &progress, &persistence).unwrap();
        assert!(!result.georeferenced);
    }
}
