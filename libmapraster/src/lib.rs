//! # libmapraster
//!
//! Extracts structured geographic features from a single scanned or
//! rendered raster map image: named color zones, outlined shapes, and
//! resolved place names, optionally georeferenced to WGS84 and snapped to
//! a reference coastline.
//!
//! The library is organized as one module per pipeline stage, each
//! independently testable and independently tolerant (or not) of its own
//! failure modes. [`orchestrator::Orchestrator`] sequences the stages for
//! a single [`job::MapJob`] and reports progress/persists results through
//! caller-supplied [`orchestrator::ProgressSink`]/[`orchestrator::PersistenceSink`]
//! implementations.
//!
//! ### Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use libmapraster::config::PipelineConfig;
//! use libmapraster::job::MapJob;
//! use libmapraster::ocr::{OcrAdapter, OcrBlock, OcrError};
//! use libmapraster::orchestrator::{Orchestrator, PersistenceError, PersistenceSink, ProgressSink};
//! use libmapraster::resources::{Resources, StaticGazetteer};
//! use libmapraster::feature::FeatureCollection;
//! use uuid::Uuid;
//!
//! struct NullOcr;
//! impl OcrAdapter for NullOcr {
//!     fn recognize(&self, _image: &libmapraster::image::Image, _languages: &[String]) -> Result<Vec<OcrBlock>, OcrError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! struct StdoutProgress;
//! impl ProgressSink for StdoutProgress {
//!     fn on_progress(&self, map_id: Uuid, progress: libmapraster::job::Progress) {
//!         println!("{map_id}: {progress:?}");
//!     }
//! }
//!
//! struct NullPersistence;
//! impl PersistenceSink for NullPersistence {
//!     fn persist(&self, _map_id: Uuid, _stage: &str, _features: &FeatureCollection) -> Result<(), PersistenceError> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
//!     let orchestrator = Orchestrator::new(PipelineConfig::default(), resources);
//!     let job = MapJob::new(Uuid::new_v4(), std::fs::read("chart.png")?, "png");
//!     orchestrator.run(&job, &NullOcr, &StdoutProgress, &NullPersistence)?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

pub mod coastline;
pub mod color;
pub mod config;
pub mod contour;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod georeference;
pub mod image;
pub mod job;
mod linalg;
pub mod loader;
pub mod ocr;
pub mod orchestrator;
pub mod preprocess;
pub mod resources;
pub mod shape;
pub mod text;

pub use error::Error;
pub use job::MapJob;
pub use orchestrator::Orchestrator;
pub use resources::Resources;
