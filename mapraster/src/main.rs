use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libmapraster::config::PipelineConfig;
use libmapraster::job::{ControlPoint, MapJob, StageFlags};
use libmapraster::orchestrator::Orchestrator;
use libmapraster::resources::{Resources, StaticGazetteer};
use mapraster::{FilePersistence, LoggingProgress, NullOcr};
use tracing::Level;
use uuid::Uuid;

#[cfg(not(debug_assertions))]
const DEFAULT_DEBUG_LEVEL: u8 = 1;
#[cfg(debug_assertions)]
const DEFAULT_DEBUG_LEVEL: u8 = 99;

/// One `pixel_x,pixel_y:lon,lat` control point, as accepted on the command line.
#[derive(Debug, Clone)]
struct ControlPointArg(ControlPoint);

impl std::str::FromStr for ControlPointArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (pixel, lonlat) = s
            .split_once(':')
            .context("control point must be `pixel_x,pixel_y:lon,lat`")?;
        let (px, py) = pixel.split_once(',').context("pixel coordinate must be `x,y`")?;
        let (lon, lat) = lonlat.split_once(',').context("geographic coordinate must be `lon,lat`")?;
        Ok(Self(ControlPoint::new(
            (px.trim().parse()?, py.trim().parse()?),
            (lon.trim().parse()?, lat.trim().parse()?),
        )))
    }
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Turn debugging information on
    #[arg(short, long, default_value_t = DEFAULT_DEBUG_LEVEL, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// The source map image
    image_file: PathBuf,

    /// Directory to write `zones.geojson`/`shapes.geojson`/`places.geojson` into
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Control points as `pixel_x,pixel_y:lon,lat`; at least 3 enable georeferencing
    #[arg(long = "cp")]
    control_points: Vec<ControlPointArg>,

    /// OCR language codes to request (see `libmapraster::ocr::SUPPORTED_LANGUAGES`)
    #[arg(long, default_value = "en")]
    languages: Vec<String>,

    /// Skip the color extraction stage
    #[arg(long)]
    no_color: bool,

    /// Skip the shape extraction stage
    #[arg(long)]
    no_shapes: bool,

    /// Skip the text/place resolution stage
    #[arg(long)]
    no_text: bool,

    /// Skip the georeferencing stage even if enough control points are given
    #[arg(long)]
    no_georeference: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_file(true)
        .with_line_number(true)
        .init();

    let source_bytes = std::fs::read(&cli.image_file).with_context(|| format!("reading {}", cli.image_file.display()))?;
    let extension = cli
        .image_file
        .extension()
        .and_then(|ext| ext.to_str())
        .context("image file has no extension")?;

    let mut job = MapJob::new(Uuid::new_v4(), source_bytes, extension);
    job.stages = StageFlags::builder()
        .color(!cli.no_color)
        .shapes(!cli.no_shapes)
        .text(!cli.no_text)
        .georeference(!cli.no_georeference)
        .build();
    job.control_points = cli.control_points.into_iter().map(|cp| cp.0).collect();
    job.ocr_languages = cli.languages;

    let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
    let orchestrator = Orchestrator::new(PipelineConfig::default(), resources);
    let persistence = FilePersistence::new(&cli.output)?;

    let summary = orchestrator.run(&job, &NullOcr, &LoggingProgress, &persistence)?;
    println!("{}", serde_json::to_string_pretty(&summary_to_json(&summary))?);
    Ok(())
}

fn summary_to_json(summary: &libmapraster::job::JobResult) -> serde_json::Value {
    serde_json::json!({
        "zones_emitted": summary.zones_emitted,
        "shapes_emitted": summary.shapes_emitted,
        "places_emitted": summary.places_emitted,
        "georeferenced": summary.georeferenced,
        "coastline_snapped": summary.coastline_snapped,
    })
}
