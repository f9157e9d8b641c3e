//! Literal end-to-end tests for the six seed scenarios, each exercised
//! against a synthetic in-memory image or geometry rather than a checked-in
//! fixture.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{ImageBuffer, Rgba};
use uuid::Uuid;

use libmapraster::coastline::{CoastlineConfig, CoastlineSnapper};
use libmapraster::config::PipelineConfig;
use libmapraster::error::Error;
use libmapraster::feature::{CommonProps, Feature, FeatureCollection, FeatureGeometry, FeatureProperties};
use libmapraster::georeference::{GeoreferenceConfig, Georeferencer, TransformKind};
use libmapraster::job::{ControlPoint, MapJob, Progress, StageFlags};
use libmapraster::ocr::{OcrAdapter, OcrBlock, OcrError};
use libmapraster::orchestrator::{Orchestrator, PersistenceError, PersistenceSink, ProgressSink};
use libmapraster::preprocess::PreprocessConfig;
use libmapraster::resources::{GazetteerRecord, Resources, StaticGazetteer};
use libmapraster::shape::{ShapeConfig, ShapeExtractor};

use geo_types::{Coord, LineString, MultiLineString, Polygon};

struct NoOcr;
impl OcrAdapter for NoOcr {
    fn recognize(&self, _image: &libmapraster::image::Image, _languages: &[String]) -> Result<Vec<OcrBlock>, OcrError> {
        Ok(Vec::new())
    }
}

struct FakeOcr(Vec<OcrBlock>);
impl OcrAdapter for FakeOcr {
    fn recognize(&self, _image: &libmapraster::image::Image, _languages: &[String]) -> Result<Vec<OcrBlock>, OcrError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct NullProgress;
impl ProgressSink for NullProgress {
    fn on_progress(&self, _map_id: Uuid, _progress: Progress) {}
}

#[derive(Default)]
struct CapturingPersistence {
    by_stage: Mutex<HashMap<String, FeatureCollection>>,
    call_order: Mutex<Vec<String>>,
}

impl PersistenceSink for CapturingPersistence {
    fn persist(&self, _map_id: Uuid, stage: &str, features: &FeatureCollection) -> Result<(), PersistenceError> {
        self.call_order.lock().unwrap().push(stage.to_string());
        self.by_stage.lock().unwrap().insert(stage.to_string(), features.clone());
        Ok(())
    }
}

/// Cancels the job as soon as the first stage-completion event is observed
/// (i.e. right after its FeatureCollection has already been persisted).
struct CancelAfterFirstStage {
    seen: AtomicUsize,
}

impl ProgressSink for CancelAfterFirstStage {
    fn on_progress(&self, _map_id: Uuid, progress: Progress) {
        if progress.status != "pending" {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_cancelled(&self, _map_id: Uuid) -> bool {
        self.seen.load(Ordering::SeqCst) >= 1
    }
}

fn encode_png(width: u32, height: u32, pixel_at: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let buf: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| Rgba(pixel_at(x, y)));
    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    buf.write_to(&mut cursor, image::ImageFormat::Png).expect("encode png");
    out
}

fn no_preprocessing() -> PreprocessConfig {
    PreprocessConfig::builder()
        .linearize(false)
        .flat_field(false)
        .white_balance(false)
        .denoise(false)
        .clahe(false)
        .percentile_normalize(false)
        .paper_mask(false)
        .build()
}

/// Scenario 1: two-color synthetic map, no georeferencing.
#[test]
fn scenario_1_two_color_map_yields_two_layers() {
    let bytes = encode_png(200, 200, |x, _y| if x < 100 { [255, 0, 0, 255] } else { [0, 0, 255, 255] });

    let config = PipelineConfig::builder().preprocess(no_preprocessing()).build();
    let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
    let orchestrator = Orchestrator::new(config, resources);

    let mut job = MapJob::new(Uuid::new_v4(), bytes, "png");
    job.stages = StageFlags::builder().color(true).shapes(false).text(false).georeference(false).build();

    let persistence = CapturingPersistence::default();
    let result = orchestrator.run(&job, &NoOcr, &NullProgress, &persistence).unwrap();
    assert!(!result.georeferenced);

    let zones = persistence.by_stage.lock().unwrap().get("zones").cloned().unwrap();
    assert_eq!(zones.features.len(), 2);

    let mut names: Vec<&str> = Vec::new();
    for feature in &zones.features {
        let FeatureProperties::Zone { common, color_name, ratio, .. } = &feature.properties else {
            panic!("expected zone feature");
        };
        assert!(common.is_pixel_space);
        assert!((*ratio - 0.5).abs() < 0.001);
        names.push(color_name.as_str());
    }
    names.sort_unstable();
    assert_eq!(names, ["blue", "red"]);
}

/// Scenario 2: affine georeferencing sanity.
#[test]
fn scenario_2_affine_georeferencing_maps_center_point() {
    let georef = Georeferencer::new(GeoreferenceConfig::builder().ransac(false).build());
    let points = vec![
        ControlPoint::new((0.0, 0.0), (-10.0, 45.0)),
        ControlPoint::new((100.0, 0.0), (0.0, 45.0)),
        ControlPoint::new((0.0, 100.0), (-10.0, 55.0)),
        ControlPoint::new((100.0, 100.0), (0.0, 55.0)),
    ];
    let transform = georef.fit(&points).unwrap();
    // This configuration is exactly affine-representable (independent
    // per-axis linear maps), so even though 4+ points default to
    // homography, the fitted perspective terms are ~0 and the transform
    // reproduces the affine mapping exactly.
    let (lon, lat) = transform.apply_point((50.0, 50.0));
    assert!((lon - (-5.0)).abs() < 1e-6, "lon was {lon}");
    assert!((lat - 50.0).abs() < 1e-6, "lat was {lat}");
    assert!(transform.rmse_m < 1.0);
    assert!(matches!(transform.kind(), TransformKind::Affine | TransformKind::Homography));
}

/// Scenario 3: shape extraction on a near-binary input with three disjoint
/// filled circles.
#[test]
fn scenario_3_three_circles_yield_three_shapes() {
    let circles: [(i64, i64, i64); 3] = [(60, 60, 20), (180, 80, 30), (120, 220, 40)];
    let bytes = encode_png(300, 300, |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let inside = circles.iter().any(|&(cx, cy, r)| (x - cx).pow(2) + (y - cy).pow(2) <= r * r);
        if inside { [0, 0, 0, 255] } else { [255, 255, 255, 255] }
    });

    let image = libmapraster::loader::Loader::default().load(&bytes, "png").unwrap();
    let config = ShapeConfig::builder().min_area(10.0).build();
    let extractor = ShapeExtractor::new(config);
    let result = extractor.extract(&image, &[]).unwrap();

    assert_eq!(result.features.len(), 3);
    for feature in &result.features {
        let FeatureProperties::Shape { color_rgb, solidity, vertex_count, .. } = &feature.properties else {
            panic!("expected shape feature");
        };
        assert!((15..=60).contains(vertex_count), "vertex_count was {vertex_count}");
        assert!((0.85..=1.0).contains(solidity), "solidity was {solidity}");
        assert!(color_rgb.0 <= 20 && color_rgb.1 <= 20 && color_rgb.2 <= 20, "color_rgb was {color_rgb:?}");
    }
}

/// Scenario 4: gazetteer match through the full text stage.
#[test]
fn scenario_4_gazetteer_match_via_orchestrator() {
    let gazetteer = StaticGazetteer::new(vec![GazetteerRecord {
        name: "Montréal".into(),
        normalized_key: "montreal".into(),
        lon: -73.57,
        lat: 45.50,
        population: Some(1_700_000),
    }]);
    let resources = Resources::new(Arc::new(gazetteer), None);
    let config = PipelineConfig::builder().preprocess(no_preprocessing()).build();
    let orchestrator = Orchestrator::new(config, resources);

    let ocr = FakeOcr(vec![OcrBlock {
        quad: [(0, 0), (100, 0), (100, 30), (0, 30)],
        text: "Montréal".into(),
        confidence: 0.95,
    }]);

    let bytes = encode_png(16, 16, |_, _| [255, 255, 255, 255]);
    let mut job = MapJob::new(Uuid::new_v4(), bytes, "png");
    job.stages = StageFlags::builder().color(false).shapes(false).text(true).georeference(false).build();

    let persistence = CapturingPersistence::default();
    orchestrator.run(&job, &ocr, &NullProgress, &persistence).unwrap();

    let places = persistence.by_stage.lock().unwrap().get("places").cloned().unwrap();
    assert_eq!(places.features.len(), 1);
    let FeatureProperties::Place { common, found, .. } = &places.features[0].properties else {
        panic!("expected place feature");
    };
    assert!(*found);
    assert_eq!(common.name, "Montréal");
    let FeatureGeometry::Point(point) = &places.features[0].geometry else {
        panic!("expected point geometry");
    };
    assert!((point.x() - (-73.57)).abs() < 1e-9);
    assert!((point.y() - 45.50).abs() < 1e-9);
}

/// Scenario 5: coastline snapping moves only vertices with anchor evidence,
/// leaving inland vertices untouched to bit precision.
#[test]
fn scenario_5_coastline_snap_preserves_inland_vertices() {
    let coastal_0 = Coord { x: 0.0, y: 0.0001 };
    let inland_1 = Coord { x: 1.0, y: 1.0 };
    let coastal_2 = Coord { x: 0.0003, y: -0.0001 };
    let inland_3 = Coord { x: 1.0, y: -1.0 };
    let exterior = LineString::new(vec![coastal_0, inland_1, coastal_2, inland_3, coastal_0]);
    let feature = Feature::new(
        FeatureGeometry::Polygon(Polygon::new(exterior, vec![])),
        FeatureProperties::Shape {
            common: CommonProps::new("alternating ring"),
            color_rgb: (0, 0, 0),
            color_hex: "#000000".into(),
            area: 1.0,
            perimeter: 4.0,
            aspect_ratio: 1.0,
            extent: 1.0,
            solidity: 1.0,
            vertex_count: 4,
        },
    );

    let coastline = MultiLineString::new(vec![LineString::new(vec![Coord { x: -2.0, y: 0.0 }, Coord { x: 2.0, y: 0.0 }])]);
    let resources = Resources::new(Arc::new(StaticGazetteer::default()), Some(Arc::new(coastline)));
    let snapper = CoastlineSnapper::new(CoastlineConfig::default());

    let collection = FeatureCollection { features: vec![feature] };
    // A single anchor near the origin: within 25km of the two "coastal"
    // vertices, ~157km from the two "inland" ones.
    let result = snapper.snap(&collection, &[(0.0, 0.0)], &resources).unwrap();

    let FeatureGeometry::Polygon(snapped) = &result.features[0].geometry else {
        panic!("expected polygon geometry");
    };
    let snapped_coords: Vec<Coord<f64>> = snapped.exterior().coords().copied().collect();

    // Inland vertices (original indices 1 and 3) are untouched.
    assert!(snapped_coords.contains(&inland_1));
    assert!(snapped_coords.contains(&inland_3));

    // Coastal vertices moved onto the reference line (lat -> 0), longitude
    // preserved since the reference line is a pure east-west segment.
    let moved_0 = snapped_coords.iter().find(|c| (c.x - coastal_0.x).abs() < 1e-6).unwrap();
    assert!(moved_0.y.abs() < 1e-9, "coastal_0 did not snap to the reference line: {moved_0:?}");
    let moved_2 = snapped_coords.iter().find(|c| (c.x - coastal_2.x).abs() < 1e-6).unwrap();
    assert!(moved_2.y.abs() < 1e-9, "coastal_2 did not snap to the reference line: {moved_2:?}");

    let FeatureProperties::Shape { common, .. } = &result.features[0].properties else {
        panic!("expected shape properties");
    };
    assert_eq!(common.annotations.get("coastline_snapped").and_then(serde_json::Value::as_bool), Some(true));
    // Only the two "coastal" vertices (indices 0 and 2) had anchor evidence
    // and fell within snapping distance of the reference line.
    assert_eq!(common.annotations.get("points_snapped").and_then(serde_json::Value::as_u64), Some(2));
}

/// Scenario 6: cancellation right after the first stage completes.
#[test]
fn scenario_6_cancellation_persists_only_completed_stages() {
    let config = PipelineConfig::builder().preprocess(no_preprocessing()).build();
    let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
    let orchestrator = Orchestrator::new(config, resources);

    let bytes = encode_png(32, 32, |_, _| [128, 64, 200, 255]);
    let mut job = MapJob::new(Uuid::new_v4(), bytes, "png");
    job.stages = StageFlags::builder().color(true).shapes(true).text(true).georeference(false).build();

    let persistence = CapturingPersistence::default();
    let progress = CancelAfterFirstStage { seen: AtomicUsize::new(0) };
    let err = orchestrator.run(&job, &NoOcr, &progress, &persistence).unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(persistence.call_order.lock().unwrap().as_slice(), ["zones"]);
}
