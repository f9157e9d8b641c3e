//! Typed feature model and its GeoJSON serialization boundary.
//!
//! Stage code never builds a loosely-shaped property bag directly: each
//! stage emits [`FeatureProperties`] variants (`Zone`, `Shape`, `Place`),
//! and only [`FeatureProperties::to_geojson_properties`] — called from the
//! persistence boundary — flattens them into the common GeoJSON property
//! map every feature carries.

use std::collections::BTreeMap;

use geo_types::{LineString, MultiPolygon, Point, Polygon};
use serde_json::{json, Map, Value};

/// The geometry carried by a [`Feature`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    /// A single geographic or pixel-space point (place names).
    Point(Point<f64>),
    /// A line (unused by the core stages directly, reserved for coastline
    /// reference geometry and future line-feature kinds).
    LineString(LineString<f64>),
    /// A single polygon (most shapes).
    Polygon(Polygon<f64>),
    /// A multi-polygon (color zones split across disjoint regions).
    MultiPolygon(MultiPolygon<f64>),
}

impl FeatureGeometry {
    /// Converts to a [`geojson::Geometry`].
    #[must_use]
    pub fn to_geojson(&self) -> geojson::Geometry {
        match self {
            Self::Point(p) => geojson::Geometry::from(p),
            Self::LineString(l) => geojson::Geometry::from(l),
            Self::Polygon(p) => geojson::Geometry::from(p),
            Self::MultiPolygon(m) => geojson::Geometry::from(m),
        }
    }
}

/// The kind of map element a feature represents, per the required
/// `map_element_type` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapElementType {
    /// A color layer polygon.
    Zone,
    /// A shape-extraction polygon.
    Shape,
    /// A resolved place-name point.
    Point,
}

impl MapElementType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Shape => "shape",
            Self::Point => "point",
        }
    }
}

/// Fields shared by every feature kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonProps {
    /// Display name for the feature.
    pub name: String,
    /// Start of the validity period, if known (ISO-8601 date string).
    pub start_date: Option<String>,
    /// End of the validity period, if known (ISO-8601 date string).
    pub end_date: Option<String>,
    /// Whether the geometry is still in raw pixel coordinates.
    pub is_pixel_space: bool,
    /// CRS identifier once georeferenced (`"EPSG:4326"`).
    pub crs: Option<String>,
    /// Annotations appended by later stages (georeferencing quality metrics,
    /// coastline-snap counts) that don't belong to any one stage's own
    /// variant. Merged verbatim into the GeoJSON property bag.
    pub annotations: BTreeMap<String, Value>,
}

impl CommonProps {
    /// A fresh, pixel-space, unannotated set of common properties.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_date: None,
            end_date: None,
            is_pixel_space: true,
            crs: None,
            annotations: BTreeMap::new(),
        }
    }
}

/// Stage-specific property payload. Serialized to a flat GeoJSON property bag
/// only at the persistence boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureProperties {
    /// A color-layer zone.
    Zone {
        /// Shared fields.
        common: CommonProps,
        /// CSS4-nearest color name.
        color_name: String,
        /// Representative RGB color.
        color_rgb: (u8, u8, u8),
        /// Representative color as `#rrggbb`.
        color_hex: String,
        /// Fraction of valid pixels this layer covers, in `[0, 1]`.
        ratio: f64,
    },
    /// A shape-extraction polygon.
    Shape {
        /// Shared fields.
        common: CommonProps,
        /// Dominant RGB color sampled from the contour interior.
        color_rgb: (u8, u8, u8),
        /// Dominant color as `#rrggbb`.
        color_hex: String,
        /// Pixel area of the contour.
        area: f64,
        /// Pixel perimeter of the contour.
        perimeter: f64,
        /// Bounding-box width / height.
        aspect_ratio: f64,
        /// `area / (bbox width * bbox height)`.
        extent: f64,
        /// `area / convex_hull_area`.
        solidity: f64,
        /// Vertex count after polygon approximation.
        vertex_count: usize,
    },
    /// A resolved (or unresolved) place name.
    Place {
        /// Shared fields.
        common: CommonProps,
        /// The original OCR token.
        token: String,
        /// Whether the gazetteer produced a match.
        found: bool,
        /// Match confidence in `[0, 1]`; `0.0` when `found` is `false`.
        confidence: f64,
    },
}

impl FeatureProperties {
    /// The shared [`CommonProps`], regardless of variant.
    #[must_use]
    pub fn common(&self) -> &CommonProps {
        match self {
            Self::Zone { common, .. } | Self::Shape { common, .. } | Self::Place { common, .. } => common,
        }
    }

    /// Mutable access to the shared [`CommonProps`].
    pub fn common_mut(&mut self) -> &mut CommonProps {
        match self {
            Self::Zone { common, .. } | Self::Shape { common, .. } | Self::Place { common, .. } => common,
        }
    }

    fn map_element_type(&self) -> MapElementType {
        match self {
            Self::Zone { .. } => MapElementType::Zone,
            Self::Shape { .. } => MapElementType::Shape,
            Self::Place { .. } => MapElementType::Point,
        }
    }

    /// Flattens this typed payload into the common GeoJSON property bag
    /// required on every feature: `map_element_type`, `name`, `start_date`,
    /// `end_date`, plus `color_name|color_rgb|color_hex` for zones/shapes and
    /// `is_georeferenced`/`crs` for georeferenced outputs.
    #[must_use]
    pub fn to_geojson_properties(&self) -> Map<String, Value> {
        let common = self.common();
        let mut props = Map::new();
        props.insert(
            "map_element_type".into(),
            json!(self.map_element_type().as_str()),
        );
        props.insert("name".into(), json!(common.name));
        props.insert("start_date".into(), json!(common.start_date));
        props.insert("end_date".into(), json!(common.end_date));
        props.insert("is_pixel_space".into(), json!(common.is_pixel_space));
        props.insert("is_georeferenced".into(), json!(!common.is_pixel_space));
        if let Some(crs) = &common.crs {
            props.insert("crs".into(), json!(crs));
        }

        match self {
            Self::Zone {
                color_name,
                color_rgb,
                color_hex,
                ratio,
                ..
            } => {
                props.insert("color_name".into(), json!(color_name));
                props.insert("color_rgb".into(), json!([color_rgb.0, color_rgb.1, color_rgb.2]));
                props.insert("color_hex".into(), json!(color_hex));
                props.insert("ratio".into(), json!(ratio));
            }
            Self::Shape {
                color_rgb,
                color_hex,
                area,
                perimeter,
                aspect_ratio,
                extent,
                solidity,
                vertex_count,
                ..
            } => {
                props.insert("color_rgb".into(), json!([color_rgb.0, color_rgb.1, color_rgb.2]));
                props.insert("color_hex".into(), json!(color_hex));
                props.insert("area".into(), json!(area));
                props.insert("perimeter".into(), json!(perimeter));
                props.insert("aspect_ratio".into(), json!(aspect_ratio));
                props.insert("extent".into(), json!(extent));
                props.insert("solidity".into(), json!(solidity));
                props.insert("vertex_count".into(), json!(vertex_count));
            }
            Self::Place {
                token,
                found,
                confidence,
                ..
            } => {
                props.insert("token".into(), json!(token));
                props.insert("found".into(), json!(found));
                props.insert("confidence".into(), json!(confidence));
            }
        }

        for (k, v) in &common.annotations {
            props.insert(k.clone(), v.clone());
        }
        props
    }
}

/// A GeoJSON-shaped record: geometry plus a typed property bag.
///
/// Zone and shape features additionally carry a `unit_box`-normalized
/// copy of their polygon (translated to the origin, scaled so the longest
/// side is 1, centered in `[0,1]²`), so a caller can compare shapes across
/// images of different resolutions without re-deriving the normalization
/// itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// The feature's geometry, in whatever space it currently occupies
    /// (pixel-space until georeferenced, WGS84 after).
    pub geometry: FeatureGeometry,
    /// Unit-box-normalized copy of `geometry`, computed once at emission
    /// time and never transformed afterward. `None` for point features,
    /// which have no shape to normalize.
    pub unit_box: Option<FeatureGeometry>,
    /// The feature's typed properties.
    pub properties: FeatureProperties,
}

impl Feature {
    /// Builds a feature with no unit-box geometry (place points).
    #[must_use]
    pub const fn new(geometry: FeatureGeometry, properties: FeatureProperties) -> Self {
        Self { geometry, unit_box: None, properties }
    }

    /// Builds a feature carrying its unit-box-normalized geometry alongside
    /// the pixel-space one.
    #[must_use]
    pub const fn with_unit_box(geometry: FeatureGeometry, unit_box: FeatureGeometry, properties: FeatureProperties) -> Self {
        Self { geometry, unit_box: Some(unit_box), properties }
    }

    /// Converts to a [`geojson::Feature`], carrying `unit_box` (when
    /// present) as a foreign member alongside the standard `geometry` and
    /// `properties` members.
    #[must_use]
    pub fn to_geojson(&self) -> geojson::Feature {
        let foreign_members = self.unit_box.as_ref().map(|unit_box| {
            let mut members = geojson::JsonObject::new();
            members.insert(
                "unit_box_geometry".to_string(),
                serde_json::to_value(unit_box.to_geojson()).expect("geojson geometry always serializes"),
            );
            members
        });
        geojson::Feature {
            bbox: None,
            geometry: Some(self.geometry.to_geojson()),
            id: None,
            properties: Some(self.properties.to_geojson_properties()),
            foreign_members,
        }
    }
}

/// A stage's output: an ordered group of [`Feature`]s of one kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    /// Features, in the stage's deterministic rank order.
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Converts to a [`geojson::FeatureCollection`] ready for
    /// `{ "type": "FeatureCollection", "features": [...] }` serialization.
    #[must_use]
    pub fn to_geojson(&self) -> geojson::FeatureCollection {
        geojson::FeatureCollection {
            bbox: None,
            features: self.features.iter().map(Feature::to_geojson).collect(),
            foreign_members: None,
        }
    }

    /// Serializes directly to the persisted JSON payload shape.
    ///
    /// # Errors
    /// Returns an error if GeoJSON serialization fails (e.g. `NaN`/`Inf`
    /// coordinates, which should never occur for a well-formed pipeline).
    pub fn to_json_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.to_geojson())
    }
}
