//! Process-wide, read-only reference data: the place-name gazetteer and the
//! reference coastline used by the text and coastline stages.
//!
//! Both are expensive to build and never mutated once loaded, so they are
//! shared behind `Arc` and injected into the orchestrator once per process.
//! Tests substitute small in-memory fakes instead of the real gazetteer.

use std::sync::Arc;

use geo_types::MultiLineString;

/// One gazetteer entry: a canonical place name, its coordinates, and the
/// normalized key it is looked up by.
#[derive(Debug, Clone, PartialEq)]
pub struct GazetteerRecord {
    /// Canonical display name.
    pub name: String,
    /// Normalized lookup key (NFKD + ASCII-fold + casefold), as produced by
    /// [`crate::text::normalize_token`].
    pub normalized_key: String,
    /// Longitude, WGS84 degrees.
    pub lon: f64,
    /// Latitude, WGS84 degrees.
    pub lat: f64,
    /// Population, when known; used to rank multiple candidates under the
    /// same normalized key.
    pub population: Option<u64>,
}

/// The external gazetteer lookup.
///
/// Implementations may back this with a static list, a database, or a remote
/// service; the text resolver only requires exact normalized-key lookup.
pub trait GazetteerAdapter: Send + Sync {
    /// Looks up a normalized token, returning every candidate sharing that
    /// key (multiple cities can share a name).
    fn lookup(&self, normalized_key: &str) -> Vec<GazetteerRecord>;
}

/// A small in-memory [`GazetteerAdapter`] backed by a `Vec`, suitable for
/// tests and for embedding a static place list.
#[derive(Debug, Clone, Default)]
pub struct StaticGazetteer {
    records: Vec<GazetteerRecord>,
}

impl StaticGazetteer {
    /// Builds a gazetteer from already-normalized records.
    #[must_use]
    pub fn new(records: Vec<GazetteerRecord>) -> Self {
        Self { records }
    }
}

impl GazetteerAdapter for StaticGazetteer {
    fn lookup(&self, normalized_key: &str) -> Vec<GazetteerRecord> {
        self.records
            .iter()
            .filter(|r| r.normalized_key == normalized_key)
            .cloned()
            .collect()
    }
}

/// Shared, process-wide resources injected into the orchestrator.
///
/// Cloning a [`Resources`] is cheap: both fields are reference-counted.
#[derive(Clone)]
pub struct Resources {
    gazetteer: Arc<dyn GazetteerAdapter>,
    reference_coastline: Option<Arc<MultiLineString<f64>>>,
}

impl Resources {
    /// Builds a resource handle from an already-constructed gazetteer and an
    /// optional reference coastline.
    #[must_use]
    pub fn new(
        gazetteer: Arc<dyn GazetteerAdapter>,
        reference_coastline: Option<Arc<MultiLineString<f64>>>,
    ) -> Self {
        Self {
            gazetteer,
            reference_coastline,
        }
    }

    /// The gazetteer adapter.
    #[must_use]
    pub fn gazetteer(&self) -> &dyn GazetteerAdapter {
        self.gazetteer.as_ref()
    }

    /// The reference coastline, if one was loaded. Absent when the coastline
    /// stage is not configured to run.
    #[must_use]
    pub fn reference_coastline(&self) -> Option<&MultiLineString<f64>> {
        self.reference_coastline.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_gazetteer_matches_exact_normalized_key() {
        let gaz = StaticGazetteer::new(vec![GazetteerRecord {
            name: "Montreal".into(),
            normalized_key: "montreal".into(),
            lon: -73.5673,
            lat: 45.5017,
            population: Some(1_780_000),
        }]);
        let resources = Resources::new(Arc::new(gaz), None);
        let found = resources.gazetteer().lookup("montreal");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Montreal");
        assert!(resources.gazetteer().lookup("toronto").is_empty());
    }

    #[test]
    fn resources_without_coastline_reports_none() {
        let resources = Resources::new(Arc::new(StaticGazetteer::default()), None);
        assert!(resources.reference_coastline().is_none());
    }
}
