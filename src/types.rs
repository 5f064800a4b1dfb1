use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Mean Earth radius used for area approximations (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude (spherical approximation)
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Default for Polarization {
    fn default() -> Self {
        Polarization::VH
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(FloodError::InvalidParameter(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Orbit pass direction of the acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PassDirection {
    Ascending,
    Descending,
}

impl Default for PassDirection {
    fn default() -> Self {
        PassDirection::Descending
    }
}

impl std::fmt::Display for PassDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassDirection::Ascending => write!(f, "ASCENDING"),
            PassDirection::Descending => write!(f, "DESCENDING"),
        }
    }
}

/// Axis-aligned geographic rectangle (lon/lat, EPSG:4326)
///
/// Fields are private so the `xmin < xmax`, `ymin < ymax` invariant holds
/// for every value that exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionOfInterest {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl RegionOfInterest {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> FloodResult<Self> {
        if ![xmin, ymin, xmax, ymax].iter().all(|v| v.is_finite()) {
            return Err(FloodError::InvalidRegion(format!(
                "Bounding box coordinates must be finite: ({}, {}, {}, {})",
                xmin, ymin, xmax, ymax
            )));
        }
        if xmin < -180.0 || xmax > 180.0 || ymin < -90.0 || ymax > 90.0 {
            return Err(FloodError::InvalidRegion(format!(
                "Bounding box outside lon [-180, 180] / lat [-90, 90]: ({}, {}, {}, {})",
                xmin, ymin, xmax, ymax
            )));
        }
        if xmin >= xmax || ymin >= ymax {
            return Err(FloodError::InvalidRegion(format!(
                "Degenerate bounding box: xmin={} xmax={} ymin={} ymax={}",
                xmin, xmax, ymin, ymax
            )));
        }
        Ok(Self { xmin, ymin, xmax, ymax })
    }

    /// Parse the "xmin,ymin,xmax,ymax" form posted by clients
    pub fn from_bbox_str(bbox: &str) -> FloodResult<Self> {
        crate::core::selector::parse_bbox(bbox)
    }

    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    /// Corner tuple in `(xmin, ymin, xmax, ymax)` order
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.xmin, self.ymin, self.xmax, self.ymax)
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.xmin && lon <= self.xmax && lat >= self.ymin && lat <= self.ymax
    }

    pub fn intersects(&self, other: &RegionOfInterest) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    /// Closed exterior ring, counter-clockwise
    pub fn ring(&self) -> Vec<[f64; 2]> {
        vec![
            [self.xmin, self.ymin],
            [self.xmax, self.ymin],
            [self.xmax, self.ymax],
            [self.xmin, self.ymax],
            [self.xmin, self.ymin],
        ]
    }
}

/// Ordered date range, `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimePeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimePeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> FloodResult<Self> {
        if start > end {
            return Err(FloodError::InvalidPeriod(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse two ISO calendar dates (`YYYY-MM-DD`)
    pub fn parse(start: &str, end: &str) -> FloodResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| {
                FloodError::InvalidPeriod(format!("Malformed date '{}': {}", s, e))
            })
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Half-open membership test, matching the remote date filter
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

impl std::fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Opaque URL template of a remotely rendered map layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileReference(pub String);

impl TileReference {
    pub fn url_format(&self) -> &str {
        &self.0
    }
}

/// GeoJSON geometry subset returned by vectorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Polygon(Vec<Vec<[f64; 2]>>),
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
}

impl Geometry {
    /// Approximate area in square meters
    ///
    /// Each ring is projected onto a local equirectangular plane centred on
    /// its mean latitude. Holes are subtracted.
    pub fn area_m2(&self) -> f64 {
        match self {
            Geometry::Polygon(rings) => polygon_area_m2(rings),
            Geometry::MultiPolygon(polygons) => polygons.iter().map(|p| polygon_area_m2(p)).sum(),
        }
    }

    /// Well-known-text representation, always as a MULTIPOLYGON
    pub fn to_wkt(&self) -> String {
        let polygons: Vec<&Vec<Vec<[f64; 2]>>> = match self {
            Geometry::Polygon(rings) => vec![rings],
            Geometry::MultiPolygon(polygons) => polygons.iter().collect(),
        };

        let body = polygons
            .iter()
            .map(|rings| {
                let rings = rings
                    .iter()
                    .map(|ring| {
                        let coords = ring
                            .iter()
                            .map(|[x, y]| format!("{} {}", x, y))
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("({})", coords)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", rings)
            })
            .collect::<Vec<_>>()
            .join(", ");

        if body.is_empty() {
            "MULTIPOLYGON EMPTY".to_string()
        } else {
            format!("MULTIPOLYGON ({})", body)
        }
    }
}

fn polygon_area_m2(rings: &[Vec<[f64; 2]>]) -> f64 {
    let mut rings = rings.iter();
    let exterior = rings.next().map(|r| ring_area_m2(r)).unwrap_or(0.0);
    let holes: f64 = rings.map(|r| ring_area_m2(r)).sum();
    (exterior - holes).max(0.0)
}

fn ring_area_m2(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mean_lat = ring.iter().map(|p| p[1]).sum::<f64>() / ring.len() as f64;
    let kx = METERS_PER_DEGREE * mean_lat.to_radians().cos();
    let ky = METERS_PER_DEGREE;

    // Shoelace
    let mut twice_area = 0.0;
    for pair in ring.windows(2) {
        let (x0, y0) = (pair[0][0] * kx, pair[0][1] * ky);
        let (x1, y1) = (pair[1][0] * kx, pair[1][1] * ky);
        twice_area += x0 * y1 - x1 * y0;
    }
    (twice_area / 2.0).abs()
}

/// A single vectorized feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

fn feature_type() -> String {
    "Feature".to_string()
}

impl Feature {
    pub fn new(geometry: Geometry, label: i64) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("label".to_string(), serde_json::Value::from(label));
        Self {
            kind: feature_type(),
            geometry,
            properties,
        }
    }

    /// Class value of the feature, if present and integral
    pub fn label(&self) -> Option<i64> {
        self.properties.get("label").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        })
    }
}

/// GeoJSON-shaped feature collection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: collection_type(),
            features,
        }
    }

    /// Keep only features carrying the given label
    pub fn with_label(self, label: i64) -> Self {
        let features = self
            .features
            .into_iter()
            .filter(|f| f.label() == Some(label))
            .collect();
        Self::new(features)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn total_area_m2(&self) -> f64 {
        self.features.iter().map(|f| f.geometry.area_m2()).sum()
    }
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Empty image collection: {0}")]
    EmptyCollection(String),

    #[error("Remote compute error: {message}")]
    RemoteCompute { message: String, retryable: bool },

    #[error("Remote compute timed out after {0:?}")]
    RemoteComputeTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FloodError {
    /// Permanent remote failure
    pub fn remote(message: impl Into<String>) -> Self {
        FloodError::RemoteCompute {
            message: message.into(),
            retryable: false,
        }
    }

    /// Transient remote failure, safe to retry for idempotent calls
    pub fn transient(message: impl Into<String>) -> Self {
        FloodError::RemoteCompute {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FloodError::RemoteCompute { retryable: true, .. } | FloodError::RemoteComputeTimeout(_)
        )
    }

    /// Input-validation failures that the caller can fix
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FloodError::InvalidRegion(_)
                | FloodError::InvalidPeriod(_)
                | FloodError::InvalidParameter(_)
        )
    }
}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;

/// Point in time after which the result of a request is no longer wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    /// Expires `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            at: None,
            budget: Duration::MAX,
        }
    }

    /// Time granted when the deadline was set
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }

    /// `RemoteComputeTimeout` once the deadline has passed
    pub fn check(&self) -> FloodResult<()> {
        if self.is_expired() {
            Err(FloodError::RemoteComputeTimeout(self.budget))
        } else {
            Ok(())
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_region_rejects_degenerate_boxes() {
        assert!(RegionOfInterest::new(10.0, 45.0, 10.5, 45.5).is_ok());
        assert!(matches!(
            RegionOfInterest::new(10.5, 45.0, 10.0, 45.5),
            Err(FloodError::InvalidRegion(_))
        ));
        assert!(matches!(
            RegionOfInterest::new(10.0, 45.0, 10.0, 45.5),
            Err(FloodError::InvalidRegion(_))
        ));
        assert!(matches!(
            RegionOfInterest::new(f64::NAN, 45.0, 10.0, 45.5),
            Err(FloodError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_deadline_expiry() {
        let open = Deadline::unbounded();
        assert!(!open.is_expired());
        assert_eq!(open.remaining(), None);
        assert!(open.check().is_ok());

        let expired = Deadline::after(Duration::ZERO);
        assert!(expired.is_expired());
        assert_eq!(expired.remaining(), Some(Duration::ZERO));
        assert!(matches!(
            expired.check(),
            Err(FloodError::RemoteComputeTimeout(d)) if d == Duration::ZERO
        ));

        let later = Deadline::after(Duration::from_secs(3600));
        assert!(later.check().is_ok());
        assert!(later.remaining().unwrap() > Duration::from_secs(3500));
    }

    #[test]
    fn test_region_rejects_out_of_range_coordinates() {
        assert!(RegionOfInterest::new(-180.0, -90.0, 180.0, 90.0).is_ok());
        for (xmin, ymin, xmax, ymax) in [
            (-200.0, 45.0, 10.0, 46.0),
            (10.0, 45.0, 181.0, 46.0),
            (10.0, -95.0, 11.0, 45.0),
            (10.0, 45.0, 11.0, 90.5),
        ] {
            assert!(
                matches!(
                    RegionOfInterest::new(xmin, ymin, xmax, ymax),
                    Err(FloodError::InvalidRegion(_))
                ),
                "({xmin}, {ymin}, {xmax}, {ymax}) should be rejected"
            );
        }
    }

    #[test]
    fn test_period_parsing() {
        let period = TimePeriod::parse("2020-01-01", "2020-01-31").unwrap();
        assert_eq!(period.start(), NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert!(period.contains(NaiveDate::from_ymd_opt(2020, 1, 30).unwrap()));
        assert!(!period.contains(NaiveDate::from_ymd_opt(2020, 1, 31).unwrap()));

        assert!(matches!(
            TimePeriod::parse("2020-02-01", "2020-01-01"),
            Err(FloodError::InvalidPeriod(_))
        ));
        assert!(matches!(
            TimePeriod::parse("2020-13-01", "2020-12-31"),
            Err(FloodError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_geometry_area_and_wkt() {
        // 0.01 x 0.01 degree square on the equator, about 1.236 km2
        let square = Geometry::Polygon(vec![vec![
            [0.0, 0.0],
            [0.01, 0.0],
            [0.01, 0.01],
            [0.0, 0.01],
            [0.0, 0.0],
        ]]);
        let expected = (0.01 * METERS_PER_DEGREE) * (0.01 * METERS_PER_DEGREE);
        assert_relative_eq!(square.area_m2(), expected, max_relative = 1e-4);

        let wkt = square.to_wkt();
        assert!(wkt.starts_with("MULTIPOLYGON (((0 0, 0.01 0"));
        assert_eq!(Geometry::MultiPolygon(vec![]).to_wkt(), "MULTIPOLYGON EMPTY");
    }

    #[test]
    fn test_feature_collection_label_filter() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}, "properties": {"label": 1}},
                {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}, "properties": {"label": 0}},
                {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}, "properties": {"label": 1.0}}
            ]
        }"#;
        let collection: FeatureCollection = serde_json::from_str(json).unwrap();
        assert_eq!(collection.len(), 3);
        let flooded = collection.with_label(1);
        assert_eq!(flooded.len(), 2);
    }
}
