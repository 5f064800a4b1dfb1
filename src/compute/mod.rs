//! Geospatial compute capabilities
//!
//! The flood pipeline never touches pixels itself. It composes calls on a
//! [`GeoCompute`] engine, which may evaluate lazily on a remote service
//! ([`earthengine::EarthEngineClient`]) or eagerly in memory
//! ([`memory::InMemoryCompute`]).

pub mod earthengine;
pub mod memory;

use crate::types::{
    FeatureCollection, FloodResult, PassDirection, Polarization, RegionOfInterest, TileReference,
    TimePeriod,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Metadata predicate applied to the source image collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    /// Source collection identifier
    pub collection_id: String,
    /// Instrument mode, e.g. "IW"
    pub instrument_mode: String,
    /// Polarization band that must be present and is selected
    pub polarization: Polarization,
    /// Orbit pass direction
    pub pass_direction: PassDirection,
    /// Nominal pixel resolution in meters
    pub resolution_meters: u32,
}

/// Neighborhood shape for focal operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    Circle,
    Square,
}

impl KernelShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelShape::Circle => "circle",
            KernelShape::Square => "square",
        }
    }
}

/// Pixelwise comparison against a constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
}

impl Comparison {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
        }
    }

    /// Remote function suffix (`Image.gt`, `Image.gte`, `Image.lt`)
    pub fn function_name(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => "gt",
            Comparison::GreaterOrEqual => "gte",
            Comparison::LessThan => "lt",
        }
    }
}

/// Options shared by region reductions and vectorization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReduceOptions {
    /// Nominal scale in meters
    pub scale: f64,
    /// Let the engine coarsen the scale when the pixel budget is exceeded
    pub best_effort: bool,
    /// Pixel budget of a single reduction
    pub max_pixels: u64,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            scale: 10.0,         // native Sentinel-1 GRD resolution
            best_effort: true,
            max_pixels: 10_000_000,
        }
    }
}

/// Rendering parameters for a tile layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisParams {
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default)]
    pub palette: Vec<String>,
}

impl VisParams {
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            palette: Vec::new(),
        }
    }

    pub fn palette(colors: &[&str]) -> Self {
        Self {
            min: None,
            max: None,
            palette: colors.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Capability set of a geospatial compute engine
///
/// Handles are cheap to clone. Engines that evaluate lazily may defer all
/// errors to the calls that materialize a value (`collection_size`,
/// `reduce_sum`, `reduce_to_vectors`, `visualize`).
pub trait GeoCompute: Send + Sync {
    /// Handle to an image collection
    type Collection: Clone + Send + Sync;
    /// Handle to a single image
    type Image: Clone + Send + Sync;

    /// Load the source collection restricted by metadata and bounds
    fn filter_collection(
        &self,
        query: &CollectionQuery,
        region: &RegionOfInterest,
    ) -> FloodResult<Self::Collection>;

    /// Restrict a collection to acquisitions inside `period`
    fn filter_date(
        &self,
        collection: &Self::Collection,
        period: &TimePeriod,
    ) -> FloodResult<Self::Collection>;

    /// Number of images in a collection
    fn collection_size(&self, collection: &Self::Collection) -> FloodResult<usize>;

    /// First and last acquisition dates, `None` when empty
    fn date_range(
        &self,
        collection: &Self::Collection,
    ) -> FloodResult<Option<(NaiveDate, NaiveDate)>>;

    /// Composite a collection into one image, later acquisitions on top
    fn mosaic(&self, collection: &Self::Collection) -> FloodResult<Self::Image>;

    fn clip(&self, image: &Self::Image, region: &RegionOfInterest) -> FloodResult<Self::Image>;

    /// Neighborhood mean, radius in meters
    fn focal_mean(
        &self,
        image: &Self::Image,
        radius_m: f64,
        shape: KernelShape,
    ) -> FloodResult<Self::Image>;

    /// Pixelwise `numerator / denominator`; zero or missing divisors are masked
    fn divide(&self, numerator: &Self::Image, denominator: &Self::Image)
        -> FloodResult<Self::Image>;

    fn multiply(&self, a: &Self::Image, b: &Self::Image) -> FloodResult<Self::Image>;

    /// Binary 1/0 image from a comparison with a constant
    fn compare(&self, image: &Self::Image, op: Comparison, value: f64) -> FloodResult<Self::Image>;

    /// Replace pixels where `condition` is non-zero with `value`
    fn where_(
        &self,
        image: &Self::Image,
        condition: &Self::Image,
        value: f64,
    ) -> FloodResult<Self::Image>;

    /// Mask out pixels where `mask` is zero or masked
    fn update_mask(&self, image: &Self::Image, mask: &Self::Image) -> FloodResult<Self::Image>;

    /// Size of each pixel's 8-connected same-value component, capped at `max_size`
    fn connected_pixel_count(&self, image: &Self::Image, max_size: u32)
        -> FloodResult<Self::Image>;

    /// Load a single band of a static asset
    fn load_image(&self, asset_id: &str, band: &str) -> FloodResult<Self::Image>;

    /// Terrain slope in degrees from an elevation image
    fn slope(&self, elevation: &Self::Image) -> FloodResult<Self::Image>;

    /// Area of each pixel in square meters
    fn pixel_area(&self) -> FloodResult<Self::Image>;

    fn select(&self, image: &Self::Image, band: &str) -> FloodResult<Self::Image>;

    /// Fill masked pixels with `value`
    fn unmask(&self, image: &Self::Image, value: f64) -> FloodResult<Self::Image>;

    /// Sum of valid pixels inside `region`; `None` when nothing was summed
    fn reduce_sum(
        &self,
        image: &Self::Image,
        band: &str,
        region: &RegionOfInterest,
        options: &ReduceOptions,
    ) -> FloodResult<Option<f64>>;

    /// Polygonize connected same-value regions, labelled by value
    fn reduce_to_vectors(
        &self,
        image: &Self::Image,
        region: &RegionOfInterest,
        options: &ReduceOptions,
    ) -> FloodResult<FeatureCollection>;

    /// Register a rendered layer with the tile service
    fn visualize(&self, image: &Self::Image, params: &VisParams) -> FloodResult<TileReference>;
}
