//! SARflood: Sentinel-1 change-detection flood mapping
//!
//! Given a bounding box, a flood-free reference period, an event period and
//! a backscatter ratio threshold, the service estimates the flooded area and
//! returns display tiles or a GeoPackage of flood polygons. Raster algebra
//! runs on a [`compute::GeoCompute`] engine; this crate assembles and
//! validates the processing chain.

pub mod types;
pub mod compute;
pub mod core;
pub mod io;
pub mod config;
pub mod server;

// Re-export main types and functions for easier access
pub use types::{
    Deadline, Feature, FeatureCollection, FloodError, FloodResult, Geometry, PassDirection, Polarization,
    RegionOfInterest, TileReference, TimePeriod,
};

pub use compute::GeoCompute;
pub use config::FloodConfig;
pub use core::{DisplayLayers, FloodEstimationContext, FloodPipeline, FloodRequest, PipelineParams};
