use crate::compute::{GeoCompute, ReduceOptions};
use crate::types::{FeatureCollection, FloodResult, RegionOfInterest};
use serde::{Deserialize, Serialize};

/// Class value of flooded polygons
pub const FLOOD_LABEL: i64 = 1;

/// Vectorization parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeParams {
    pub reduce: ReduceOptions,
}

/// Converts a flood mask into labelled polygons
pub struct Vectorizer {
    options: ReduceOptions,
}

impl Vectorizer {
    pub fn new(options: ReduceOptions) -> Self {
        Self { options }
    }

    /// All classes: masked pixels become 0 (not flooded) before polygonizing
    pub fn vectorize<C: GeoCompute>(
        &self,
        engine: &C,
        flood_mask: &C::Image,
        region: &RegionOfInterest,
    ) -> FloodResult<FeatureCollection> {
        let filled = engine.unmask(flood_mask, 0.0)?;
        let features = engine.reduce_to_vectors(&filled, region, &self.options)?;
        log::debug!("Vectorized mask into {} features", features.len());
        Ok(features)
    }

    /// Only the flooded polygons, as exported
    pub fn flooded_features<C: GeoCompute>(
        &self,
        engine: &C,
        flood_mask: &C::Image,
        region: &RegionOfInterest,
    ) -> FloodResult<FeatureCollection> {
        let flooded = self.vectorize(engine, flood_mask, region)?.with_label(FLOOD_LABEL);
        log::info!("{} flooded polygons", flooded.len());
        Ok(flooded)
    }
}
