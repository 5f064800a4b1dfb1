use crate::compute::{GeoCompute, ReduceOptions};
use crate::types::{FloodResult, RegionOfInterest};
use serde::{Deserialize, Serialize};

pub const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

/// Flood area statistics parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsParams {
    /// Compute the flooded area as part of every estimation
    pub enabled: bool,
    pub reduce: ReduceOptions,
}

impl Default for StatisticsParams {
    fn default() -> Self {
        Self {
            enabled: true,
            reduce: ReduceOptions::default(),
        }
    }
}

/// Round an area in square meters to whole hectares
pub fn square_meters_to_hectares(square_meters: f64) -> u64 {
    (square_meters.max(0.0) / SQUARE_METERS_PER_HECTARE).round() as u64
}

/// Sums pixel areas of a flood mask
///
/// With `best_effort` the remote engine may coarsen the scale on large
/// regions, so the figure is approximate there.
pub struct StatisticsAggregator {
    options: ReduceOptions,
}

impl StatisticsAggregator {
    pub fn new(options: ReduceOptions) -> Self {
        Self { options }
    }

    /// Flooded area inside `region` in hectares
    pub fn flood_area_hectares<C: GeoCompute>(
        &self,
        engine: &C,
        flood_mask: &C::Image,
        band: &str,
        region: &RegionOfInterest,
    ) -> FloodResult<u64> {
        let flood_band = engine.select(flood_mask, band)?;
        let pixel_area = engine.multiply(&flood_band, &engine.pixel_area()?)?;
        let square_meters = engine
            .reduce_sum(&pixel_area, band, region, &self.options)?
            .unwrap_or(0.0);
        let hectares = square_meters_to_hectares(square_meters);
        log::info!(
            "Flooded area: {} ha ({:.0} m2, scale {} m, best effort {})",
            hectares,
            square_meters,
            self.options.scale,
            self.options.best_effort
        );
        Ok(hectares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hectare_conversion() {
        assert_eq!(square_meters_to_hectares(0.0), 0);
        assert_eq!(square_meters_to_hectares(14_999.0), 1);
        assert_eq!(square_meters_to_hectares(15_000.0), 2);
        assert_eq!(square_meters_to_hectares(-3.0), 0);
    }
}
