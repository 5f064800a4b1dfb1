use crate::compute::{Comparison, GeoCompute};
use crate::types::{FloodError, FloodResult};
use serde::{Deserialize, Serialize};

/// Parameters of the false-positive filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementParams {
    /// Surface water occurrence asset
    pub surface_water_asset: String,
    pub seasonality_band: String,
    /// Months of water per year from which a cell is permanent water
    pub permanent_water_months: f64,
    /// Minimum 8-connected component size a flood pixel must belong to
    pub min_connected_pixels: u32,
    /// Cap handed to the connected-pixel counter
    pub connected_max_size: u32,
    /// Elevation model used to derive slope
    pub elevation_asset: String,
    pub elevation_band: String,
    /// Steepest terrain (degrees) on which flooding is accepted
    pub max_slope_degrees: f64,
}

impl Default for RefinementParams {
    fn default() -> Self {
        Self {
            surface_water_asset: "JRC/GSW1_0/GlobalSurfaceWater".to_string(),
            seasonality_band: "seasonality".to_string(),
            permanent_water_months: 10.0,
            // trades small real patches for much less speckle noise
            min_connected_pixels: 8,
            connected_max_size: 100,
            elevation_asset: "WWF/HydroSHEDS/03VFDEM".to_string(),
            elevation_band: "b1".to_string(),
            max_slope_degrees: 5.0,
        }
    }
}

/// Removes implausible flood pixels from a change mask
///
/// Every step is a mask intersection: pixels can only leave the flood
/// mask, never enter it.
pub struct MaskRefiner {
    params: RefinementParams,
}

impl MaskRefiner {
    pub fn new(params: RefinementParams) -> FloodResult<Self> {
        if params.min_connected_pixels > params.connected_max_size {
            return Err(FloodError::InvalidParameter(format!(
                "min_connected_pixels ({}) exceeds connected_max_size ({})",
                params.min_connected_pixels, params.connected_max_size
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &RefinementParams {
        &self.params
    }

    /// Apply permanent water, connectivity and slope filters in order
    pub fn refine<C: GeoCompute>(&self, engine: &C, binary: &C::Image) -> FloodResult<C::Image> {
        let flooded = self.exclude_permanent_water(engine, binary)?;
        let flooded = self.filter_connectivity(engine, &flooded)?;
        self.filter_slope(engine, &flooded)
    }

    /// Zero flood pixels on permanent water, then keep only positive pixels
    pub fn exclude_permanent_water<C: GeoCompute>(
        &self,
        engine: &C,
        binary: &C::Image,
    ) -> FloodResult<C::Image> {
        log::debug!(
            "Excluding permanent water (>= {} months/year)",
            self.params.permanent_water_months
        );
        let seasonality =
            engine.load_image(&self.params.surface_water_asset, &self.params.seasonality_band)?;
        let permanent = engine.compare(
            &seasonality,
            Comparison::GreaterOrEqual,
            self.params.permanent_water_months,
        )?;
        let permanent = engine.update_mask(&permanent, &permanent)?;

        let zeroed = engine.where_(binary, &permanent, 0.0)?;
        engine.update_mask(&zeroed, &zeroed)
    }

    /// Drop flood pixels belonging to small connected components
    pub fn filter_connectivity<C: GeoCompute>(
        &self,
        engine: &C,
        flooded: &C::Image,
    ) -> FloodResult<C::Image> {
        log::debug!(
            "Keeping components of at least {} pixels",
            self.params.min_connected_pixels
        );
        let connections = engine.connected_pixel_count(flooded, self.params.connected_max_size)?;
        let connected = engine.compare(
            &connections,
            Comparison::GreaterOrEqual,
            self.params.min_connected_pixels as f64,
        )?;
        engine.update_mask(flooded, &connected)
    }

    /// Drop flood pixels on steep terrain
    pub fn filter_slope<C: GeoCompute>(
        &self,
        engine: &C,
        flooded: &C::Image,
    ) -> FloodResult<C::Image> {
        log::debug!("Masking terrain steeper than {} degrees", self.params.max_slope_degrees);
        let elevation = engine.load_image(&self.params.elevation_asset, &self.params.elevation_band)?;
        let slope = engine.slope(&elevation)?;
        let gentle = engine.compare(&slope, Comparison::LessThan, self.params.max_slope_degrees)?;
        engine.update_mask(flooded, &gentle)
    }
}
