use crate::compute::{GeoCompute, VisParams};
use crate::types::{FloodResult, TileReference};
use serde::{Deserialize, Serialize};

/// Rendering of each published layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayParams {
    /// Backscatter mosaics, grey ramp in dB
    pub s1_img: VisParams,
    /// Change ratio layer
    pub diff_s1: VisParams,
    pub flood: VisParams,
}

impl Default for DisplayParams {
    fn default() -> Self {
        Self {
            s1_img: VisParams::range(-25.0, 0.0),
            diff_s1: VisParams::range(0.0, 2.0),
            flood: VisParams::palette(&["0000FF"]),
        }
    }
}

/// Tile URL templates returned by the display endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayLayers {
    pub before_flood: TileReference,
    pub after_flood: TileReference,
    pub s1_fresults_id: TileReference,
}

pub struct DisplayAdapter {
    params: DisplayParams,
}

impl DisplayAdapter {
    pub fn new(params: DisplayParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DisplayParams {
        &self.params
    }

    /// Register the two mosaics and the flood mask with the tile service
    pub fn render<C: GeoCompute>(
        &self,
        engine: &C,
        before: &C::Image,
        after: &C::Image,
        flood_mask: &C::Image,
    ) -> FloodResult<DisplayLayers> {
        let layers = DisplayLayers {
            before_flood: engine.visualize(before, &self.params.s1_img)?,
            after_flood: engine.visualize(after, &self.params.s1_img)?,
            s1_fresults_id: engine.visualize(flood_mask, &self.params.flood)?,
        };
        log::debug!("Registered display layers: {:?}", layers);
        Ok(layers)
    }

    /// Tile layer of the after/before ratio
    pub fn render_difference<C: GeoCompute>(
        &self,
        engine: &C,
        difference: &C::Image,
    ) -> FloodResult<TileReference> {
        engine.visualize(difference, &self.params.diff_s1)
    }
}
