use crate::compute::{GeoCompute, KernelShape};
use crate::core::collection::ImageMosaic;
use crate::types::{FloodError, FloodResult};
use serde::{Deserialize, Serialize};

/// Speckle smoothing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeckleParams {
    /// Neighborhood radius in meters
    pub radius_m: f64,
    pub kernel: KernelShape,
}

impl Default for SpeckleParams {
    fn default() -> Self {
        Self {
            radius_m: 50.0,
            kernel: KernelShape::Circle,
        }
    }
}

/// Focal-mean speckle smoother
pub struct SpeckleSmoother {
    params: SpeckleParams,
}

impl SpeckleSmoother {
    pub fn new(params: SpeckleParams) -> FloodResult<Self> {
        if !params.radius_m.is_finite() || params.radius_m < 0.0 {
            return Err(FloodError::InvalidParameter(format!(
                "Smoothing radius must be a non-negative distance, got {}",
                params.radius_m
            )));
        }
        Ok(Self { params })
    }

    pub fn smooth<C: GeoCompute>(
        &self,
        engine: &C,
        mosaic: &ImageMosaic<C::Image>,
    ) -> FloodResult<ImageMosaic<C::Image>> {
        log::debug!(
            "Applying {} m {:?} focal mean to {} mosaic",
            self.params.radius_m,
            self.params.kernel,
            mosaic.period
        );
        let smoothed = engine.focal_mean(&mosaic.image, self.params.radius_m, self.params.kernel)?;
        Ok(mosaic.with_image(smoothed))
    }

    /// Smooth both mosaics; the two filters share nothing and run concurrently
    pub fn smooth_pair<C: GeoCompute>(
        &self,
        engine: &C,
        before: &ImageMosaic<C::Image>,
        after: &ImageMosaic<C::Image>,
    ) -> FloodResult<(ImageMosaic<C::Image>, ImageMosaic<C::Image>)> {
        let (before, after) = rayon::join(|| self.smooth(engine, before), || self.smooth(engine, after));
        Ok((before?, after?))
    }
}
