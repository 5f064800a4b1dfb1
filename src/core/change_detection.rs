use crate::compute::{Comparison, GeoCompute};
use crate::core::collection::ImageMosaic;
use crate::types::{FloodError, FloodResult};

/// Default after/before ratio above which a pixel counts as changed
pub const DEFAULT_DIFFERENCE_THRESHOLD: f64 = 1.25;

/// Ratio layer and its thresholded binary mask
#[derive(Debug, Clone)]
pub struct ChangeDetection<I> {
    /// after / before, masked where undefined
    pub difference: I,
    /// 1 where `difference > threshold`, 0 elsewhere, masked where undefined
    pub binary: I,
}

/// Ratio-based change detector
///
/// A fixed multiplicative threshold on the backscatter ratio. This is a
/// heuristic, not a statistical test: it carries no false-alarm rate and
/// depends on the reference period being flood-free.
pub struct ChangeDetector {
    threshold: f64,
}

impl ChangeDetector {
    pub fn new(threshold: f64) -> FloodResult<Self> {
        if threshold.is_nan() {
            return Err(FloodError::InvalidParameter(
                "Change threshold must not be NaN".to_string(),
            ));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect<C: GeoCompute>(
        &self,
        engine: &C,
        before: &ImageMosaic<C::Image>,
        after: &ImageMosaic<C::Image>,
    ) -> FloodResult<ChangeDetection<C::Image>> {
        log::info!(
            "Change detection {} vs {} with ratio threshold {}",
            after.period,
            before.period,
            self.threshold
        );
        // Zero or missing reference pixels come back masked, never flagged
        let difference = engine.divide(&after.image, &before.image)?;
        let binary = engine.compare(&difference, Comparison::GreaterThan, self.threshold)?;
        Ok(ChangeDetection { difference, binary })
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DIFFERENCE_THRESHOLD,
        }
    }
}
