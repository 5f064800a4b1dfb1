use crate::compute::{CollectionQuery, GeoCompute};
use crate::types::{
    FloodError, FloodResult, PassDirection, Polarization, RegionOfInterest, TimePeriod,
};
use serde::{Deserialize, Serialize};

/// Sentinel-1 ground range detected scenes
pub const S1_GRD_COLLECTION: &str = "COPERNICUS/S1_GRD";

/// Collection filtering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionFilterParams {
    pub collection_id: String,
    /// Acquisition mode, Interferometric Wide swath by default
    pub instrument_mode: String,
    pub polarization: Polarization,
    pub pass_direction: PassDirection,
    pub resolution_meters: u32,
    /// Query and log tile counts and date ranges; empty periods become errors
    pub diagnostics: bool,
}

impl Default for CollectionFilterParams {
    fn default() -> Self {
        Self {
            collection_id: S1_GRD_COLLECTION.to_string(),
            instrument_mode: "IW".to_string(),
            polarization: Polarization::VH,
            pass_direction: PassDirection::Descending,
            resolution_meters: 10,
            diagnostics: false,
        }
    }
}

impl CollectionFilterParams {
    pub fn query(&self) -> CollectionQuery {
        CollectionQuery {
            collection_id: self.collection_id.clone(),
            instrument_mode: self.instrument_mode.clone(),
            polarization: self.polarization,
            pass_direction: self.pass_direction,
            resolution_meters: self.resolution_meters,
        }
    }
}

/// Mosaic of one period's scenes, clipped to the region
#[derive(Debug, Clone)]
pub struct ImageMosaic<I> {
    pub image: I,
    pub polarization: Polarization,
    pub period: TimePeriod,
}

impl<I> ImageMosaic<I> {
    /// Same period and band, different pixels
    pub fn with_image(&self, image: I) -> Self {
        Self {
            image,
            polarization: self.polarization,
            period: self.period,
        }
    }

    pub fn band(&self) -> String {
        self.polarization.to_string()
    }
}

/// Selects before/after mosaics from the source collection
pub struct CollectionFilter {
    params: CollectionFilterParams,
}

impl CollectionFilter {
    pub fn new(params: CollectionFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CollectionFilterParams {
        &self.params
    }

    /// Build the (before, after) mosaics
    ///
    /// An empty period yields a mosaic without valid pixels unless
    /// diagnostics are enabled, in which case it is an error.
    pub fn select_mosaics<C: GeoCompute>(
        &self,
        engine: &C,
        region: &RegionOfInterest,
        base_period: &TimePeriod,
        flood_period: &TimePeriod,
    ) -> FloodResult<(ImageMosaic<C::Image>, ImageMosaic<C::Image>)> {
        log::info!(
            "Selecting {} {} scenes ({} pass, {} m) for {} and {}",
            self.params.collection_id,
            self.params.polarization,
            self.params.pass_direction,
            self.params.resolution_meters,
            base_period,
            flood_period
        );
        let collection = engine.filter_collection(&self.params.query(), region)?;

        let (before, after) = rayon::join(
            || self.period_mosaic(engine, &collection, region, base_period, "Before flood"),
            || self.period_mosaic(engine, &collection, region, flood_period, "After flood"),
        );
        Ok((before?, after?))
    }

    fn period_mosaic<C: GeoCompute>(
        &self,
        engine: &C,
        collection: &C::Collection,
        region: &RegionOfInterest,
        period: &TimePeriod,
        label: &str,
    ) -> FloodResult<ImageMosaic<C::Image>> {
        let subset = engine.filter_date(collection, period)?;

        if self.params.diagnostics {
            self.report(engine, &subset, period, label)?;
        }

        let mosaic = engine.mosaic(&subset)?;
        let clipped = engine.clip(&mosaic, region)?;
        Ok(ImageMosaic {
            image: clipped,
            polarization: self.params.polarization,
            period: *period,
        })
    }

    fn report<C: GeoCompute>(
        &self,
        engine: &C,
        subset: &C::Collection,
        period: &TimePeriod,
        label: &str,
    ) -> FloodResult<()> {
        let count = engine.collection_size(subset)?;
        if count == 0 {
            return Err(FloodError::EmptyCollection(format!(
                "{}: no {} scenes between {} and {}",
                label,
                self.params.polarization,
                period.start(),
                period.end()
            )));
        }
        match engine.date_range(subset)? {
            Some((first, last)) => {
                log::info!("Tiles selected: {} ({}) from {} to {}", label, count, first, last)
            }
            None => log::info!("Tiles selected: {} ({})", label, count),
        }
        Ok(())
    }
}
