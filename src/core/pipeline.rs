//! Change-detection flood estimation
//!
//! [`FloodPipeline`] strings the stages together for one request:
//! collection selection, speckle smoothing, ratio change detection, mask
//! refinement and, depending on the caller, area statistics, vectors or
//! display tiles. The intermediate products travel in a
//! [`FloodEstimationContext`] that each stage extends.

use crate::compute::GeoCompute;
use crate::core::change_detection::ChangeDetector;
use crate::core::collection::{CollectionFilter, CollectionFilterParams, ImageMosaic};
use crate::core::display::{DisplayAdapter, DisplayLayers, DisplayParams};
use crate::core::mask_refine::{MaskRefiner, RefinementParams};
use crate::core::selector::FloodRequest;
use crate::core::speckle::{SpeckleParams, SpeckleSmoother};
use crate::core::statistics::{StatisticsAggregator, StatisticsParams};
use crate::core::vectorize::{VectorizeParams, Vectorizer};
use crate::io::gpkg;
use crate::types::{
    Deadline, FeatureCollection, FloodError, FloodResult, Polarization, RegionOfInterest,
    TileReference, TimePeriod,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Parameters of every pipeline stage
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub collection: CollectionFilterParams,
    pub speckle: SpeckleParams,
    pub refinement: RefinementParams,
    pub statistics: StatisticsParams,
    pub vectorize: VectorizeParams,
    pub display: DisplayParams,
}

/// Intermediate products of one estimation
///
/// Created from the smoothed mosaics; later stages fill the optional
/// fields through the `with_*` builders, which never replace a value that
/// is already present.
#[derive(Debug, Clone)]
pub struct FloodEstimationContext<I> {
    pub before_flood: ImageMosaic<I>,
    pub after_flood: ImageMosaic<I>,
    pub region: RegionOfInterest,
    pub base_period: TimePeriod,
    pub flood_period: TimePeriod,
    pub polarization: Polarization,
    /// after / before ratio
    pub difference: Option<I>,
    /// Refined binary flood mask
    pub flood_results: Option<I>,
    /// Flooded area in hectares
    pub flood_area_stats: Option<u64>,
}

impl<I> FloodEstimationContext<I> {
    pub fn new(
        before_flood: ImageMosaic<I>,
        after_flood: ImageMosaic<I>,
        region: RegionOfInterest,
    ) -> Self {
        let base_period = before_flood.period;
        let flood_period = after_flood.period;
        let polarization = after_flood.polarization;
        Self {
            before_flood,
            after_flood,
            region,
            base_period,
            flood_period,
            polarization,
            difference: None,
            flood_results: None,
            flood_area_stats: None,
        }
    }

    pub fn with_difference(mut self, difference: I) -> Self {
        if self.difference.is_none() {
            self.difference = Some(difference);
        } else {
            log::warn!("Change ratio already set, keeping the existing layer");
        }
        self
    }

    pub fn with_flood_results(mut self, flood_results: I) -> Self {
        if self.flood_results.is_none() {
            self.flood_results = Some(flood_results);
        } else {
            log::warn!("Flood mask already set, keeping the existing mask");
        }
        self
    }

    pub fn with_flood_area_stats(mut self, hectares: u64) -> Self {
        if self.flood_area_stats.is_none() {
            self.flood_area_stats = Some(hectares);
        } else {
            log::warn!("Flood area already set, keeping the existing value");
        }
        self
    }

    /// Band carrying flood values in the mask
    pub fn band(&self) -> String {
        self.polarization.to_string()
    }

    /// The refined mask, or an error if estimation has not run
    pub fn flood_mask(&self) -> FloodResult<&I> {
        self.flood_results.as_ref().ok_or_else(|| {
            FloodError::InvalidParameter("Flood mask has not been estimated yet".to_string())
        })
    }
}

/// Flood estimation pipeline bound to one compute engine
pub struct FloodPipeline<C: GeoCompute> {
    engine: Arc<C>,
    params: PipelineParams,
    speckle: SpeckleSmoother,
    refiner: MaskRefiner,
}

impl<C: GeoCompute> FloodPipeline<C> {
    pub fn new(engine: Arc<C>, params: PipelineParams) -> FloodResult<Self> {
        let speckle = SpeckleSmoother::new(params.speckle.clone())?;
        let refiner = MaskRefiner::new(params.refinement.clone())?;
        Ok(Self {
            engine,
            params,
            speckle,
            refiner,
        })
    }

    pub fn engine(&self) -> &C {
        &self.engine
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Select and smooth the before/after mosaics
    pub fn prepare(&self, request: &FloodRequest) -> FloodResult<FloodEstimationContext<C::Image>> {
        let filter = CollectionFilter::new(self.params.collection.clone());
        let (before, after) = filter.select_mosaics(
            self.engine(),
            &request.region,
            &request.base_period,
            &request.flood_period,
        )?;
        let (before, after) = self.speckle.smooth_pair(self.engine(), &before, &after)?;
        Ok(FloodEstimationContext::new(before, after, request.region))
    }

    /// Change detection, refinement and (if enabled) area statistics
    pub fn estimate(
        &self,
        context: FloodEstimationContext<C::Image>,
        threshold: f64,
    ) -> FloodResult<FloodEstimationContext<C::Image>> {
        let detector = ChangeDetector::new(threshold)?;
        let change = detector.detect(self.engine(), &context.before_flood, &context.after_flood)?;
        let flooded = self.refiner.refine(self.engine(), &change.binary)?;

        let context = context
            .with_difference(change.difference)
            .with_flood_results(flooded);

        if !self.params.statistics.enabled {
            return Ok(context);
        }

        let aggregator = StatisticsAggregator::new(self.params.statistics.reduce);
        let hectares = aggregator.flood_area_hectares(
            self.engine(),
            context.flood_mask()?,
            &context.band(),
            &context.region,
        )?;
        Ok(context.with_flood_area_stats(hectares))
    }

    /// Full estimation for a request
    pub fn run(&self, request: &FloodRequest) -> FloodResult<FloodEstimationContext<C::Image>> {
        self.run_until(request, &Deadline::unbounded())
    }

    /// Full estimation, abandoned between stages once `deadline` has passed
    pub fn run_until(
        &self,
        request: &FloodRequest,
        deadline: &Deadline,
    ) -> FloodResult<FloodEstimationContext<C::Image>> {
        let start = Instant::now();
        log::info!(
            "Estimating flood extent for {:?}: {} vs {}",
            request.region.bounds(),
            request.base_period,
            request.flood_period
        );
        deadline.check()?;
        let context = self.prepare(request)?;
        deadline.check()?;
        let context = self.estimate(context, request.threshold)?;
        log::info!("Flood estimation finished in {:.2?}", start.elapsed());
        Ok(context)
    }

    /// Flooded polygons of an estimated context
    pub fn flood_vectors(
        &self,
        context: &FloodEstimationContext<C::Image>,
    ) -> FloodResult<FeatureCollection> {
        let vectorizer = Vectorizer::new(self.params.vectorize.reduce);
        vectorizer.flooded_features(self.engine(), context.flood_mask()?, &context.region)
    }

    /// Tile layers of an estimated context
    pub fn display(&self, context: &FloodEstimationContext<C::Image>) -> FloodResult<DisplayLayers> {
        let adapter = DisplayAdapter::new(self.params.display.clone());
        adapter.render(
            self.engine(),
            &context.before_flood.image,
            &context.after_flood.image,
            context.flood_mask()?,
        )
    }

    /// Tile layer of the change ratio, when it has been computed
    pub fn difference_layer(
        &self,
        context: &FloodEstimationContext<C::Image>,
    ) -> FloodResult<Option<TileReference>> {
        let adapter = DisplayAdapter::new(self.params.display.clone());
        context
            .difference
            .as_ref()
            .map(|difference| adapter.render_difference(self.engine(), difference))
            .transpose()
    }

    /// Write the flooded polygons to a new GeoPackage in `output_dir`
    ///
    /// Nothing is written once `deadline` has passed.
    pub fn export(
        &self,
        context: &FloodEstimationContext<C::Image>,
        output_dir: &Path,
        deadline: &Deadline,
    ) -> FloodResult<PathBuf> {
        let features = self.flood_vectors(context)?;
        if let Err(e) = deadline.check() {
            log::warn!(
                "Deadline passed before export, discarding {} flooded polygons",
                features.len()
            );
            return Err(e);
        }
        gpkg::export_flood_features(output_dir, &features, Utc::now)
    }

    /// Estimate and export in one call (download endpoint)
    pub fn download(
        &self,
        request: &FloodRequest,
        output_dir: &Path,
        deadline: &Deadline,
    ) -> FloodResult<PathBuf> {
        let context = self.run_until(request, deadline)?;
        self.export(&context, output_dir, deadline)
    }

    /// Estimate and register tiles in one call (display endpoint)
    pub fn display_request(
        &self,
        request: &FloodRequest,
        deadline: &Deadline,
    ) -> FloodResult<DisplayLayers> {
        let context = self.run_until(request, deadline)?;
        deadline.check()?;
        self.display(&context)
    }
}
