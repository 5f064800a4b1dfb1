//! Flood estimation stages

pub mod selector;
pub mod collection;
pub mod speckle;
pub mod change_detection;
pub mod mask_refine;
pub mod statistics;
pub mod vectorize;
pub mod display;
pub mod pipeline;

// Re-export main types
pub use selector::{FloodParams, FloodRequest, ThresholdValue};
pub use collection::{CollectionFilter, CollectionFilterParams, ImageMosaic};
pub use speckle::{SpeckleParams, SpeckleSmoother};
pub use change_detection::{ChangeDetection, ChangeDetector, DEFAULT_DIFFERENCE_THRESHOLD};
pub use mask_refine::{MaskRefiner, RefinementParams};
pub use statistics::{StatisticsAggregator, StatisticsParams};
pub use vectorize::{Vectorizer, VectorizeParams, FLOOD_LABEL};
pub use display::{DisplayAdapter, DisplayLayers, DisplayParams};
pub use pipeline::{FloodEstimationContext, FloodPipeline, PipelineParams};
