//! File output

pub mod gpkg;

pub use gpkg::{export_flood_features, output_path, write_flood_features, FLOOD_LAYER_NAME};
