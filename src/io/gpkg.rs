//! GeoPackage export of flood polygons

use crate::types::{FeatureCollection, FloodError, FloodResult};
use chrono::{DateTime, Utc};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldValue, Geometry, LayerAccess};
use gdal::{DriverManager, LayerOptions};
use gdal_sys::{OGRFieldType, OGRwkbGeometryType};
use std::path::{Path, PathBuf};

/// Layer holding the flooded polygons
pub const FLOOD_LAYER_NAME: &str = "flood_area";
pub const LABEL_FIELD: &str = "label";

/// `<dir>/flood_area_<YYYYMMDDHHMMSS>.gpkg` for the given UTC instant
pub fn output_path(dir: &Path, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}_{}.gpkg", FLOOD_LAYER_NAME, now.format("%Y%m%d%H%M%S")))
}

/// Millisecond-resolution variant used after a name collision
fn retry_path(dir: &Path, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "{}_{}.gpkg",
        FLOOD_LAYER_NAME,
        now.format("%Y%m%d%H%M%S_%3f")
    ))
}

fn is_collision(err: &FloodError) -> bool {
    matches!(err, FloodError::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists)
}

/// Write `features` as a new GeoPackage at `path`
///
/// The file must not exist yet. Polygons are promoted to MultiPolygon and
/// written in EPSG:4326 with an integer `label` field.
pub fn write_flood_features(path: &Path, features: &FeatureCollection) -> FloodResult<()> {
    if path.exists() {
        return Err(FloodError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Refusing to overwrite {}", path.display()),
        )));
    }

    let driver = DriverManager::get_driver_by_name("GPKG")?;
    let mut dataset = driver.create_vector_only(path)?;
    let srs = SpatialRef::from_epsg(4326)?;

    let mut txn = dataset.start_transaction()?;
    {
        let mut layer = txn.create_layer(LayerOptions {
            name: FLOOD_LAYER_NAME,
            srs: Some(&srs),
            ty: OGRwkbGeometryType::wkbMultiPolygon,
            options: None,
        })?;
        layer.create_defn_fields(&[(LABEL_FIELD, OGRFieldType::OFTInteger)])?;

        for feature in &features.features {
            let geometry = Geometry::from_wkt(&feature.geometry.to_wkt())?;
            let label = feature.label().unwrap_or_default();
            let label = i32::try_from(label).map_err(|_| {
                FloodError::InvalidParameter(format!("Label {} does not fit a 32-bit field", label))
            })?;
            layer.create_feature_fields(geometry, &[LABEL_FIELD], &[FieldValue::IntegerValue(label)])?;
        }
    }
    txn.commit()?;

    log::info!(
        "Wrote {} features to {} (layer {})",
        features.len(),
        path.display(),
        FLOOD_LAYER_NAME
    );
    Ok(())
}

/// Write `features` to a fresh timestamped file in `dir`
///
/// A collision is retried once under a newly derived name; an existing
/// file is never overwritten.
pub fn export_flood_features<F>(
    dir: &Path,
    features: &FeatureCollection,
    clock: F,
) -> FloodResult<PathBuf>
where
    F: Fn() -> DateTime<Utc>,
{
    std::fs::create_dir_all(dir)?;

    let path = output_path(dir, clock());
    match write_flood_features(&path, features) {
        Ok(()) => Ok(path),
        Err(e) if is_collision(&e) => {
            let retry = retry_path(dir, clock());
            log::warn!(
                "{} already exists, writing to {} instead",
                path.display(),
                retry.display()
            );
            write_flood_features(&retry, features)?;
            Ok(retry)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_output_path_format() {
        let now = Utc.with_ymd_and_hms(2020, 2, 3, 4, 5, 6).unwrap();
        let path = output_path(Path::new("output"), now);
        assert_eq!(path, Path::new("output/flood_area_20200203040506.gpkg"));
        assert_ne!(retry_path(Path::new("output"), now), path);
    }
}
