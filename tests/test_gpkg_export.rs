use chrono::{TimeZone, Utc};
use gdal::vector::{FieldValue, LayerAccess};
use gdal::Dataset;
use sarflood::io::gpkg::{export_flood_features, output_path, write_flood_features, FLOOD_LAYER_NAME};
use sarflood::types::{Feature, FeatureCollection, FloodError, Geometry};
use std::cell::Cell;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn square(x: f64, y: f64, size: f64) -> Vec<Vec<[f64; 2]>> {
    vec![vec![
        [x, y],
        [x + size, y],
        [x + size, y + size],
        [x, y + size],
        [x, y],
    ]]
}

fn sample_features() -> FeatureCollection {
    FeatureCollection::new(vec![
        Feature::new(Geometry::Polygon(square(10.0, 45.0, 0.01)), 1),
        Feature::new(
            Geometry::MultiPolygon(vec![square(10.1, 45.1, 0.01), square(10.2, 45.1, 0.02)]),
            1,
        ),
    ])
}

#[test]
fn test_write_and_read_back() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flood.gpkg");

    write_flood_features(&path, &sample_features()).unwrap();

    let dataset = Dataset::open(&path).unwrap();
    let mut layer = dataset.layer_by_name(FLOOD_LAYER_NAME).unwrap();
    assert_eq!(layer.feature_count(), 2);
    for feature in layer.features() {
        assert!(matches!(
            feature.field("label").unwrap(),
            Some(FieldValue::IntegerValue(1))
        ));
        assert!(feature.geometry().is_some());
    }
}

#[test]
fn test_empty_collection_writes_empty_layer() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.gpkg");

    write_flood_features(&path, &FeatureCollection::default()).unwrap();

    let dataset = Dataset::open(&path).unwrap();
    let layer = dataset.layer_by_name(FLOOD_LAYER_NAME).unwrap();
    assert_eq!(layer.feature_count(), 0);
}

#[test]
fn test_existing_file_is_never_overwritten() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taken.gpkg");
    std::fs::write(&path, b"keep me").unwrap();

    let result = write_flood_features(&path, &sample_features());
    assert!(matches!(result, Err(FloodError::Io(_))));
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}

#[test]
fn test_export_retries_under_a_fresh_name() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let first = Utc.with_ymd_and_hms(2020, 2, 3, 4, 5, 6).unwrap();
    let taken = output_path(dir.path(), first);
    std::fs::write(&taken, b"earlier export").unwrap();

    // Clock keeps returning the same second
    let calls = Cell::new(0);
    let clock = || {
        calls.set(calls.get() + 1);
        first
    };

    let written = export_flood_features(dir.path(), &sample_features(), clock).unwrap();
    assert_eq!(calls.get(), 2);
    assert_ne!(written, taken);
    assert!(written.exists());
    assert_eq!(std::fs::read(&taken).unwrap(), b"earlier export");

    let dataset = Dataset::open(&written).unwrap();
    let layer = dataset.layer_by_name(FLOOD_LAYER_NAME).unwrap();
    assert_eq!(layer.feature_count(), 2);
}

#[test]
fn test_export_creates_output_directory() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("output").join("floods");

    let written = export_flood_features(&nested, &sample_features(), Utc::now).unwrap();
    assert!(written.starts_with(&nested));
    let name = written.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("flood_area_") && name.ends_with(".gpkg"));
}
