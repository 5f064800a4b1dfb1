//! Earth Engine backed [`GeoCompute`]
//!
//! Image and collection operations only grow an expression graph. Network
//! traffic happens in `collection_size`, `date_range`, `reduce_sum`,
//! `reduce_to_vectors` (value:compute) and `visualize` (maps).

pub mod expression;
pub mod session;

pub use expression::{EeCollection, EeImage, Expression, ValueNode};
pub use session::{EarthEngineSession, RetryPolicy};

use crate::compute::{
    CollectionQuery, Comparison, GeoCompute, KernelShape, ReduceOptions, VisParams,
};
use crate::types::{
    FeatureCollection, FloodError, FloodResult, RegionOfInterest, TileReference, TimePeriod,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// Remote compute client over an [`EarthEngineSession`]
pub struct EarthEngineClient {
    session: EarthEngineSession,
}

impl EarthEngineClient {
    pub fn new(session: EarthEngineSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &EarthEngineSession {
        &self.session
    }

    /// Release the underlying session
    pub fn shutdown(self) {
        self.session.shutdown();
    }

    fn image_op<'a>(
        name: &str,
        arguments: impl IntoIterator<Item = (&'a str, ValueNode)>,
    ) -> FloodResult<EeImage> {
        Ok(EeImage::new(ValueNode::call(name, arguments)))
    }

    fn reduce_options<'a>(options: &ReduceOptions) -> [(&'a str, ValueNode); 3] {
        [
            ("scale", ValueNode::constant(options.scale)),
            ("bestEffort", ValueNode::constant(options.best_effort)),
            ("maxPixels", ValueNode::constant(options.max_pixels)),
        ]
    }
}

/// Expression selecting a collection for the given metadata predicate
pub fn collection_node(query: &CollectionQuery, region: &RegionOfInterest) -> ValueNode {
    let equals = |field: &str, value: Value| {
        ValueNode::call(
            "Filter.equals",
            [
                ("leftField", ValueNode::constant(field)),
                ("rightValue", ValueNode::Constant(value)),
            ],
        )
    };

    let filters = vec![
        equals("instrumentMode", Value::from(query.instrument_mode.clone())),
        ValueNode::call(
            "Filter.listContains",
            [
                ("leftField", ValueNode::constant("transmitterReceiverPolarisation")),
                ("rightValue", ValueNode::constant(query.polarization.to_string())),
            ],
        ),
        equals("orbitProperties_pass", Value::from(query.pass_direction.to_string())),
        equals("resolution_meters", Value::from(query.resolution_meters)),
        ValueNode::call(
            "Filter.intersects",
            [
                ("leftField", ValueNode::constant(".all")),
                ("rightValue", ValueNode::rectangle(region)),
            ],
        ),
    ];

    let filtered = ValueNode::call(
        "Collection.filter",
        [
            (
                "collection",
                ValueNode::call(
                    "ImageCollection.load",
                    [("id", ValueNode::constant(query.collection_id.clone()))],
                ),
            ),
            ("filter", ValueNode::call("Filter.and", [("filters", ValueNode::array(filters))])),
        ],
    );

    ValueNode::call(
        "ImageCollection.select",
        [
            ("input", filtered),
            (
                "selectors",
                ValueNode::array(vec![ValueNode::constant(query.polarization.to_string())]),
            ),
        ],
    )
}

/// `numerator / denominator` with pixels of a zero divisor masked
///
/// `Image.divide` alone yields 0 for a zero divisor.
pub fn masked_ratio(numerator: ValueNode, denominator: ValueNode) -> ValueNode {
    let nonzero = ValueNode::call(
        "Image.neq",
        [
            ("image1", denominator.clone()),
            ("image2", ValueNode::constant_image(0.0)),
        ],
    );
    let ratio = ValueNode::call("Image.divide", [("image1", numerator), ("image2", denominator)]);
    ValueNode::call("Image.updateMask", [("image", ratio), ("mask", nonzero)])
}

fn millis_to_date(value: &Value) -> Option<NaiveDate> {
    let millis = value.as_f64()? as i64;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

impl GeoCompute for EarthEngineClient {
    type Collection = EeCollection;
    type Image = EeImage;

    fn filter_collection(
        &self,
        query: &CollectionQuery,
        region: &RegionOfInterest,
    ) -> FloodResult<EeCollection> {
        Ok(EeCollection::new(collection_node(query, region)))
    }

    fn filter_date(&self, collection: &EeCollection, period: &TimePeriod) -> FloodResult<EeCollection> {
        let range = ValueNode::call(
            "DateRange",
            [
                ("start", ValueNode::constant(period.start().to_string())),
                ("end", ValueNode::constant(period.end().to_string())),
            ],
        );
        let filter = ValueNode::call(
            "Filter.dateRangeContains",
            [
                ("leftValue", range),
                ("rightField", ValueNode::constant("system:time_start")),
            ],
        );
        Ok(EeCollection::new(ValueNode::call(
            "Collection.filter",
            [("collection", collection.node()), ("filter", filter)],
        )))
    }

    fn collection_size(&self, collection: &EeCollection) -> FloodResult<usize> {
        let expr = Expression::new(ValueNode::call(
            "Collection.size",
            [("collection", collection.node())],
        ));
        let value = self.session.compute_value(&expr)?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| FloodError::remote(format!("Unexpected collection size: {}", value)))
    }

    fn date_range(&self, collection: &EeCollection) -> FloodResult<Option<(NaiveDate, NaiveDate)>> {
        let expr = Expression::new(ValueNode::call(
            "Collection.reduceColumns",
            [
                ("collection", collection.node()),
                ("reducer", ValueNode::call_empty("Reducer.minMax")),
                (
                    "selectors",
                    ValueNode::array(vec![ValueNode::constant("system:time_start")]),
                ),
            ],
        ));
        let value = self.session.compute_value(&expr)?;
        Ok(millis_to_date(&value["min"]).zip(millis_to_date(&value["max"])))
    }

    fn mosaic(&self, collection: &EeCollection) -> FloodResult<EeImage> {
        Self::image_op("ImageCollection.mosaic", [("collection", collection.node())])
    }

    fn clip(&self, image: &EeImage, region: &RegionOfInterest) -> FloodResult<EeImage> {
        Self::image_op(
            "Image.clip",
            [("input", image.node()), ("geometry", ValueNode::rectangle(region))],
        )
    }

    fn focal_mean(&self, image: &EeImage, radius_m: f64, shape: KernelShape) -> FloodResult<EeImage> {
        let kernel = ValueNode::call(
            &format!("Kernel.{}", shape.as_str()),
            [
                ("radius", ValueNode::constant(radius_m)),
                ("units", ValueNode::constant("meters")),
                ("normalize", ValueNode::constant(true)),
            ],
        );
        Self::image_op(
            "Image.reduceNeighborhood",
            [
                ("image", image.node()),
                ("reducer", ValueNode::call_empty("Reducer.mean")),
                ("kernel", kernel),
            ],
        )
    }

    fn divide(&self, numerator: &EeImage, denominator: &EeImage) -> FloodResult<EeImage> {
        Ok(EeImage::new(masked_ratio(numerator.node(), denominator.node())))
    }

    fn multiply(&self, a: &EeImage, b: &EeImage) -> FloodResult<EeImage> {
        Self::image_op("Image.multiply", [("image1", a.node()), ("image2", b.node())])
    }

    fn compare(&self, image: &EeImage, op: Comparison, value: f64) -> FloodResult<EeImage> {
        if !value.is_finite() {
            // JSON has no infinities; the comparison result is constant
            let constant = if op.apply(0.0, value) { 1.0 } else { 0.0 };
            return Self::image_op(
                "Image.where",
                [
                    ("input", image.node()),
                    ("test", ValueNode::constant_image(1.0)),
                    ("value", ValueNode::constant_image(constant)),
                ],
            );
        }
        Self::image_op(
            &format!("Image.{}", op.function_name()),
            [("image1", image.node()), ("image2", ValueNode::constant_image(value))],
        )
    }

    fn where_(&self, image: &EeImage, condition: &EeImage, value: f64) -> FloodResult<EeImage> {
        Self::image_op(
            "Image.where",
            [
                ("input", image.node()),
                ("test", condition.node()),
                ("value", ValueNode::constant_image(value)),
            ],
        )
    }

    fn update_mask(&self, image: &EeImage, mask: &EeImage) -> FloodResult<EeImage> {
        Self::image_op("Image.updateMask", [("image", image.node()), ("mask", mask.node())])
    }

    fn connected_pixel_count(&self, image: &EeImage, max_size: u32) -> FloodResult<EeImage> {
        Self::image_op(
            "Image.connectedPixelCount",
            [
                ("input", image.node()),
                ("maxSize", ValueNode::constant(max_size)),
                ("eightConnected", ValueNode::constant(true)),
            ],
        )
    }

    fn load_image(&self, asset_id: &str, band: &str) -> FloodResult<EeImage> {
        let loaded = ValueNode::call("Image.load", [("id", ValueNode::constant(asset_id))]);
        self.select(&EeImage::new(loaded), band)
    }

    fn slope(&self, elevation: &EeImage) -> FloodResult<EeImage> {
        Self::image_op("Terrain.slope", [("input", elevation.node())])
    }

    fn pixel_area(&self) -> FloodResult<EeImage> {
        Ok(EeImage::new(ValueNode::call_empty("Image.pixelArea")))
    }

    fn select(&self, image: &EeImage, band: &str) -> FloodResult<EeImage> {
        Self::image_op(
            "Image.select",
            [
                ("input", image.node()),
                ("bandSelectors", ValueNode::array(vec![ValueNode::constant(band)])),
            ],
        )
    }

    fn unmask(&self, image: &EeImage, value: f64) -> FloodResult<EeImage> {
        Self::image_op(
            "Image.unmask",
            [("input", image.node()), ("value", ValueNode::constant_image(value))],
        )
    }

    fn reduce_sum(
        &self,
        image: &EeImage,
        band: &str,
        region: &RegionOfInterest,
        options: &ReduceOptions,
    ) -> FloodResult<Option<f64>> {
        let mut arguments = vec![
            ("image", image.node()),
            ("reducer", ValueNode::call_empty("Reducer.sum")),
            ("geometry", ValueNode::rectangle(region)),
        ];
        arguments.extend(Self::reduce_options(options));
        let expr = Expression::new(ValueNode::call("Image.reduceRegion", arguments));

        let value = self.session.compute_value(&expr)?;
        match value.get(band) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| FloodError::remote(format!("Non-numeric sum for {}: {}", band, v))),
        }
    }

    fn reduce_to_vectors(
        &self,
        image: &EeImage,
        region: &RegionOfInterest,
        options: &ReduceOptions,
    ) -> FloodResult<FeatureCollection> {
        let mut arguments = vec![
            ("image", image.node()),
            ("geometry", ValueNode::rectangle(region)),
            ("geometryType", ValueNode::constant("polygon")),
            ("eightConnected", ValueNode::constant(true)),
            ("labelProperty", ValueNode::constant("label")),
        ];
        arguments.extend(Self::reduce_options(options));
        let expr = Expression::new(ValueNode::call("Image.reduceToVectors", arguments));

        let value = self.session.compute_value(&expr)?;
        Ok(serde_json::from_value(value)?)
    }

    fn visualize(&self, image: &EeImage, params: &VisParams) -> FloodResult<TileReference> {
        let mut arguments = vec![("image", image.node())];
        if let Some(min) = params.min {
            arguments.push(("min", ValueNode::constant(min)));
        }
        if let Some(max) = params.max {
            arguments.push(("max", ValueNode::constant(max)));
        }
        if !params.palette.is_empty() {
            arguments.push((
                "palette",
                ValueNode::array(params.palette.iter().map(|c| ValueNode::constant(c.clone())).collect()),
            ));
        }
        let expr = Expression::new(ValueNode::call("Image.visualize", arguments));
        self.session.create_map(&expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PassDirection, Polarization};
    use serde_json::json;

    fn query() -> CollectionQuery {
        CollectionQuery {
            collection_id: "COPERNICUS/S1_GRD".to_string(),
            instrument_mode: "IW".to_string(),
            polarization: Polarization::VH,
            pass_direction: PassDirection::Descending,
            resolution_meters: 10,
        }
    }

    #[test]
    fn test_collection_node_carries_all_filters() {
        let region = RegionOfInterest::new(10.0, 45.0, 10.5, 45.5).unwrap();
        let node = collection_node(&query(), &region);
        assert_eq!(node.function_name(), Some("ImageCollection.select"));

        let json = serde_json::to_value(&node).unwrap();
        let text = json.to_string();
        assert!(text.contains("\"COPERNICUS/S1_GRD\""));
        assert!(text.contains("\"instrumentMode\""));
        assert!(text.contains("\"transmitterReceiverPolarisation\""));
        assert!(text.contains("\"DESCENDING\""));
        assert!(text.contains("\"resolution_meters\""));
        assert!(text.contains("GeometryConstructors.Rectangle"));

        let filtered = node.argument("input").unwrap();
        let filter = filtered.argument("filter").unwrap();
        let filters = serde_json::to_value(filter.argument("filters").unwrap()).unwrap();
        assert_eq!(filters["arrayValue"]["values"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_ratio_masks_zero_divisors() {
        let before = ValueNode::call("Image.load", [("id", ValueNode::constant("before"))]);
        let after = ValueNode::call("Image.load", [("id", ValueNode::constant("after"))]);
        let node = masked_ratio(after.clone(), before.clone());
        assert_eq!(node.function_name(), Some("Image.updateMask"));

        let ratio = node.argument("image").unwrap();
        assert_eq!(ratio.function_name(), Some("Image.divide"));
        assert_eq!(ratio.argument("image1"), Some(&after));
        assert_eq!(ratio.argument("image2"), Some(&before));

        let mask = node.argument("mask").unwrap();
        assert_eq!(mask.function_name(), Some("Image.neq"));
        assert_eq!(mask.argument("image1"), Some(&before));
        assert_eq!(mask.argument("image2"), Some(&ValueNode::constant_image(0.0)));
    }

    #[test]
    fn test_millis_to_date() {
        // 2020-02-03T05:30:00Z
        assert_eq!(
            millis_to_date(&json!(1_580_707_800_000i64)),
            NaiveDate::from_ymd_opt(2020, 2, 3)
        );
        assert_eq!(millis_to_date(&Value::Null), None);
    }
}
