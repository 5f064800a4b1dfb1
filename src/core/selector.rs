//! Request normalization
//!
//! Turns the loosely typed request body into a validated [`FloodRequest`].

use crate::core::change_detection::DEFAULT_DIFFERENCE_THRESHOLD;
use crate::types::{FloodError, FloodResult, RegionOfInterest, TimePeriod};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Threshold as posted by clients: a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    Number(f64),
    Text(String),
}

/// Request body shared by the download and display endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodParams {
    /// "xmin,ymin,xmax,ymax"
    pub bbox: String,
    pub init_start: String,
    pub init_last: String,
    pub flood_start: String,
    pub flood_last: String,
    #[serde(default)]
    pub flood_threshold: Option<ThresholdValue>,
}

/// Validated, canonical request descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloodRequest {
    pub region: RegionOfInterest,
    /// Reference (pre-event) period
    pub base_period: TimePeriod,
    /// Event period
    pub flood_period: TimePeriod,
    pub threshold: f64,
}

impl FloodRequest {
    pub fn new(
        region: RegionOfInterest,
        base_period: TimePeriod,
        flood_period: TimePeriod,
        threshold: f64,
    ) -> FloodResult<Self> {
        Ok(Self {
            region,
            base_period,
            flood_period,
            threshold: validate_threshold(threshold)?,
        })
    }

    pub fn from_params(params: &FloodParams) -> FloodResult<Self> {
        let region = parse_bbox(&params.bbox)?;
        let base_period = TimePeriod::parse(&params.init_start, &params.init_last)?;
        let flood_period = TimePeriod::parse(&params.flood_start, &params.flood_last)?;
        let threshold = parse_threshold(params.flood_threshold.as_ref())?;
        log::debug!(
            "Normalized request: region {:?}, base {}, flood {}, threshold {}",
            region.bounds(),
            base_period,
            flood_period,
            threshold
        );
        Self::new(region, base_period, flood_period, threshold)
    }
}

fn bbox_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([^,\s]+)\s*,\s*([^,\s]+)\s*,\s*([^,\s]+)\s*,\s*([^,\s]+)\s*$")
            .expect("bbox pattern is valid")
    })
}

/// Parse "xmin,ymin,xmax,ymax" into a region
pub fn parse_bbox(bbox: &str) -> FloodResult<RegionOfInterest> {
    let captures = bbox_pattern().captures(bbox).ok_or_else(|| {
        FloodError::InvalidRegion(format!(
            "Expected 'xmin,ymin,xmax,ymax', got '{}'",
            bbox
        ))
    })?;

    let mut coords = [0.0f64; 4];
    for (i, coord) in coords.iter_mut().enumerate() {
        let text = &captures[i + 1];
        *coord = text.parse().map_err(|_| {
            FloodError::InvalidRegion(format!("Coordinate '{}' is not a number", text))
        })?;
    }

    RegionOfInterest::new(coords[0], coords[1], coords[2], coords[3])
}

/// Resolve the posted threshold, defaulting to 1.25
pub fn parse_threshold(value: Option<&ThresholdValue>) -> FloodResult<f64> {
    let threshold = match value {
        None => DEFAULT_DIFFERENCE_THRESHOLD,
        Some(ThresholdValue::Number(n)) => *n,
        Some(ThresholdValue::Text(s)) if s.trim().is_empty() => DEFAULT_DIFFERENCE_THRESHOLD,
        Some(ThresholdValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| {
            FloodError::InvalidParameter(format!("Threshold '{}' is not a number", s))
        })?,
    };
    validate_threshold(threshold)
}

fn validate_threshold(threshold: f64) -> FloodResult<f64> {
    if threshold.is_nan() || threshold <= 0.0 {
        return Err(FloodError::InvalidParameter(format!(
            "Threshold must be a positive ratio, got {}",
            threshold
        )));
    }
    Ok(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(bbox: &str, threshold: Option<ThresholdValue>) -> FloodParams {
        FloodParams {
            bbox: bbox.to_string(),
            init_start: "2020-01-01".to_string(),
            init_last: "2020-01-31".to_string(),
            flood_start: "2020-02-01".to_string(),
            flood_last: "2020-02-15".to_string(),
            flood_threshold: threshold,
        }
    }

    #[test]
    fn test_valid_bbox_strings() {
        for bbox in ["10.0,45.0,10.5,45.5", " 10 , 45 , 10.5 , 45.5 ", "-1e-3,-90,1e-3,90"] {
            let region = parse_bbox(bbox).unwrap();
            assert!(region.xmin() < region.xmax());
            assert!(region.ymin() < region.ymax());
        }
        let region = parse_bbox("10.0,45.0,10.5,45.5").unwrap();
        assert_eq!(region.bounds(), (10.0, 45.0, 10.5, 45.5));
    }

    #[test]
    fn test_malformed_bbox_strings() {
        for bbox in [
            "",
            "10.0,45.0,10.5",
            "10.0,45.0,10.5,45.5,1",
            "a,b,c,d",
            "10.0;45.0;10.5;45.5",
            "10.5,45.0,10.0,45.5",
            "10.0,45.0,10.0,45.5",
            "inf,45.0,10.0,45.5",
            "NaN,45.0,10.0,45.5",
            "-200,45,10,46",
            "10,-95,11,45",
        ] {
            assert!(
                matches!(parse_bbox(bbox), Err(FloodError::InvalidRegion(_))),
                "bbox '{}' should be rejected",
                bbox
            );
        }
    }

    #[test]
    fn test_threshold_forms() {
        assert_eq!(parse_threshold(None).unwrap(), 1.25);
        assert_eq!(parse_threshold(Some(&ThresholdValue::Number(1.5))).unwrap(), 1.5);
        assert_eq!(parse_threshold(Some(&ThresholdValue::Text("1.1".into()))).unwrap(), 1.1);
        assert_eq!(parse_threshold(Some(&ThresholdValue::Text("".into()))).unwrap(), 1.25);
        assert!(parse_threshold(Some(&ThresholdValue::Text("inf".into())))
            .unwrap()
            .is_infinite());
        assert!(matches!(
            parse_threshold(Some(&ThresholdValue::Text("abc".into()))),
            Err(FloodError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_threshold(Some(&ThresholdValue::Text("NaN".into()))),
            Err(FloodError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_threshold(Some(&ThresholdValue::Number(0.0))),
            Err(FloodError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_request_from_json_body() {
        let body = r#"{"bbox": "10.0,45.0,10.5,45.5", "init_start": "2020-01-01",
            "init_last": "2020-01-31", "flood_start": "2020-02-01",
            "flood_last": "2020-02-15", "flood_threshold": "1.25"}"#;
        let parsed: FloodParams = serde_json::from_str(body).unwrap();
        let request = FloodRequest::from_params(&parsed).unwrap();
        assert_eq!(request.threshold, 1.25);
        assert_eq!(request.flood_period.to_string(), "2020-02-01..2020-02-15");

        let bad_period = FloodParams {
            init_start: "2020-02-01".to_string(),
            ..params("10.0,45.0,10.5,45.5", None)
        };
        assert!(matches!(
            FloodRequest::from_params(&bad_period),
            Err(FloodError::InvalidPeriod(_))
        ));
    }
}
