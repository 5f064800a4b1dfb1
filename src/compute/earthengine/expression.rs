//! Earth Engine expression graphs
//!
//! Operations on remote images never execute locally; they build a tree of
//! function invocations that is serialized and sent to the service when a
//! value or a map is requested.

use crate::types::RegionOfInterest;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A node of the serialized expression graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValueNode {
    #[serde(rename = "constantValue")]
    Constant(Value),
    #[serde(rename = "functionInvocationValue")]
    Invocation(FunctionInvocation),
    #[serde(rename = "arrayValue")]
    Array(ArrayValue),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInvocation {
    pub function_name: String,
    pub arguments: BTreeMap<String, ValueNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayValue {
    pub values: Vec<ValueNode>,
}

impl ValueNode {
    pub fn constant(value: impl Into<Value>) -> Self {
        ValueNode::Constant(value.into())
    }

    pub fn array(values: Vec<ValueNode>) -> Self {
        ValueNode::Array(ArrayValue { values })
    }

    /// Invoke a named server-side function
    pub fn call<'a>(name: &str, arguments: impl IntoIterator<Item = (&'a str, ValueNode)>) -> Self {
        ValueNode::Invocation(FunctionInvocation {
            function_name: name.to_string(),
            arguments: arguments
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }

    /// Invoke a function without arguments
    pub fn call_empty(name: &str) -> Self {
        ValueNode::Invocation(FunctionInvocation {
            function_name: name.to_string(),
            arguments: BTreeMap::new(),
        })
    }

    /// Name of the invoked function, if this is an invocation
    pub fn function_name(&self) -> Option<&str> {
        match self {
            ValueNode::Invocation(f) => Some(&f.function_name),
            _ => None,
        }
    }

    /// Argument of an invocation by name
    pub fn argument(&self, name: &str) -> Option<&ValueNode> {
        match self {
            ValueNode::Invocation(f) => f.arguments.get(name),
            _ => None,
        }
    }

    /// Rectangle geometry in EPSG:4326
    pub fn rectangle(region: &RegionOfInterest) -> Self {
        let (xmin, ymin, xmax, ymax) = region.bounds();
        Self::call(
            "GeometryConstructors.Rectangle",
            [
                ("coordinates", Self::constant(vec![xmin, ymin, xmax, ymax])),
                ("geodesic", Self::constant(false)),
            ],
        )
    }

    /// Constant image, used wherever a number meets an image operator
    pub fn constant_image(value: f64) -> Self {
        Self::call("Image.constant", [("value", Self::constant(value))])
    }
}

/// Serialized top-level expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expression {
    pub result: String,
    pub values: BTreeMap<String, ValueNode>,
}

impl Expression {
    pub fn new(root: ValueNode) -> Self {
        let mut values = BTreeMap::new();
        values.insert("0".to_string(), root);
        Self {
            result: "0".to_string(),
            values,
        }
    }
}

/// Lazily evaluated remote image
#[derive(Debug, Clone, PartialEq)]
pub struct EeImage(pub Arc<ValueNode>);

/// Lazily evaluated remote image collection
#[derive(Debug, Clone, PartialEq)]
pub struct EeCollection(pub Arc<ValueNode>);

impl EeImage {
    pub fn new(node: ValueNode) -> Self {
        EeImage(Arc::new(node))
    }

    pub fn node(&self) -> ValueNode {
        (*self.0).clone()
    }
}

impl EeCollection {
    pub fn new(node: ValueNode) -> Self {
        EeCollection(Arc::new(node))
    }

    pub fn node(&self) -> ValueNode {
        (*self.0).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expression_serialization() {
        let image = ValueNode::call(
            "Image.gt",
            [
                ("image1", ValueNode::call("Image.load", [("id", ValueNode::constant("a/b"))])),
                ("image2", ValueNode::constant_image(1.25)),
            ],
        );
        let expr = Expression::new(image);
        let json = serde_json::to_value(&expr).unwrap();

        assert_eq!(json["result"], "0");
        let root = &json["values"]["0"]["functionInvocationValue"];
        assert_eq!(root["functionName"], "Image.gt");
        assert_eq!(
            root["arguments"]["image1"],
            json!({"functionInvocationValue": {
                "functionName": "Image.load",
                "arguments": {"id": {"constantValue": "a/b"}}
            }})
        );
        assert_eq!(
            root["arguments"]["image2"]["functionInvocationValue"]["arguments"]["value"],
            json!({"constantValue": 1.25})
        );
    }

    #[test]
    fn test_rectangle_node() {
        let region = RegionOfInterest::new(10.0, 45.0, 10.5, 45.5).unwrap();
        let node = ValueNode::rectangle(&region);
        assert_eq!(node.function_name(), Some("GeometryConstructors.Rectangle"));
        assert_eq!(
            node.argument("coordinates"),
            Some(&ValueNode::constant(vec![10.0, 45.0, 10.5, 45.5]))
        );
    }
}
