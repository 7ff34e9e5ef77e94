//! YAML / JSON encoding of documents.
//!
//! Decoding goes through [`serde_yaml::Value`], which is a superset of JSON.
//! A sequence stored under a key named `parallel` becomes a
//! [`Node::ParallelGroup`]; every other sequence becomes a [`Node::List`].

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_yaml::Value;

use runin_types::{Result, RuninError};

use crate::input::RuntimeInput;
use crate::node::{Fields, Node, Scalar};

/// Key whose sequence value is a parallel group.
pub const PARALLEL_KEY: &str = "parallel";

impl Node {
    /// Decode a YAML document. Blank input and `null` decode to the empty document.
    pub fn from_yaml_str(text: &str) -> Result<Node> {
        if text.trim().is_empty() {
            return Ok(Node::empty());
        }
        let value: Value = serde_yaml::from_str(text)?;
        if value.is_null() {
            return Ok(Node::empty());
        }
        from_value(value, false)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Node> {
        let value: Value = serde_json::from_value(value)?;
        from_value(value, false)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn from_value(value: Value, parallel: bool) -> Result<Node> {
    Ok(match value {
        Value::Null => Node::Scalar(Scalar::Null),
        Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Node::Scalar(Scalar::Int(i)),
            None => Node::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
        },
        Value::String(s) => match RuntimeInput::parse(&s) {
            Some(input) => Node::Scalar(Scalar::Input(input)),
            None => Node::Scalar(Scalar::Str(s)),
        },
        Value::Sequence(seq) => {
            let items = seq
                .into_iter()
                .map(|v| from_value(v, false))
                .collect::<Result<Vec<_>>>()?;
            if parallel {
                Node::ParallelGroup(items)
            } else {
                Node::List(items)
            }
        }
        Value::Mapping(mapping) => {
            let mut fields = Fields::new();
            for (k, v) in mapping {
                let key = key_to_string(k)?;
                let is_parallel = key == PARALLEL_KEY;
                fields.insert(key, from_value(v, is_parallel)?);
            }
            Node::Subtree(fields)
        }
        Value::Tagged(tagged) => from_value(tagged.value, parallel)?,
    })
}

fn key_to_string(key: Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(RuninError::Decode {
            format: "yaml".into(),
            message: format!("unsupported mapping key: {other:?}"),
        }),
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Int(i) => serializer.serialize_i64(*i),
            Scalar::Float(f) => serializer.serialize_f64(*f),
            Scalar::Str(s) => serializer.serialize_str(s),
            Scalar::Input(input) => serializer.serialize_str(&input.render()),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Node::Scalar(s) => s.serialize(serializer),
            Node::List(items) | Node::ParallelGroup(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Subtree(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
pipeline:
  identifier: shop
  stages:
    - stage:
        identifier: build
        spec:
          image: rust:1.80
    - parallel:
        - stage:
            identifier: deploy_eu
            spec:
              namespace: <+input>
        - stage:
            identifier: deploy_us
            spec:
              namespace: <+input>.allowedValues(us1,us2)
"#;

    #[test]
    fn decodes_parallel_groups() {
        let doc = Node::from_yaml_str(PIPELINE).unwrap();
        let stages = doc.field("pipeline").unwrap().field("stages").unwrap();
        let items = match stages {
            Node::List(items) => items,
            other => panic!("expected list, got {other:?}"),
        };
        assert!(matches!(items[1].field("parallel"), Some(Node::ParallelGroup(g)) if g.len() == 2));
    }

    #[test]
    fn decodes_sentinel_with_modifiers() {
        let doc = Node::from_yaml_str("ns: <+input>.allowedValues(a,b)").unwrap();
        let input = doc.field("ns").unwrap().as_input().unwrap();
        assert_eq!(input.allowed_values().unwrap().len(), 2);
    }

    #[test]
    fn empty_string_stays_a_value() {
        let doc = Node::from_yaml_str("ns: ''").unwrap();
        assert_eq!(doc.field("ns"), Some(&Node::string("")));
    }

    #[test]
    fn blank_input_is_empty_document() {
        assert!(Node::from_yaml_str("   \n").unwrap().is_empty_document());
        assert!(Node::from_yaml_str("~").unwrap().is_empty_document());
    }

    #[test]
    fn yaml_round_trip_preserves_shape_and_order() {
        let doc = Node::from_yaml_str(PIPELINE).unwrap();
        let text = doc.to_yaml_string().unwrap();
        let again = Node::from_yaml_str(&text).unwrap();
        assert_eq!(doc, again);
        assert!(text.find("identifier: shop").unwrap() < text.find("stages:").unwrap());
    }

    #[test]
    fn json_decoding_matches_yaml() {
        let json = serde_json::json!({"deploy": {"spec": {"namespace": "<+input>"}}});
        let from_json = Node::from_json(json).unwrap();
        let from_yaml = Node::from_yaml_str("deploy:\n  spec:\n    namespace: <+input>\n").unwrap();
        assert_eq!(from_json, from_yaml);
    }

    #[test]
    fn sentinel_encodes_as_text() {
        let doc = Node::map([("ns", Node::placeholder())]);
        assert_eq!(doc.to_json().unwrap(), serde_json::json!({"ns": "<+input>"}));
    }

    #[test]
    fn numeric_keys_are_stringified() {
        let doc = Node::from_yaml_str("1: one").unwrap();
        assert_eq!(doc.field("1"), Some(&Node::string("one")));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(Node::from_yaml_str("a: [1, 2").is_err());
    }
}
