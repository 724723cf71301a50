//! The Point data model (spec C1): a single typed reading flowing from an
//! adapter through the bus, rule engine, and sinks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use gw_expr::{EvalValue, FieldSource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Nanoseconds since the Unix epoch, source-observed.
pub type TimestampNanos = i64;

/// A concurrency-safe, cheap-to-snapshot tag map. Actions that transform a
/// Point never mutate an existing map in place; they build a fresh `Point`
/// with a fresh `TagMap` instead (copy-on-write discipline, spec §3/§5).
#[derive(Debug, Clone, Default)]
pub struct TagMap(Arc<RwLock<HashMap<String, String>>>);

impl TagMap {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0.read().expect("tag map lock poisoned").get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.0.read().expect("tag map lock poisoned").clone()
    }

    pub fn with_inserted(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut snap = self.snapshot();
        snap.insert(key.into(), value.into());
        Self::new(snap)
    }
}

impl PartialEq for TagMap {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl From<HashMap<String, String>> for TagMap {
    fn from(map: HashMap<String, String>) -> Self {
        Self::new(map)
    }
}

impl Serialize for TagMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TagMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(HashMap::deserialize(deserializer)?))
    }
}

/// The typed value carried by a Point. Variant order is significant for
/// `tag()` but not for storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Location {
        lat: f64,
        lon: f64,
        alt: Option<f64>,
        acc: Option<f64>,
        speed: Option<f64>,
        heading: Option<f64>,
    },
    Vector3d {
        x: f64,
        y: f64,
        z: f64,
    },
    Color {
        r: u8,
        g: u8,
        b: u8,
        a: Option<u8>,
    },
    Vector(Vec<f64>),
    Array(Vec<Value>),
    Matrix(Vec<Vec<f64>>),
    TimeSeries(Vec<(i64, f64)>),
    /// Structured `{function: result}` output of a multi-function
    /// aggregation (C9). Additive refinement over spec.md's `Value`
    /// enum — see DESIGN.md's Open Question decisions.
    Record(HashMap<String, f64>),
}

impl Value {
    /// The wire/condition-evaluator `type` tag, e.g. for `FieldRef::Simple("type")`.
    pub fn tag(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Location { .. } => "location",
            Value::Vector3d { .. } => "vector3d",
            Value::Color { .. } => "color",
            Value::Vector(_) => "vector",
            Value::Array(_) => "array",
            Value::Matrix(_) => "matrix",
            Value::TimeSeries(_) => "timeseries",
            Value::Record(_) => "record",
        }
    }

    /// Numeric/boolean/string scalar view used by the condition evaluator;
    /// composite values resolve to `Absent` since they have no single
    /// scalar meaning.
    pub fn as_eval(&self) -> EvalValue {
        match self {
            Value::Int(i) => EvalValue::Int(*i),
            Value::Float(f) => EvalValue::Float(*f),
            Value::Bool(b) => EvalValue::Bool(*b),
            Value::Str(s) => EvalValue::Str(s.clone()),
            _ => EvalValue::Absent,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => Json::from(*f),
            Value::Bool(b) => Json::from(*b),
            Value::Str(s) => Json::from(s.clone()),
            Value::Location { lat, lon, alt, acc, speed, heading } => {
                let mut m = Map::new();
                m.insert("lat".into(), Json::from(*lat));
                m.insert("lon".into(), Json::from(*lon));
                m.insert("alt".into(), opt_json(*alt));
                m.insert("acc".into(), opt_json(*acc));
                m.insert("speed".into(), opt_json(*speed));
                m.insert("heading".into(), opt_json(*heading));
                Json::Object(m)
            }
            Value::Vector3d { x, y, z } => {
                let mut m = Map::new();
                m.insert("x".into(), Json::from(*x));
                m.insert("y".into(), Json::from(*y));
                m.insert("z".into(), Json::from(*z));
                Json::Object(m)
            }
            Value::Color { r, g, b, a } => {
                let mut m = Map::new();
                m.insert("r".into(), Json::from(*r));
                m.insert("g".into(), Json::from(*g));
                m.insert("b".into(), Json::from(*b));
                m.insert("a".into(), a.map(Json::from).unwrap_or(Json::Null));
                Json::Object(m)
            }
            Value::Vector(v) => Json::from(v.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Matrix(rows) => Json::from(rows.clone()),
            Value::TimeSeries(points) => Json::Array(
                points
                    .iter()
                    .map(|(t, v)| Json::Array(vec![Json::from(*t), Json::from(*v)]))
                    .collect(),
            ),
            Value::Record(map) => {
                let m: Map<String, Json> = map.iter().map(|(k, v)| (k.clone(), Json::from(*v))).collect();
                Json::Object(m)
            }
        }
    }

    pub fn from_json(type_tag: &str, json: &Json) -> Result<Value, String> {
        match type_tag {
            "int" => json.as_i64().map(Value::Int).ok_or_else(|| "expected int".into()),
            "float" => json.as_f64().map(Value::Float).ok_or_else(|| "expected float".into()),
            "bool" => json.as_bool().map(Value::Bool).ok_or_else(|| "expected bool".into()),
            "string" => json.as_str().map(|s| Value::Str(s.to_string())).ok_or_else(|| "expected string".into()),
            "location" => {
                let o = json.as_object().ok_or("expected location object")?;
                Ok(Value::Location {
                    lat: field_f64(o, "lat")?,
                    lon: field_f64(o, "lon")?,
                    alt: opt_field_f64(o, "alt"),
                    acc: opt_field_f64(o, "acc"),
                    speed: opt_field_f64(o, "speed"),
                    heading: opt_field_f64(o, "heading"),
                })
            }
            "vector3d" => {
                let o = json.as_object().ok_or("expected vector3d object")?;
                Ok(Value::Vector3d {
                    x: field_f64(o, "x")?,
                    y: field_f64(o, "y")?,
                    z: field_f64(o, "z")?,
                })
            }
            "color" => {
                let o = json.as_object().ok_or("expected color object")?;
                Ok(Value::Color {
                    r: field_f64(o, "r")? as u8,
                    g: field_f64(o, "g")? as u8,
                    b: field_f64(o, "b")? as u8,
                    a: opt_field_f64(o, "a").map(|v| v as u8),
                })
            }
            "vector" => {
                let arr = json.as_array().ok_or("expected vector array")?;
                Ok(Value::Vector(arr.iter().filter_map(Json::as_f64).collect()))
            }
            "array" => {
                let arr = json.as_array().ok_or("expected array")?;
                let mut out = Vec::with_capacity(arr.len());
                for item in arr {
                    out.push(Value::from_json(infer_scalar_tag(item), item)?);
                }
                Ok(Value::Array(out))
            }
            "matrix" => {
                let arr = json.as_array().ok_or("expected matrix array")?;
                let mut rows = Vec::with_capacity(arr.len());
                for row in arr {
                    let row = row.as_array().ok_or("expected matrix row array")?;
                    rows.push(row.iter().filter_map(Json::as_f64).collect());
                }
                Ok(Value::Matrix(rows))
            }
            "timeseries" => {
                let arr = json.as_array().ok_or("expected timeseries array")?;
                let mut points = Vec::with_capacity(arr.len());
                for entry in arr {
                    let pair = entry.as_array().ok_or("expected [t, v] pair")?;
                    let t = pair.first().and_then(Json::as_i64).ok_or("expected integer timestamp")?;
                    let v = pair.get(1).and_then(Json::as_f64).ok_or("expected numeric value")?;
                    points.push((t, v));
                }
                Ok(Value::TimeSeries(points))
            }
            "record" => {
                let o = json.as_object().ok_or("expected record object")?;
                let map = o.iter().filter_map(|(k, v)| v.as_f64().map(|v| (k.clone(), v))).collect();
                Ok(Value::Record(map))
            }
            other => Err(format!("unknown value type tag {other:?}")),
        }
    }
}

fn infer_scalar_tag(json: &Json) -> &'static str {
    match json {
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_i64() => "int",
        Json::Number(_) => "float",
        _ => "string",
    }
}

fn opt_json(v: Option<f64>) -> Json {
    v.map(Json::from).unwrap_or(Json::Null)
}

fn field_f64(o: &Map<String, Json>, key: &str) -> Result<f64, String> {
    o.get(key).and_then(Json::as_f64).ok_or_else(|| format!("missing/invalid field {key:?}"))
}

fn opt_field_f64(o: &Map<String, Json>, key: &str) -> Option<f64> {
    o.get(key).and_then(Json::as_f64)
}

/// A single typed reading flowing through the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub device_id: String,
    pub key: String,
    pub value: Value,
    pub timestamp: TimestampNanos,
    pub tags: TagMap,
    /// 0 = bad .. 255 = good.
    pub quality: u8,
}

impl Point {
    pub fn new(device_id: impl Into<String>, key: impl Into<String>, value: Value, timestamp: TimestampNanos) -> Self {
        Self {
            device_id: device_id.into(),
            key: key.into(),
            value,
            timestamp,
            tags: TagMap::default(),
            quality: 255,
        }
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = TagMap::new(tags);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }
}

impl FieldSource for Point {
    fn attr(&self, name: &str) -> Option<EvalValue> {
        match name {
            "device_id" => Some(EvalValue::Str(self.device_id.clone())),
            "key" => Some(EvalValue::Str(self.key.clone())),
            "value" => Some(self.value.as_eval()),
            "type" => Some(EvalValue::Str(self.value.tag().to_string())),
            "timestamp" => Some(EvalValue::Int(self.timestamp)),
            _ => None,
        }
    }

    fn tag(&self, name: &str) -> Option<String> {
        self.tags.get(name)
    }
}

impl Serialize for Point {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("device_id", &self.device_id)?;
        map.serialize_entry("key", &self.key)?;
        map.serialize_entry("value", &self.value.to_json())?;
        map.serialize_entry("type", self.value.tag())?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("tags", &self.tags.snapshot())?;
        map.serialize_entry("quality", &self.quality)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            device_id: String,
            key: String,
            value: Json,
            #[serde(rename = "type")]
            type_tag: String,
            timestamp: i64,
            #[serde(default)]
            tags: HashMap<String, String>,
            #[serde(default = "default_quality")]
            quality: u8,
        }
        fn default_quality() -> u8 {
            255
        }

        let raw = Raw::deserialize(deserializer)?;
        let value = Value::from_json(&raw.type_tag, &raw.value).map_err(serde::de::Error::custom)?;
        Ok(Point {
            device_id: raw.device_id,
            key: raw.key,
            value,
            timestamp: raw.timestamp,
            tags: TagMap::new(raw.tags),
            quality: raw.quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_preserves_invariant_fields() {
        let p = Point::new("dev1", "temp", Value::Float(21.5), 1_700_000_000_000_000_000)
            .with_tags(HashMap::from([("site".to_string(), "hq".to_string())]))
            .with_quality(200);

        let json = serde_json::to_string(&p).unwrap();
        let p2: Point = serde_json::from_str(&json).unwrap();

        assert_eq!(p.device_id, p2.device_id);
        assert_eq!(p.key, p2.key);
        assert_eq!(p.value, p2.value);
        assert_eq!(p.timestamp, p2.timestamp);
        assert_eq!(p.tags, p2.tags);
        assert_eq!(p.quality, p2.quality);
    }

    #[test]
    fn composite_value_roundtrip() {
        let p = Point::new(
            "gps1",
            "pos",
            Value::Location { lat: 1.0, lon: 2.0, alt: Some(3.0), acc: None, speed: None, heading: None },
            0,
        );
        let json = serde_json::to_string(&p).unwrap();
        let p2: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(p.value, p2.value);
    }

    #[test]
    fn field_source_resolves_point_attrs() {
        let p = Point::new("dev1", "temp", Value::Int(42), 5);
        assert_eq!(p.attr("device_id"), Some(EvalValue::Str("dev1".into())));
        assert_eq!(p.attr("value"), Some(EvalValue::Int(42)));
        assert_eq!(p.attr("type"), Some(EvalValue::Str("int".into())));
        assert_eq!(p.attr("timestamp"), Some(EvalValue::Int(5)));
        assert_eq!(p.attr("unknown_field"), None);
    }

    #[test]
    fn field_source_resolves_tags() {
        let p = Point::new("dev1", "temp", Value::Int(1), 0)
            .with_tags(HashMap::from([("site".to_string(), "hq".to_string())]));
        assert_eq!(p.tag("site"), Some("hq".to_string()));
        assert_eq!(p.tag("missing"), None);
    }
}
