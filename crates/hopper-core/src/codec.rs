//! Host values and their wire encodings.
//!
//! Every parameter kind is an entry in a [`CodecRegistry`] keyed by wire type
//! tag. Scalars and simple geometry are decoded into typed [`Value`]s;
//! anything else under `Rhino.Geometry.` is carried as an opaque JSON payload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schema::WireValue;

pub const TAG_BOOLEAN: &str = "System.Boolean";
pub const TAG_INTEGER: &str = "System.Int32";
pub const TAG_NUMBER: &str = "System.Double";
pub const TAG_TEXT: &str = "System.String";
pub const TAG_POINT: &str = "Rhino.Geometry.Point3d";
pub const TAG_VECTOR: &str = "Rhino.Geometry.Vector3d";
pub const TAG_LINE: &str = "Rhino.Geometry.Line";

const GEOMETRY_NAMESPACE: &str = "Rhino.Geometry.";

/// Opaque geometry kinds the server is known to send back.
const OPAQUE_TAGS: &[&str] = &[
    "Rhino.Geometry.Brep",
    "Rhino.Geometry.Circle",
    "Rhino.Geometry.Curve",
    "Rhino.Geometry.Extrusion",
    "Rhino.Geometry.Mesh",
    "Rhino.Geometry.NurbsCurve",
    "Rhino.Geometry.Plane",
    "Rhino.Geometry.PolyCurve",
    "Rhino.Geometry.PolylineCurve",
    "Rhino.Geometry.SubD",
];

/// Param types the service cannot marshal at all.
const UNSUPPORTED_PARAMS: &[&str] = &["generic", "generic data", "group", "location", "latlonlocation"];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported wire type: {0}")]
    Unsupported(String),
    #[error("{0} param not supported")]
    UnsupportedParam(String),
    #[error("cannot decode {type_name} from {data:?}")]
    Malformed { type_name: String, data: String },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Values ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Segment {
    pub from: Point3,
    pub to: Point3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Number(f64),
    Text(String),
    Point(Point3),
    Vector(Point3),
    Line(Segment),
    /// Geometry passed through untouched.
    Opaque {
        type_name: String,
        data: serde_json::Value,
    },
}

impl Value {
    pub fn type_tag(&self) -> &str {
        match self {
            Value::Boolean(_) => TAG_BOOLEAN,
            Value::Integer(_) => TAG_INTEGER,
            Value::Number(_) => TAG_NUMBER,
            Value::Text(_) => TAG_TEXT,
            Value::Point(_) => TAG_POINT,
            Value::Vector(_) => TAG_VECTOR,
            Value::Line(_) => TAG_LINE,
            Value::Opaque { type_name, .. } => type_name,
        }
    }

    /// Numeric view used for minimum/maximum checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(f64::from(*i)),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Point(p) => write!(f, "{{{}, {}, {}}}", p.x, p.y, p.z),
            Value::Vector(v) => write!(f, "<{}, {}, {}>", v.x, v.y, v.z),
            Value::Line(l) => write!(
                f,
                "{{{}, {}, {}}} -> {{{}, {}, {}}}",
                l.from.x, l.from.y, l.from.z, l.to.x, l.to.y, l.to.z
            ),
            Value::Opaque { type_name, .. } => write!(f, "<{type_name}>"),
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

type EncodeFn = fn(&Value) -> Result<String, CodecError>;
type DecodeFn = fn(&str, &str) -> Result<Value, CodecError>;

#[derive(Clone, Copy)]
struct Codec {
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Table of wire type tag → encode/decode pair.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Codec>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Scalars, points, vectors and lines as typed values, the known geometry
    /// kinds as opaque payloads.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(TAG_BOOLEAN, encode_json, decode_boolean);
        registry.register(TAG_INTEGER, encode_json, decode_integer);
        registry.register(TAG_NUMBER, encode_json, decode_number);
        registry.register(TAG_TEXT, encode_json, decode_text);
        registry.register(TAG_POINT, encode_json, decode_point);
        registry.register(TAG_VECTOR, encode_json, decode_vector);
        registry.register(TAG_LINE, encode_json, decode_line);
        for tag in OPAQUE_TAGS {
            registry.register(tag, encode_json, decode_opaque);
        }
        registry
    }

    pub fn register(&mut self, type_name: &str, encode: EncodeFn, decode: DecodeFn) {
        self.codecs
            .insert(type_name.to_string(), Codec { encode, decode });
    }

    pub fn supports(&self, type_name: &str) -> bool {
        self.codecs.contains_key(type_name)
    }

    pub fn encode(&self, value: &Value) -> Result<WireValue, CodecError> {
        let tag = value.type_tag();
        let codec = match self.codecs.get(tag) {
            Some(codec) => *codec,
            None if matches!(value, Value::Opaque { .. }) => Codec {
                encode: encode_json,
                decode: decode_opaque,
            },
            None => return Err(CodecError::Unsupported(tag.to_string())),
        };
        Ok(WireValue::new(tag, (codec.encode)(value)?))
    }

    /// Decode one wire item. Unregistered tags under the geometry namespace
    /// decode as opaque; anything else is unsupported.
    pub fn decode(&self, wire: &WireValue) -> Result<Value, CodecError> {
        match self.codecs.get(&wire.type_name) {
            Some(codec) => (codec.decode)(&wire.type_name, &wire.data),
            None if wire.type_name.starts_with(GEOMETRY_NAMESPACE) => {
                decode_opaque(&wire.type_name, &wire.data)
            }
            None => Err(CodecError::Unsupported(wire.type_name.clone())),
        }
    }

    /// Reject description param types no codec can ever carry.
    pub fn check_param_type(&self, param_type: &str) -> Result<(), CodecError> {
        let lower = param_type.trim().to_ascii_lowercase();
        if UNSUPPORTED_PARAMS.contains(&lower.as_str()) {
            return Err(CodecError::UnsupportedParam(lower));
        }
        Ok(())
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.codecs.keys().collect();
        tags.sort();
        f.debug_struct("CodecRegistry").field("tags", &tags).finish()
    }
}

// ── Codecs ────────────────────────────────────────────────────────────────────

fn encode_json(value: &Value) -> Result<String, CodecError> {
    let text = match value {
        Value::Boolean(b) => serde_json::to_string(b)?,
        Value::Integer(i) => serde_json::to_string(i)?,
        Value::Number(n) => serde_json::to_string(n)?,
        Value::Text(s) => serde_json::to_string(s)?,
        Value::Point(p) | Value::Vector(p) => serde_json::to_string(p)?,
        Value::Line(l) => serde_json::to_string(l)?,
        Value::Opaque { data, .. } => serde_json::to_string(data)?,
    };
    Ok(text)
}

fn malformed(type_name: &str, data: &str) -> CodecError {
    CodecError::Malformed {
        type_name: type_name.to_string(),
        data: data.to_string(),
    }
}

/// Scalars arrive either bare (`5`) or quoted (`"5"`).
fn scalar(data: &str) -> &str {
    data.trim().trim_matches('"')
}

fn decode_boolean(type_name: &str, data: &str) -> Result<Value, CodecError> {
    match scalar(data).to_ascii_lowercase().as_str() {
        "true" => Ok(Value::Boolean(true)),
        "false" => Ok(Value::Boolean(false)),
        _ => Err(malformed(type_name, data)),
    }
}

fn decode_integer(type_name: &str, data: &str) -> Result<Value, CodecError> {
    scalar(data)
        .parse()
        .map(Value::Integer)
        .map_err(|_| malformed(type_name, data))
}

fn decode_number(type_name: &str, data: &str) -> Result<Value, CodecError> {
    scalar(data)
        .parse()
        .map(Value::Number)
        .map_err(|_| malformed(type_name, data))
}

fn decode_text(_type_name: &str, data: &str) -> Result<Value, CodecError> {
    // Well-formed strings are JSON quoted; fall back to the raw payload.
    match serde_json::from_str::<String>(data) {
        Ok(s) => Ok(Value::Text(s)),
        Err(_) => Ok(Value::Text(data.to_string())),
    }
}

fn decode_point(type_name: &str, data: &str) -> Result<Value, CodecError> {
    serde_json::from_str(data)
        .map(Value::Point)
        .map_err(|_| malformed(type_name, data))
}

fn decode_vector(type_name: &str, data: &str) -> Result<Value, CodecError> {
    serde_json::from_str(data)
        .map(Value::Vector)
        .map_err(|_| malformed(type_name, data))
}

fn decode_line(type_name: &str, data: &str) -> Result<Value, CodecError> {
    serde_json::from_str(data)
        .map(Value::Line)
        .map_err(|_| malformed(type_name, data))
}

fn decode_opaque(type_name: &str, data: &str) -> Result<Value, CodecError> {
    let data = serde_json::from_str(data).map_err(|_| malformed(type_name, data))?;
    Ok(Value::Opaque {
        type_name: type_name.to_string(),
        data,
    })
}
