//! JSON schema spoken with compute servers.
//!
//! Requests and responses share one shape: lowercase top-level fields, input
//! and output trees as `{ "ParamName": .., "InnerTree": { "{0}": [..] } }`,
//! and every item as `{ "type": "<tag>", "data": "<encoded>" }`. Definition
//! descriptions returned from `/io` use PascalCase field names instead.

use serde::{Deserialize, Serialize};

use crate::config::DocumentSettings;
use crate::tree::DataTree;

pub const INPUT_PREFIX: &str = "RH_IN:";
pub const OUTPUT_PREFIX: &str = "RH_OUT:";

/// Error text a server sends when the inputs no longer match its definition.
pub const BAD_INPUTS: &str = "Bad inputs";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid tree path: {0}")]
    InvalidPath(String),
    #[error("request names no definition: neither pointer nor algo is set")]
    MissingDefinition,
    #[error("request names two definitions: both pointer and algo are set")]
    AmbiguousDefinition,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Values and trees ──────────────────────────────────────────────────────────

/// One encoded item: a type tag plus its string payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireValue {
    #[serde(rename = "type")]
    pub type_name: String,
    pub data: String,
}

impl WireValue {
    pub fn new(type_name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            data: data.into(),
        }
    }
}

/// A named tree of wire values; one per input or output parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTree {
    #[serde(rename = "ParamName")]
    pub param_name: String,
    #[serde(rename = "InnerTree", default)]
    pub tree: DataTree<WireValue>,
}

impl ParamTree {
    pub fn new(param_name: impl Into<String>) -> Self {
        Self {
            param_name: param_name.into(),
            tree: DataTree::new(),
        }
    }
}

// ── Solve request ─────────────────────────────────────────────────────────────

/// What the server is asked to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionRef<'a> {
    /// Cache key, definition identifier or URL.
    Pointer(&'a str),
    /// Base64 definition bytes.
    Inline(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRequest {
    #[serde(rename = "absolutetolerance")]
    pub absolute_tolerance: f64,
    #[serde(rename = "angletolerance")]
    pub angle_tolerance: f64,
    #[serde(rename = "modelunits")]
    pub model_units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(rename = "cachesolve")]
    pub cache_solve: bool,
    #[serde(rename = "recursionlevel")]
    pub recursion_level: u32,
    #[serde(default)]
    pub values: Vec<ParamTree>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SolveRequest {
    pub fn new(settings: &DocumentSettings) -> Self {
        Self {
            absolute_tolerance: settings.absolute_tolerance,
            angle_tolerance: settings.angle_tolerance,
            model_units: settings.model_units.clone(),
            algo: None,
            pointer: None,
            cache_solve: true,
            recursion_level: 0,
            values: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Which definition the server will run. Exactly one of `pointer` and
    /// `algo` must be set.
    pub fn definition(&self) -> Result<DefinitionRef<'_>, WireError> {
        match (self.pointer.as_deref(), self.algo.as_deref()) {
            (Some(p), None) => Ok(DefinitionRef::Pointer(p)),
            (None, Some(a)) => Ok(DefinitionRef::Inline(a)),
            (None, None) => Err(WireError::MissingDefinition),
            (Some(_), Some(_)) => Err(WireError::AmbiguousDefinition),
        }
    }

    /// Swap the pointer for inline definition bytes.
    pub fn inline(&mut self, base64: String) {
        self.pointer = None;
        self.algo = Some(base64);
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Solve response ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveResponse {
    pub values: Vec<ParamTree>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
}

impl SolveResponse {
    /// A response carrying a single error and no values.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    /// Parse a server body. Bodies that are not a solve response (HTML error
    /// pages, plain text, empty) yield None.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// Values are complete only when the server reported no errors.
    pub fn is_usable(&self) -> bool {
        self.errors.is_empty()
    }

    /// Server signal that the definition changed under us.
    pub fn has_bad_inputs(&self) -> bool {
        self.errors
            .first()
            .map(|e| e.eq_ignore_ascii_case(BAD_INPUTS))
            .unwrap_or(false)
    }
}

// ── Definition description (/io) ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IoDescription {
    pub description: String,
    pub cache_key: Option<String>,
    pub icon: Option<String>,
    pub inputs: Vec<InputParam>,
    pub outputs: Vec<OutputParam>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl IoDescription {
    pub fn parse(body: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Look up an input by its host-facing name.
    pub fn input(&self, name: &str) -> Option<&InputParam> {
        self.inputs.iter().find(|i| i.display_name() == name)
    }

    /// Look up an output by its host-facing name.
    pub fn output(&self, name: &str) -> Option<&OutputParam> {
        self.outputs.iter().find(|o| o.display_name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InputParam {
    pub name: String,
    pub nickname: Option<String>,
    pub description: String,
    pub param_type: String,
    pub default: Option<serde_json::Value>,
    /// Fewest items accepted.
    pub at_least: i32,
    /// Most items accepted. Negative = unbounded.
    pub at_most: i32,
    pub tree_access: bool,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl InputParam {
    /// Name shown to the host. The raw `name` is what goes on the wire.
    pub fn display_name(&self) -> &str {
        strip_param_prefix(&self.name)
    }
}

impl Default for InputParam {
    fn default() -> Self {
        Self {
            name: String::new(),
            nickname: None,
            description: String::new(),
            param_type: String::new(),
            default: None,
            at_least: 1,
            at_most: 1,
            tree_access: false,
            minimum: None,
            maximum: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OutputParam {
    pub name: String,
    pub nickname: Option<String>,
    pub description: String,
    pub param_type: String,
}

impl OutputParam {
    pub fn display_name(&self) -> &str {
        strip_param_prefix(&self.name)
    }
}

/// Drop a leading `RH_IN:` / `RH_OUT:` marker from a parameter name.
pub fn strip_param_prefix(name: &str) -> &str {
    name.strip_prefix(INPUT_PREFIX)
        .or_else(|| name.strip_prefix(OUTPUT_PREFIX))
        .map(str::trim)
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreePath;

    fn request() -> SolveRequest {
        SolveRequest::new(&DocumentSettings::default())
    }

    #[test]
    fn request_uses_lowercase_wire_names() {
        let mut req = request();
        req.pointer = Some("abc".into());
        req.recursion_level = 2;
        let mut x = ParamTree::new("x");
        x.tree.append(&TreePath::root(), WireValue::new("System.Double", "5"));
        req.values.push(x);

        let json: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(json["absolutetolerance"], 0.001);
        assert_eq!(json["modelunits"], "Millimeters");
        assert_eq!(json["recursionlevel"], 2);
        assert_eq!(json["cachesolve"], true);
        assert_eq!(json["pointer"], "abc");
        assert!(json.get("algo").is_none());
        assert_eq!(json["values"][0]["ParamName"], "x");
        assert_eq!(json["values"][0]["InnerTree"]["{0}"][0]["type"], "System.Double");
        assert_eq!(json["values"][0]["InnerTree"]["{0}"][0]["data"], "5");
    }

    #[test]
    fn definition_requires_exactly_one_source() {
        let mut req = request();
        assert!(matches!(req.definition(), Err(WireError::MissingDefinition)));

        req.pointer = Some("key".into());
        assert_eq!(req.definition().unwrap(), DefinitionRef::Pointer("key"));

        req.algo = Some("Ynl0ZXM=".into());
        assert!(matches!(req.definition(), Err(WireError::AmbiguousDefinition)));

        req.inline("Ynl0ZXM=".into());
        assert_eq!(req.definition().unwrap(), DefinitionRef::Inline("Ynl0ZXM="));
    }

    #[test]
    fn response_parse_tolerates_missing_fields() {
        let resp = SolveResponse::parse(r#"{"values":[],"pointer":"k"}"#).unwrap();
        assert!(resp.is_usable());
        assert_eq!(resp.pointer.as_deref(), Some("k"));

        assert!(SolveResponse::parse("Internal Server Error").is_none());
        assert!(SolveResponse::parse("").is_none());
    }

    #[test]
    fn bad_inputs_is_case_insensitive_and_first_only() {
        let mut resp = SolveResponse::failed("bad INPUTS");
        assert!(resp.has_bad_inputs());
        assert!(!resp.is_usable());

        resp.errors.insert(0, "other".into());
        assert!(!resp.has_bad_inputs());
    }

    #[test]
    fn description_exposes_unprefixed_names() {
        let body = r#"{
            "Description": "adds",
            "CacheKey": "md5_1",
            "Inputs": [{"Name": "RH_IN:x", "ParamType": "Number", "AtLeast": 1, "AtMost": 1, "Minimum": 0.0}],
            "Outputs": [{"Name": "RH_OUT:y", "ParamType": "Number"}]
        }"#;
        let io = IoDescription::parse(body).unwrap();
        assert_eq!(io.cache_key.as_deref(), Some("md5_1"));
        assert_eq!(io.inputs[0].name, "RH_IN:x");
        assert_eq!(io.inputs[0].display_name(), "x");
        assert_eq!(io.inputs[0].minimum, Some(0.0));
        assert_eq!(io.outputs[0].display_name(), "y");
        assert!(io.input("x").is_some());
        assert!(io.output("y").is_some());
    }

    #[test]
    fn strip_prefix_leaves_plain_names() {
        assert_eq!(strip_param_prefix("radius"), "radius");
        assert_eq!(strip_param_prefix("RH_OUT: area"), "area");
    }
}
