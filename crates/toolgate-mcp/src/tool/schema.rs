//! Tagged parameter schemas.
//!
//! A schema is a flat map of field name → [`FieldSpec`]. It is validated
//! before any handler runs and can be rendered as JSON Schema for discovery.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }

    fn accepts(&self, v: &JsonValue) -> bool {
        match self {
            FieldType::String => v.is_string(),
            FieldType::Number => v.is_number(),
            FieldType::Integer => v.is_i64() || v.is_u64(),
            FieldType::Boolean => v.is_boolean(),
            FieldType::Object => v.is_object(),
            FieldType::Array => v.is_array(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

impl FieldSpec {
    pub fn of(kind: FieldType) -> Self {
        Self {
            kind,
            description: None,
            required: false,
            allowed: None,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_value(mut self, v: impl Into<JsonValue>) -> Self {
        self.default = Some(v.into());
        self
    }
}

/// Why a parameter bag was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    NotAnObject,
    Missing(String),
    WrongType {
        field: String,
        expected: FieldType,
    },
    NotAllowed {
        field: String,
        value: String,
    },
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaViolation::NotAnObject => write!(f, "parameters must be an object"),
            SchemaViolation::Missing(field) => write!(f, "missing required field '{field}'"),
            SchemaViolation::WrongType { field, expected } => {
                write!(f, "field '{field}' must be of type {expected}")
            }
            SchemaViolation::NotAllowed { field, value } => {
                write!(f, "field '{field}' does not allow value {value}")
            }
        }
    }
}

impl std::error::Error for SchemaViolation {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn required_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, s)| s.required)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Check `params` and return them with defaults filled in.
    ///
    /// `null` is treated as an empty object. Fields not declared in the
    /// schema pass through untouched.
    pub fn validate(&self, params: &JsonValue) -> Result<JsonMap<String, JsonValue>, SchemaViolation> {
        let mut out = match params {
            JsonValue::Null => JsonMap::new(),
            JsonValue::Object(m) => m.clone(),
            _ => return Err(SchemaViolation::NotAnObject),
        };
        for (name, spec) in &self.fields {
            let present = out.get(name).filter(|v| !v.is_null()).cloned();
            let value = match (present, &spec.default) {
                (Some(v), _) => v,
                (None, Some(d)) => {
                    out.insert(name.clone(), d.clone());
                    continue;
                }
                (None, None) if spec.required => return Err(SchemaViolation::Missing(name.clone())),
                (None, None) => {
                    out.remove(name);
                    continue;
                }
            };
            if !spec.kind.accepts(&value) {
                return Err(SchemaViolation::WrongType {
                    field: name.clone(),
                    expected: spec.kind,
                });
            }
            if let Some(allowed) = &spec.allowed
                && !allowed.contains(&value)
            {
                return Err(SchemaViolation::NotAllowed {
                    field: name.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(out)
    }

    /// Per-field JSON Schema property objects.
    pub fn properties(&self) -> BTreeMap<String, JsonMap<String, JsonValue>> {
        self.fields
            .iter()
            .map(|(name, spec)| {
                let mut prop = JsonMap::new();
                prop.insert("type".to_string(), json!(spec.kind.as_str()));
                if let Some(d) = &spec.description {
                    prop.insert("description".to_string(), json!(d));
                }
                if let Some(allowed) = &spec.allowed {
                    prop.insert("enum".to_string(), JsonValue::Array(allowed.clone()));
                }
                if let Some(d) = &spec.default {
                    prop.insert("default".to_string(), d.clone());
                }
                (name.clone(), prop)
            })
            .collect()
    }

    /// Full `{"type":"object", ...}` JSON Schema document.
    pub fn to_json_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": self.properties(),
            "required": self.required_fields(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_like() -> ToolSchema {
        ToolSchema::new()
            .field("location", FieldSpec::string().required())
            .field(
                "units",
                FieldSpec::string()
                    .one_of(["metric", "imperial"])
                    .default_value("metric"),
            )
    }

    #[test]
    fn fills_defaults() {
        let out = weather_like().validate(&json!({"location": "Oslo"})).unwrap();
        assert_eq!(out["units"], "metric");
        assert_eq!(out["location"], "Oslo");
    }

    #[test]
    fn null_units_takes_default() {
        let out = weather_like()
            .validate(&json!({"location": "Oslo", "units": null}))
            .unwrap();
        assert_eq!(out["units"], "metric");
    }

    #[test]
    fn reports_each_violation() {
        let s = weather_like();
        assert_eq!(
            s.validate(&json!({})).unwrap_err(),
            SchemaViolation::Missing("location".into())
        );
        assert!(matches!(
            s.validate(&json!({"location": 7})).unwrap_err(),
            SchemaViolation::WrongType { ref field, expected: FieldType::String } if field == "location"
        ));
        assert!(matches!(
            s.validate(&json!({"location": "Oslo", "units": "kelvin"})).unwrap_err(),
            SchemaViolation::NotAllowed { ref field, .. } if field == "units"
        ));
        assert_eq!(s.validate(&json!("Oslo")).unwrap_err(), SchemaViolation::NotAnObject);
    }

    #[test]
    fn renders_json_schema() {
        let doc = weather_like().to_json_schema();
        assert_eq!(doc["required"], json!(["location"]));
        assert_eq!(doc["properties"]["units"]["enum"], json!(["metric", "imperial"]));
        assert_eq!(doc["properties"]["units"]["default"], "metric");
    }
}
