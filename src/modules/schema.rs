//! Typed configuration schema declared by a manifest.
//!
//! A schema maps field names to a kind, an optional default and a required
//! flag. `resolve` merges defaults under the manifest's `config` values and
//! checks the result, producing the configuration handed to the factory.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: FieldKind,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_kind() -> FieldKind {
    FieldKind::Any
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema(pub BTreeMap<String, FieldSpec>);

impl ConfigSchema {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge defaults under `config` and validate every declared field.
    ///
    /// Keys not declared in the schema pass through untouched.
    pub fn resolve(&self, config: &Map<String, Value>) -> Result<Map<String, Value>, String> {
        let mut resolved = config.clone();

        for (name, field) in &self.0 {
            if let Some(default) = &field.default {
                if !field.kind.accepts(default) {
                    return Err(format!(
                        "default for `{}` is not of type {:?}",
                        name, field.kind
                    ));
                }
                resolved
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }

            match resolved.get(name) {
                Some(Value::Null) | None if field.required => {
                    return Err(format!("missing required config field `{}`", name));
                }
                Some(value) if !value.is_null() && !field.kind.accepts(value) => {
                    return Err(format!(
                        "config field `{}` must be of type {:?}, got {}",
                        name, field.kind, value
                    ));
                }
                _ => {}
            }
        }

        Ok(resolved)
    }
}
