//! Raw registry config types matching the JSON registry file.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Who may perform an action on an entity type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    Public,
    Authenticated,
    Staff,
    /// Allowed, but object resolution is scoped to records owned by the principal.
    #[serde(rename = "self")]
    SelfOnly,
    #[default]
    Disabled,
}

impl AccessPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessPolicy::Public => "public",
            AccessPolicy::Authenticated => "authenticated",
            AccessPolicy::Staff => "staff",
            AccessPolicy::SelfOnly => "self",
            AccessPolicy::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" | "true" => Ok(AccessPolicy::Public),
            "authenticated" | "auth" => Ok(AccessPolicy::Authenticated),
            "staff" => Ok(AccessPolicy::Staff),
            "self" => Ok(AccessPolicy::SelfOnly),
            "disabled" | "false" | "" => Ok(AccessPolicy::Disabled),
            other => Err(format!(
                "access policy must be one of public, authenticated, staff, self, disabled; got '{}'",
                other
            )),
        }
    }
}

/// Accepts the policy names, or a boolean (`true` = public, `false` = disabled).
impl<'de> Deserialize<'de> for AccessPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        match v {
            Value::Bool(true) => Ok(AccessPolicy::Public),
            Value::Bool(false) | Value::Null => Ok(AccessPolicy::Disabled),
            Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "access policy must be a string or boolean; got {}",
                type_name_of_json(&other)
            ))),
        }
    }
}

fn type_name_of_json(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub read: Option<AccessPolicy>,
    #[serde(default)]
    pub suggest: Option<AccessPolicy>,
    #[serde(default)]
    pub set: Option<AccessPolicy>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTypeConfig {
    Boolean,
    Text,
    String,
    Slug,
    Integer,
    Float,
    Date,
    Datetime,
    ToOne,
    ToMany,
    Callable,
}

/// How a callable field is computed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputeConfig {
    /// Number of records linked through a to-many field.
    Count { relation: String },
    /// The record's display string.
    Display,
    /// Implementation registered by the embedding application under `name`.
    Custom { name: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldTypeConfig,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub help_text: Option<String>,
    /// Related entity type (`name` or `app.name`) for relation fields.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub compute: Option<ComputeConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    pub app: String,
    pub name: String,
    /// Storage table name; defaults to `<app>_<name>`.
    #[serde(default)]
    pub table: Option<String>,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub access: AccessConfig,
    /// Searched in addition to name, title and description.
    #[serde(default)]
    pub searchable_fields: Vec<String>,
    /// Values applied when a record is created through get-or-create.
    #[serde(default)]
    pub defaults: Map<String, Value>,
    /// Field holding the owning principal's id (`id` for a user type itself).
    #[serde(default)]
    pub owner_field: Option<String>,
    /// Field used as the display string; defaults to `name` when present.
    #[serde(default)]
    pub display_field: Option<String>,
    /// Status/visibility hook: records are only visible when each field holds one of the listed values.
    #[serde(default)]
    pub visible_when: BTreeMap<String, Vec<Value>>,
}

/// The whole registry file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Policy for actions an entity type does not declare. Overrides the settings default.
    #[serde(default)]
    pub default_policy: Option<AccessPolicy>,
    #[serde(default)]
    pub entities: Vec<EntityTypeConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_accepts_booleans_and_names() {
        let access: AccessConfig =
            serde_json::from_str(r#"{"read": true, "suggest": "authenticated", "set": "self"}"#).unwrap();
        assert_eq!(access.read, Some(AccessPolicy::Public));
        assert_eq!(access.suggest, Some(AccessPolicy::Authenticated));
        assert_eq!(access.set, Some(AccessPolicy::SelfOnly));

        let access: AccessConfig = serde_json::from_str(r#"{"read": false}"#).unwrap();
        assert_eq!(access.read, Some(AccessPolicy::Disabled));
    }

    #[test]
    fn policy_rejects_unknown_names() {
        let err = serde_json::from_str::<AccessConfig>(r#"{"read": "everyone"}"#).unwrap_err();
        assert!(err.to_string().contains("access policy must be one of"));
        let err = serde_json::from_str::<AccessConfig>(r#"{"read": 3}"#).unwrap_err();
        assert!(err.to_string().contains("got number"));
    }

    #[test]
    fn field_defaults() {
        let f: FieldConfig = serde_json::from_str(r#"{"name": "title", "type": "string"}"#).unwrap();
        assert!(f.editable);
        assert!(!f.unique);
        assert_eq!(f.type_, FieldTypeConfig::String);
        let f: FieldConfig = serde_json::from_str(
            r#"{"name": "site_count", "type": "callable", "compute": {"kind": "count", "relation": "sites"}}"#,
        )
        .unwrap();
        assert!(matches!(f.compute, Some(ComputeConfig::Count { ref relation }) if relation == "sites"));
    }
}
