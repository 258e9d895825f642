//! The value a set request assigns or identifies: a related object by id or slug, or a
//! loose text used for lookup-or-create and text updates.

use serde_json::Value;

use crate::error::AppError;
use crate::extractors::RequestValues;
use crate::text::value_to_string;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKey {
    Value,
    Name,
    Title,
}

impl ValueKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKey::Value => "value",
            ValueKey::Name => "name",
            ValueKey::Title => "title",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NewValue {
    ById(i64),
    BySlug(String),
    ByValue { key: ValueKey, text: String },
}

/// Flat request fields, in lookup order.
const FLAT_FIELDS: [&str; 5] = ["obj_id", "obj_slug", "obj_value", "obj_name", "obj_title"];

impl NewValue {
    /// Build from a `{key, value}` pair.
    pub fn from_pair(key: &str, value: &str) -> Result<Self, AppError> {
        match key {
            "id" => value
                .trim()
                .parse::<i64>()
                .map(NewValue::ById)
                .map_err(|_| AppError::InvalidRequest(format!("the id '{}' in new value is not an integer", value))),
            "slug" => Ok(NewValue::BySlug(value.to_string())),
            "value" => Ok(NewValue::ByValue {
                key: ValueKey::Value,
                text: value.to_string(),
            }),
            "name" => Ok(NewValue::ByValue {
                key: ValueKey::Name,
                text: value.to_string(),
            }),
            "title" => Ok(NewValue::ByValue {
                key: ValueKey::Title,
                text: value.to_string(),
            }),
            _ => Err(AppError::InvalidRequest("no valid identifier found in new value".into())),
        }
    }

    /// Read from `new_value` (a JSON object, or that object serialized into a request
    /// value) or from the flat `obj_*` fields.
    pub fn from_request(values: &RequestValues) -> Result<Self, AppError> {
        if let Some(raw) = values.get_before_json("new_value") {
            return Self::from_serialized(raw);
        }
        if let Some(v) = values.json_value("new_value").filter(|v| v.is_object()) {
            return Self::from_json(v);
        }
        if let Some(raw) = values.get("new_value") {
            return Self::from_serialized(&raw);
        }
        for field in FLAT_FIELDS {
            if let Some(v) = values.get(field) {
                return Self::from_pair(field.trim_start_matches("obj_"), &v);
            }
        }
        Err(AppError::InvalidRequest("no new value was given".into()))
    }

    fn from_serialized(raw: &str) -> Result<Self, AppError> {
        let parsed: Value = serde_json::from_str(raw).map_err(|_| {
            AppError::InvalidRequest("new value must be a JSON object with 'key' and 'value'".into())
        })?;
        Self::from_json(&parsed)
    }

    fn from_json(v: &Value) -> Result<Self, AppError> {
        let key = v.get("key").and_then(Value::as_str);
        let value = v.get("value").filter(|v| !v.is_null()).map(value_to_string);
        match (key, value) {
            (Some(key), Some(value)) => Self::from_pair(key, &value),
            _ => Err(AppError::InvalidRequest("no valid identifier found in new value".into())),
        }
    }

    /// Raw text as sent; assigned unchanged by text updates.
    pub fn raw_text(&self) -> String {
        match self {
            NewValue::ById(id) => id.to_string(),
            NewValue::BySlug(s) => s.clone(),
            NewValue::ByValue { text, .. } => text.clone(),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            NewValue::ById(_) => "id",
            NewValue::BySlug(_) => "slug",
            NewValue::ByValue { key, .. } => key.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use serde_json::json;

    fn values() -> RequestValues {
        RequestValues::new(Method::POST, "/")
    }

    #[test]
    fn parses_structured_new_value() {
        let v = values().with_json(json!({"new_value": {"key": "name", "value": "Sci-Fi"}}));
        assert_eq!(
            NewValue::from_request(&v).unwrap(),
            NewValue::ByValue {
                key: ValueKey::Name,
                text: "Sci-Fi".into()
            }
        );
        let v = values().with_json(json!({"new_value": {"key": "id", "value": 4}}));
        assert_eq!(NewValue::from_request(&v).unwrap(), NewValue::ById(4));
    }

    #[test]
    fn parses_serialized_new_value() {
        let v = values().with_form("new_value", r#"{"key": "slug", "value": "sci-fi"}"#);
        assert_eq!(NewValue::from_request(&v).unwrap(), NewValue::BySlug("sci-fi".into()));
    }

    #[test]
    fn query_new_value_wins_over_json_body() {
        let v = values()
            .with_query("new_value", r#"{"key": "id", "value": "1"}"#)
            .with_json(json!({"new_value": {"key": "id", "value": 3}}));
        assert_eq!(NewValue::from_request(&v).unwrap(), NewValue::ById(1));

        let v = values()
            .with_form("new_value", r#"{"key": "slug", "value": "horror"}"#)
            .with_json(json!({"new_value": {"key": "id", "value": 3}}));
        assert_eq!(NewValue::from_request(&v).unwrap(), NewValue::BySlug("horror".into()));
    }

    #[test]
    fn json_body_wins_over_header() {
        let v = values()
            .with_header("new-value", r#"{"key": "id", "value": "9"}"#)
            .with_json(json!({"new_value": {"key": "id", "value": 3}}));
        assert_eq!(NewValue::from_request(&v).unwrap(), NewValue::ById(3));
    }

    #[test]
    fn flat_fields_in_order() {
        let v = values().with_json(json!({"obj_value": "Horror", "obj_slug": "horror"}));
        assert_eq!(NewValue::from_request(&v).unwrap(), NewValue::BySlug("horror".into()));
        let v = values().with_json(json!({"obj_id": "7"}));
        assert_eq!(NewValue::from_request(&v).unwrap(), NewValue::ById(7));
        let v = values().with_json(json!({"obj_title": "Dune"}));
        assert_eq!(NewValue::from_request(&v).unwrap().key(), "title");
    }

    #[test]
    fn bad_key_is_rejected() {
        let v = values().with_json(json!({"new_value": {"key": "uuid", "value": "x"}}));
        let err = NewValue::from_request(&v).unwrap_err();
        assert_eq!(err.user_message(), "No valid identifier found in new value");
        assert!(matches!(NewValue::from_request(&values()), Err(AppError::InvalidRequest(_))));
        assert!(NewValue::from_pair("id", "abc").is_err());
    }
}
