//! Site setting model
//!
//! Settings are stored as text with a type tag. The tag decides how the text
//! is read back: `bool` compares against `"true"`, `int` and `json` parse and
//! fall back to the caller's default when the stored text is malformed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    #[default]
    String,
    Int,
    Bool,
    Json,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::String => "string",
            SettingType::Int => "int",
            SettingType::Bool => "bool",
            SettingType::Json => "json",
        }
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "str" => Ok(SettingType::String),
            "int" | "integer" => Ok(SettingType::Int),
            "bool" | "boolean" => Ok(SettingType::Bool),
            "json" => Ok(SettingType::Json),
            _ => Err(anyhow::anyhow!("Invalid setting type: {}", s)),
        }
    }
}

/// A typed setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    String(String),
    Json(serde_json::Value),
}

impl SettingValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SettingValue::Bool(b) => serde_json::Value::Bool(*b),
            SettingValue::Int(n) => serde_json::Value::from(*n),
            SettingValue::String(s) => serde_json::Value::String(s.clone()),
            SettingValue::Json(v) => v.clone(),
        }
    }

    /// Text form used for storage
    pub fn to_stored(&self) -> String {
        match self {
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Int(n) => n.to_string(),
            SettingValue::String(s) => s.clone(),
            SettingValue::Json(v) => v.to_string(),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::String(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::String(s)
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Bool(b)
    }
}

impl From<i64> for SettingValue {
    fn from(n: i64) -> Self {
        SettingValue::Int(n)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    pub updated_at: DateTime<Utc>,
}

impl Setting {
    /// Read the stored text according to its type tag.
    ///
    /// Returns `None` when an `int` or `json` value does not parse.
    pub fn typed_value(&self) -> Option<SettingValue> {
        match self.setting_type {
            SettingType::String => Some(SettingValue::String(self.value.clone())),
            SettingType::Bool => Some(SettingValue::Bool(self.value.to_lowercase() == "true")),
            SettingType::Int => self.value.trim().parse().ok().map(SettingValue::Int),
            SettingType::Json => serde_json::from_str(&self.value).ok().map(SettingValue::Json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(value: &str, setting_type: SettingType) -> Setting {
        Setting {
            key: "k".into(),
            value: value.into(),
            setting_type,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_typed_value() {
        assert_eq!(
            setting("TRUE", SettingType::Bool).typed_value(),
            Some(SettingValue::Bool(true))
        );
        assert_eq!(
            setting("yes", SettingType::Bool).typed_value(),
            Some(SettingValue::Bool(false))
        );
        assert_eq!(
            setting("42", SettingType::Int).typed_value(),
            Some(SettingValue::Int(42))
        );
        assert_eq!(setting("4x", SettingType::Int).typed_value(), None);
        assert_eq!(setting("{bad", SettingType::Json).typed_value(), None);
        assert_eq!(
            setting("[1]", SettingType::Json).typed_value(),
            Some(SettingValue::Json(serde_json::json!([1])))
        );
    }

    #[test]
    fn test_untagged_serialization() {
        let values = vec![
            SettingValue::from("x"),
            SettingValue::from(true),
            SettingValue::from(3i64),
        ];
        assert_eq!(serde_json::to_value(&values).unwrap(), serde_json::json!(["x", true, 3]));
    }

    #[test]
    fn test_setting_type_parse() {
        assert_eq!("Boolean".parse::<SettingType>().unwrap(), SettingType::Bool);
        assert!("float".parse::<SettingType>().is_err());
    }
}
