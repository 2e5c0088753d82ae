//! Deserializers for provider and LLM JSON, which is loose about types:
//! numbers arrive as strings, booleans as "Yes"/"No", blanks as "".

use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub fn f64_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn optional_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(f64_from_value))
}

pub fn optional_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(f64_from_value)
        .map(|n| n.round() as i32))
}

pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "yes" | "true" | "1" | "y"
        ),
        _ => false,
    })
}

/// Empty and placeholder strings become `None`.
pub fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => non_blank(&s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "null" | "none" | "n/a" | "na" | "unknown" => None,
        _ => Some(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "optional_f64")]
        duration: Option<f64>,
        #[serde(default, deserialize_with = "flag")]
        clicked: bool,
        #[serde(default, deserialize_with = "optional_text")]
        name: Option<String>,
    }

    #[test]
    fn test_numbers_as_strings() {
        let sample: Sample = serde_json::from_str(r#"{"duration": "42.5"}"#).unwrap();
        assert_eq!(sample.duration, Some(42.5));
        let sample: Sample = serde_json::from_str(r#"{"duration": 12}"#).unwrap();
        assert_eq!(sample.duration, Some(12.0));
        let sample: Sample = serde_json::from_str(r#"{"duration": "soon"}"#).unwrap();
        assert_eq!(sample.duration, None);
    }

    #[test]
    fn test_yes_no_flags() {
        let sample: Sample = serde_json::from_str(r#"{"clicked": "Yes"}"#).unwrap();
        assert!(sample.clicked);
        let sample: Sample = serde_json::from_str(r#"{"clicked": "No"}"#).unwrap();
        assert!(!sample.clicked);
        let sample: Sample = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!sample.clicked);
    }

    #[test]
    fn test_placeholder_text_is_none() {
        let sample: Sample = serde_json::from_str(r#"{"name": " N/A "}"#).unwrap();
        assert_eq!(sample.name, None);
        let sample: Sample = serde_json::from_str(r#"{"name": " Priya "}"#).unwrap();
        assert_eq!(sample.name.as_deref(), Some("Priya"));
    }
}
