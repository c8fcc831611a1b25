use crate::constants::limits::{MAX_PORT, MIN_PORT};
use crate::errors::ToolError;
use serde_json::Value;

#[derive(Clone, Default)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(
        &self,
        value: &Value,
        label: &str,
        trim: bool,
    ) -> Result<String, ToolError> {
        let text = value.as_str().ok_or_else(|| {
            ToolError::invalid_params(format!("{} must be a non-empty string", label))
        })?;
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        Ok(if trim {
            normalized.to_string()
        } else {
            text.to_string()
        })
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&Value>,
        label: &str,
        trim: bool,
    ) -> Result<Option<String>, ToolError> {
        match value {
            None => Ok(None),
            Some(val) if val.is_null() => Ok(None),
            Some(val) => self.ensure_string(val, label, trim).map(Some),
        }
    }

    pub fn ensure_port(
        &self,
        value: Option<&Value>,
        fallback: Option<u16>,
    ) -> Result<u16, ToolError> {
        let Some(value) = value else {
            return Ok(fallback.unwrap_or(MIN_PORT));
        };
        if value.is_null() {
            return Ok(fallback.unwrap_or(MIN_PORT));
        }
        let numeric = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse::<i64>().ok()))
            .ok_or_else(|| {
                ToolError::invalid_params(format!(
                    "Port must be an integer between {} and {}",
                    MIN_PORT, MAX_PORT
                ))
            })?;
        if numeric == 0 {
            if let Some(fallback) = fallback {
                return Ok(fallback);
            }
        }
        if numeric < MIN_PORT as i64 || numeric > MAX_PORT as i64 {
            return Err(ToolError::invalid_params(format!(
                "Port must be an integer between {} and {}",
                MIN_PORT, MAX_PORT
            )));
        }
        Ok(numeric as u16)
    }

    pub fn ensure_identifier(&self, value: &str, label: &str) -> Result<String, ToolError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if trimmed.contains('\0') {
            return Err(ToolError::invalid_params(format!(
                "{} must not contain null bytes",
                label
            )));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_string_array(&self, value: &Value, label: &str) -> Result<Vec<String>, ToolError> {
        let arr = value.as_array().ok_or_else(|| {
            ToolError::invalid_params(format!("{} must be a non-empty array of strings", label))
        })?;
        if arr.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty array of strings",
                label
            )));
        }
        arr.iter()
            .map(|item| {
                item.as_str().map(|s| s.to_string()).ok_or_else(|| {
                    ToolError::invalid_params(format!("{} entries must be strings", label))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_string_rejects_blank() {
        let v = Validation::new();
        assert!(v.ensure_string(&json!("   "), "host", true).is_err());
        assert_eq!(v.ensure_string(&json!(" a "), "host", true).unwrap(), "a");
    }

    #[test]
    fn ensure_port_applies_fallback_for_missing_and_zero() {
        let v = Validation::new();
        assert_eq!(v.ensure_port(None, Some(22)).unwrap(), 22);
        assert_eq!(v.ensure_port(Some(&json!(0)), Some(22)).unwrap(), 22);
        assert_eq!(v.ensure_port(Some(&json!(2222)), Some(22)).unwrap(), 2222);
        assert!(v.ensure_port(Some(&json!(70_000)), Some(22)).is_err());
    }

    #[test]
    fn ensure_string_array_rejects_mixed_types() {
        let v = Validation::new();
        assert!(v
            .ensure_string_array(&json!(["ok", 1]), "commands")
            .is_err());
        assert_eq!(
            v.ensure_string_array(&json!(["a", "b"]), "commands").unwrap(),
            vec!["a", "b"]
        );
    }
}
