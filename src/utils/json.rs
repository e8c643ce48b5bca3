use serde_json::Value;

pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// `None` when omitted; `null` clears to an empty list.
pub fn classify_string_list(optional_value: Option<&Value>) -> Result<Option<Value>, String> {
    match optional_value {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(Value::Array(Vec::new()))),
        Some(Value::Array(items)) => {
            let mut cleaned = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) if !s.trim().is_empty() => {
                        cleaned.push(Value::String(s.trim().to_owned()))
                    }
                    Value::String(_) => {}
                    other => return Err(format!("expected array of strings, got element {other}")),
                }
            }
            Ok(Some(Value::Array(cleaned)))
        }
        Some(other) => Err(format!("expected array of strings, got {other}")),
    }
}
