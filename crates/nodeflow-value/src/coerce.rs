//! Conversions between data types.
//!
//! Nodes read their inputs through these helpers so that any producer type
//! that has a sensible reading (a number as a string, a string as a boolean)
//! is accepted.

use serde_json::{Map, Value};

use crate::{ChatMessage, DataType, DataValue, ScalarType, ValueError};

/// Reads a value as text. Arrays join their elements with newlines.
pub fn to_string(value: &DataValue) -> Option<String> {
  match value {
    DataValue::String(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::DateTime(s) => {
      Some(s.clone())
    }
    DataValue::Number(n) => Some(format_number(*n)),
    DataValue::Boolean(b) => Some(b.to_string()),
    DataValue::ChatMessage(message) => Some(message.message.clone()),
    DataValue::ControlFlowExcluded(_) => None,
    DataValue::Any(Value::Null) => None,
    DataValue::Any(Value::String(s)) => Some(s.clone()),
    DataValue::Any(other) => to_string(&DataValue::infer(other.clone())),
    other => match other.items() {
      Some(items) => Some(
        items
          .iter()
          .map(|item| to_string(item).unwrap_or_default())
          .collect::<Vec<_>>()
          .join("\n"),
      ),
      None => Some(other.to_json().to_string()),
    },
  }
}

/// Reads a value as a number.
pub fn to_number(value: &DataValue) -> Option<f64> {
  match value {
    DataValue::Number(n) => Some(*n),
    DataValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
    DataValue::String(s) => s.trim().parse().ok(),
    DataValue::Any(v) => match v {
      Value::Number(n) => n.as_f64(),
      Value::String(s) => s.trim().parse().ok(),
      Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
      _ => None,
    },
    other => match other.items() {
      Some(items) if items.len() == 1 => to_number(&items[0]),
      _ => None,
    },
  }
}

/// Reads a value as a boolean using truthiness rules: empty strings,
/// `"false"`, zero, null and the exclusion sentinel are false; arrays are
/// true when every element is.
pub fn to_bool(value: &DataValue) -> bool {
  match value {
    DataValue::Boolean(b) => *b,
    DataValue::String(s) => !s.is_empty() && s != "false",
    DataValue::Number(n) => *n != 0.0 && !n.is_nan(),
    DataValue::ControlFlowExcluded(_) => false,
    DataValue::Any(v) => json_truthy(v),
    DataValue::Object(_) | DataValue::ChatMessage(_) | DataValue::GptFunction(_) => true,
    DataValue::Binary(bytes) => !bytes.is_empty(),
    DataValue::Date(s) | DataValue::Time(s) | DataValue::DateTime(s) => !s.is_empty(),
    other => other
      .items()
      .map(|items| items.iter().all(to_bool))
      .unwrap_or(false),
  }
}

/// Reads a value as a JSON object.
pub fn to_object(value: &DataValue) -> Option<Map<String, Value>> {
  match value {
    DataValue::Object(map) => Some(map.clone()),
    DataValue::Any(Value::Object(map)) => Some(map.clone()),
    DataValue::ControlFlowExcluded(_) | DataValue::Any(Value::Null) => None,
    other => match other.to_json() {
      Value::Object(map) => Some(map),
      json => {
        let mut map = Map::new();
        map.insert("value".to_string(), json);
        Some(map)
      }
    },
  }
}

pub fn to_chat_message(value: &DataValue) -> Option<ChatMessage> {
  match value {
    DataValue::ChatMessage(message) => Some(message.clone()),
    DataValue::String(s) => Some(ChatMessage::user(s.clone())),
    DataValue::Object(map) => serde_json::from_value(Value::Object(map.clone())).ok(),
    DataValue::Any(v) => to_chat_message(&DataValue::infer(v.clone())),
    _ => None,
  }
}

/// Converts a value to the requested type.
///
/// The exclusion sentinel passes through unchanged; callers decide what an
/// excluded value means for them.
pub fn coerce(value: &DataValue, to: DataType) -> Result<DataValue, ValueError> {
  let from = value.data_type();
  if from == to || to.is_any() || value.is_excluded() {
    return Ok(value.clone());
  }

  if to.array {
    let items = match value.items() {
      Some(items) => items,
      None if matches!(value, DataValue::Any(Value::Array(_))) => {
        let Some(items) = DataValue::infer(value.to_json()).items() else {
          return Err(ValueError::Unsupported { from, to });
        };
        items
      }
      None => vec![value.clone()],
    };
    let coerced = items
      .iter()
      .map(|item| coerce(item, to.element()))
      .collect::<Result<Vec<_>, _>>()?;
    if coerced.is_empty() {
      return Ok(to.default_value());
    }
    return Ok(DataValue::collect_array(coerced));
  }

  let unsupported = || ValueError::Unsupported { from, to };
  let coerced = match to.scalar {
    ScalarType::String => DataValue::String(to_string(value).unwrap_or_default()),
    ScalarType::Number => DataValue::Number(to_number(value).ok_or_else(|| ValueError::Invalid {
      to,
      message: format!("'{}' is not a number", value.to_json()),
    })?),
    ScalarType::Boolean => DataValue::Boolean(to_bool(value)),
    ScalarType::Object => DataValue::Object(to_object(value).ok_or_else(unsupported)?),
    ScalarType::ChatMessage => DataValue::ChatMessage(to_chat_message(value).ok_or_else(unsupported)?),
    ScalarType::Date => DataValue::Date(to_string(value).ok_or_else(unsupported)?),
    ScalarType::Time => DataValue::Time(to_string(value).ok_or_else(unsupported)?),
    ScalarType::DateTime => DataValue::DateTime(to_string(value).ok_or_else(unsupported)?),
    ScalarType::GptFunction | ScalarType::Binary => {
      let DataValue::Any(json) = value else {
        return Err(unsupported());
      };
      let tagged = serde_json::json!({ "type": to.to_string(), "value": json });
      serde_json::from_value(tagged).map_err(|e| ValueError::Invalid {
        to,
        message: e.to_string(),
      })?
    }
    ScalarType::Any => value.clone(),
    ScalarType::ControlFlowExcluded => DataValue::excluded(),
  };
  Ok(coerced)
}

/// Like [`coerce`], but an absent or excluded value stays absent.
pub fn coerce_optional(value: Option<&DataValue>, to: DataType) -> Result<Option<DataValue>, ValueError> {
  match value {
    Some(value) if !value.is_excluded() => coerce(value, to).map(Some),
    _ => Ok(None),
  }
}

fn json_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty() && s != "false",
    Value::Array(_) | Value::Object(_) => true,
  }
}

fn format_number(n: f64) -> String {
  if n.fract() == 0.0 && n.abs() < 1e15 {
    format!("{}", n as i64)
  } else {
    n.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_number_to_string_drops_trailing_zero() {
    assert_eq!(to_string(&DataValue::Number(3.0)).unwrap(), "3");
    assert_eq!(to_string(&DataValue::Number(2.5)).unwrap(), "2.5");
  }

  #[test]
  fn test_string_truthiness() {
    assert!(to_bool(&DataValue::String("yes".into())));
    assert!(!to_bool(&DataValue::String("false".into())));
    assert!(!to_bool(&DataValue::String(String::new())));
    assert!(!to_bool(&DataValue::excluded()));
  }

  #[test]
  fn test_coerce_scalar_into_array() {
    let coerced = coerce(&DataValue::String("a".into()), DataType::STRING_ARRAY).unwrap();
    assert_eq!(coerced, DataValue::StringArray(vec!["a".into()]));
  }

  #[test]
  fn test_coerce_array_elements() {
    let coerced = coerce(
      &DataValue::NumberArray(vec![1.0, 2.0]),
      DataType::STRING_ARRAY,
    )
    .unwrap();
    assert_eq!(coerced, DataValue::StringArray(vec!["1".into(), "2".into()]));
  }

  #[test]
  fn test_coerce_invalid_number() {
    let err = coerce(&DataValue::String("abc".into()), DataType::NUMBER).unwrap_err();
    assert!(matches!(err, ValueError::Invalid { .. }));
  }

  #[test]
  fn test_excluded_passes_through() {
    let coerced = coerce(&DataValue::excluded(), DataType::NUMBER).unwrap();
    assert!(coerced.is_excluded());
    assert_eq!(coerce_optional(Some(&DataValue::excluded()), DataType::NUMBER).unwrap(), None);
  }

  #[test]
  fn test_any_object_to_chat_message() {
    let value = DataValue::Any(json!({"type": "assistant", "message": "hello"}));
    let message = to_chat_message(&value).unwrap();
    assert_eq!(message.message, "hello");
  }
}
