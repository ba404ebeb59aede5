use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{DataValue, ValueError};

/// The scalar part of a data type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
  Any,
  String,
  Number,
  Boolean,
  Date,
  Time,
  DateTime,
  Object,
  ChatMessage,
  GptFunction,
  Binary,
  ControlFlowExcluded,
}

impl ScalarType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ScalarType::Any => "any",
      ScalarType::String => "string",
      ScalarType::Number => "number",
      ScalarType::Boolean => "boolean",
      ScalarType::Date => "date",
      ScalarType::Time => "time",
      ScalarType::DateTime => "datetime",
      ScalarType::Object => "object",
      ScalarType::ChatMessage => "chat-message",
      ScalarType::GptFunction => "gpt-function",
      ScalarType::Binary => "binary",
      ScalarType::ControlFlowExcluded => "control-flow-excluded",
    }
  }
}

impl FromStr for ScalarType {
  type Err = ValueError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let scalar = match s {
      "any" => ScalarType::Any,
      "string" => ScalarType::String,
      "number" => ScalarType::Number,
      "boolean" => ScalarType::Boolean,
      "date" => ScalarType::Date,
      "time" => ScalarType::Time,
      "datetime" => ScalarType::DateTime,
      "object" => ScalarType::Object,
      "chat-message" => ScalarType::ChatMessage,
      "gpt-function" => ScalarType::GptFunction,
      "binary" => ScalarType::Binary,
      "control-flow-excluded" => ScalarType::ControlFlowExcluded,
      other => {
        return Err(ValueError::UnknownType {
          name: other.to_string(),
        });
      }
    };
    Ok(scalar)
  }
}

/// A full data type tag: a scalar type, optionally in array form.
///
/// Serialized as the tag string used by [`DataValue`], e.g. `"string"` or
/// `"number[]"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataType {
  pub scalar: ScalarType,
  pub array: bool,
}

impl DataType {
  pub const fn scalar(scalar: ScalarType) -> Self {
    Self {
      scalar,
      array: false,
    }
  }

  pub const fn array_of(scalar: ScalarType) -> Self {
    Self {
      scalar,
      array: true,
    }
  }

  pub const ANY: DataType = DataType::scalar(ScalarType::Any);
  pub const STRING: DataType = DataType::scalar(ScalarType::String);
  pub const NUMBER: DataType = DataType::scalar(ScalarType::Number);
  pub const BOOLEAN: DataType = DataType::scalar(ScalarType::Boolean);
  pub const OBJECT: DataType = DataType::scalar(ScalarType::Object);
  pub const STRING_ARRAY: DataType = DataType::array_of(ScalarType::String);
  pub const ANY_ARRAY: DataType = DataType::array_of(ScalarType::Any);

  /// The element type of an array type, or the type itself for scalars.
  pub fn element(&self) -> DataType {
    DataType::scalar(self.scalar)
  }

  pub fn is_any(&self) -> bool {
    self.scalar == ScalarType::Any
  }

  /// The value a port of this type takes when nothing else is known.
  pub fn default_value(&self) -> DataValue {
    if self.array {
      return match self.scalar {
        ScalarType::String => DataValue::StringArray(Vec::new()),
        ScalarType::Number => DataValue::NumberArray(Vec::new()),
        ScalarType::Boolean => DataValue::BooleanArray(Vec::new()),
        ScalarType::Date => DataValue::DateArray(Vec::new()),
        ScalarType::Time => DataValue::TimeArray(Vec::new()),
        ScalarType::DateTime => DataValue::DateTimeArray(Vec::new()),
        ScalarType::Object => DataValue::ObjectArray(Vec::new()),
        ScalarType::ChatMessage => DataValue::ChatMessageArray(Vec::new()),
        ScalarType::GptFunction => DataValue::GptFunctionArray(Vec::new()),
        ScalarType::Binary => DataValue::BinaryArray(Vec::new()),
        ScalarType::Any | ScalarType::ControlFlowExcluded => DataValue::AnyArray(Vec::new()),
      };
    }

    match self.scalar {
      ScalarType::Any => DataValue::Any(serde_json::Value::Null),
      ScalarType::String => DataValue::String(String::new()),
      ScalarType::Number => DataValue::Number(0.0),
      ScalarType::Boolean => DataValue::Boolean(false),
      ScalarType::Date => DataValue::Date(String::new()),
      ScalarType::Time => DataValue::Time(String::new()),
      ScalarType::DateTime => DataValue::DateTime(String::new()),
      ScalarType::Object => DataValue::Object(serde_json::Map::new()),
      ScalarType::ChatMessage => DataValue::ChatMessage(Default::default()),
      ScalarType::GptFunction => DataValue::GptFunction(Default::default()),
      ScalarType::Binary => DataValue::Binary(Vec::new()),
      ScalarType::ControlFlowExcluded => DataValue::excluded(),
    }
  }
}

impl fmt::Display for DataType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.array {
      write!(f, "{}[]", self.scalar.as_str())
    } else {
      f.write_str(self.scalar.as_str())
    }
  }
}

impl FromStr for DataType {
  type Err = ValueError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.strip_suffix("[]") {
      Some(scalar) => Ok(DataType::array_of(scalar.parse()?)),
      None => Ok(DataType::scalar(s.parse()?)),
    }
  }
}

impl TryFrom<String> for DataType {
  type Error = ValueError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<DataType> for String {
  fn from(value: DataType) -> Self {
    value.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_scalar_and_array_tags() {
    assert_eq!("string".parse::<DataType>().unwrap(), DataType::STRING);
    assert_eq!(
      "chat-message[]".parse::<DataType>().unwrap(),
      DataType::array_of(ScalarType::ChatMessage)
    );
    assert!("strin".parse::<DataType>().is_err());
  }

  #[test]
  fn test_display_matches_parse() {
    let ty = DataType::array_of(ScalarType::DateTime);
    assert_eq!(ty.to_string(), "datetime[]");
    assert_eq!(ty.to_string().parse::<DataType>().unwrap(), ty);
  }

  #[test]
  fn test_serde_as_string() {
    let json = serde_json::to_string(&DataType::NUMBER).unwrap();
    assert_eq!(json, "\"number\"");

    let ty: DataType = serde_json::from_str("\"boolean[]\"").unwrap();
    assert_eq!(ty, DataType::array_of(ScalarType::Boolean));
  }

  #[test]
  fn test_default_values() {
    assert_eq!(DataType::STRING.default_value(), DataValue::String(String::new()));
    assert_eq!(DataType::STRING_ARRAY.default_value(), DataValue::StringArray(vec![]));
    assert!(
      DataType::scalar(ScalarType::ControlFlowExcluded)
        .default_value()
        .is_excluded()
    );
  }
}
