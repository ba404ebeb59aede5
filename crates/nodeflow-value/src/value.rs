use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DataType, ScalarType};

/// Why a port carries the exclusion sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Exclusion {
  /// A loop controller is still iterating; its `break` port has not fired yet.
  LoopNotBroken,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
  System,
  #[default]
  User,
  Assistant,
  Function,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  #[serde(rename = "type")]
  pub role: ChatRole,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub function_call: Option<Value>,
}

impl ChatMessage {
  pub fn user(message: impl Into<String>) -> Self {
    Self {
      role: ChatRole::User,
      message: message.into(),
      name: None,
      function_call: None,
    }
  }
}

/// A callable function description handed to model-calling nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub parameters: Value,
}

/// A value flowing between ports, tagged with its data type.
///
/// Serialized as `{"type": "<tag>", "value": <payload>}`. Non-finite
/// numbers are written as strings so they survive the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DataValue {
  #[serde(rename = "any")]
  Any(Value),
  #[serde(rename = "string")]
  String(String),
  #[serde(rename = "number", with = "crate::number")]
  Number(f64),
  #[serde(rename = "boolean")]
  Boolean(bool),
  #[serde(rename = "date")]
  Date(String),
  #[serde(rename = "time")]
  Time(String),
  #[serde(rename = "datetime")]
  DateTime(String),
  #[serde(rename = "object")]
  Object(Map<String, Value>),
  #[serde(rename = "chat-message")]
  ChatMessage(ChatMessage),
  #[serde(rename = "gpt-function")]
  GptFunction(FunctionDescriptor),
  #[serde(rename = "binary")]
  Binary(Vec<u8>),
  #[serde(rename = "control-flow-excluded")]
  ControlFlowExcluded(Option<Exclusion>),

  #[serde(rename = "any[]")]
  AnyArray(Vec<Value>),
  #[serde(rename = "string[]")]
  StringArray(Vec<String>),
  #[serde(rename = "number[]", with = "crate::number::array")]
  NumberArray(Vec<f64>),
  #[serde(rename = "boolean[]")]
  BooleanArray(Vec<bool>),
  #[serde(rename = "date[]")]
  DateArray(Vec<String>),
  #[serde(rename = "time[]")]
  TimeArray(Vec<String>),
  #[serde(rename = "datetime[]")]
  DateTimeArray(Vec<String>),
  #[serde(rename = "object[]")]
  ObjectArray(Vec<Map<String, Value>>),
  #[serde(rename = "chat-message[]")]
  ChatMessageArray(Vec<ChatMessage>),
  #[serde(rename = "gpt-function[]")]
  GptFunctionArray(Vec<FunctionDescriptor>),
  #[serde(rename = "binary[]")]
  BinaryArray(Vec<Vec<u8>>),
}

impl DataValue {
  /// The plain exclusion sentinel.
  pub fn excluded() -> Self {
    DataValue::ControlFlowExcluded(None)
  }

  /// The sentinel a loop controller puts on `break` while it keeps looping.
  pub fn loop_not_broken() -> Self {
    DataValue::ControlFlowExcluded(Some(Exclusion::LoopNotBroken))
  }

  pub fn is_excluded(&self) -> bool {
    matches!(self, DataValue::ControlFlowExcluded(_))
  }

  pub fn is_loop_not_broken(&self) -> bool {
    matches!(
      self,
      DataValue::ControlFlowExcluded(Some(Exclusion::LoopNotBroken))
    )
  }

  pub fn data_type(&self) -> DataType {
    use ScalarType as S;
    match self {
      DataValue::Any(_) => DataType::scalar(S::Any),
      DataValue::String(_) => DataType::scalar(S::String),
      DataValue::Number(_) => DataType::scalar(S::Number),
      DataValue::Boolean(_) => DataType::scalar(S::Boolean),
      DataValue::Date(_) => DataType::scalar(S::Date),
      DataValue::Time(_) => DataType::scalar(S::Time),
      DataValue::DateTime(_) => DataType::scalar(S::DateTime),
      DataValue::Object(_) => DataType::scalar(S::Object),
      DataValue::ChatMessage(_) => DataType::scalar(S::ChatMessage),
      DataValue::GptFunction(_) => DataType::scalar(S::GptFunction),
      DataValue::Binary(_) => DataType::scalar(S::Binary),
      DataValue::ControlFlowExcluded(_) => DataType::scalar(S::ControlFlowExcluded),
      DataValue::AnyArray(_) => DataType::array_of(S::Any),
      DataValue::StringArray(_) => DataType::array_of(S::String),
      DataValue::NumberArray(_) => DataType::array_of(S::Number),
      DataValue::BooleanArray(_) => DataType::array_of(S::Boolean),
      DataValue::DateArray(_) => DataType::array_of(S::Date),
      DataValue::TimeArray(_) => DataType::array_of(S::Time),
      DataValue::DateTimeArray(_) => DataType::array_of(S::DateTime),
      DataValue::ObjectArray(_) => DataType::array_of(S::Object),
      DataValue::ChatMessageArray(_) => DataType::array_of(S::ChatMessage),
      DataValue::GptFunctionArray(_) => DataType::array_of(S::GptFunction),
      DataValue::BinaryArray(_) => DataType::array_of(S::Binary),
    }
  }

  pub fn is_array(&self) -> bool {
    self.data_type().array
  }

  /// Splits an array value into its scalar elements. Returns `None` for
  /// scalar values.
  pub fn items(&self) -> Option<Vec<DataValue>> {
    fn wrap<T: Clone>(items: &[T], f: impl Fn(T) -> DataValue) -> Vec<DataValue> {
      items.iter().cloned().map(f).collect()
    }

    let items = match self {
      DataValue::AnyArray(v) => wrap(v, DataValue::Any),
      DataValue::StringArray(v) => wrap(v, DataValue::String),
      DataValue::NumberArray(v) => wrap(v, DataValue::Number),
      DataValue::BooleanArray(v) => wrap(v, DataValue::Boolean),
      DataValue::DateArray(v) => wrap(v, DataValue::Date),
      DataValue::TimeArray(v) => wrap(v, DataValue::Time),
      DataValue::DateTimeArray(v) => wrap(v, DataValue::DateTime),
      DataValue::ObjectArray(v) => wrap(v, DataValue::Object),
      DataValue::ChatMessageArray(v) => wrap(v, DataValue::ChatMessage),
      DataValue::GptFunctionArray(v) => wrap(v, DataValue::GptFunction),
      DataValue::BinaryArray(v) => wrap(v, DataValue::Binary),
      _ => return None,
    };
    Some(items)
  }

  /// Number of elements for array values.
  pub fn len(&self) -> Option<usize> {
    match self {
      DataValue::AnyArray(v) => Some(v.len()),
      DataValue::StringArray(v) | DataValue::DateArray(v) | DataValue::TimeArray(v) => Some(v.len()),
      DataValue::DateTimeArray(v) => Some(v.len()),
      DataValue::NumberArray(v) => Some(v.len()),
      DataValue::BooleanArray(v) => Some(v.len()),
      DataValue::ObjectArray(v) => Some(v.len()),
      DataValue::ChatMessageArray(v) => Some(v.len()),
      DataValue::GptFunctionArray(v) => Some(v.len()),
      DataValue::BinaryArray(v) => Some(v.len()),
      _ => None,
    }
  }

  /// Collects values into one array value.
  ///
  /// Values that share a scalar type produce the typed array of that type.
  /// Anything else (mixed scalar types, nested arrays, exclusion sentinels)
  /// produces an `any[]` of the JSON payloads, excluded entries becoming
  /// `null`.
  pub fn collect_array(values: Vec<DataValue>) -> DataValue {
    let Some(first) = values.first() else {
      return DataValue::AnyArray(Vec::new());
    };
    let ty = first.data_type();
    let uniform = !ty.array
      && ty.scalar != ScalarType::ControlFlowExcluded
      && values.iter().all(|v| v.data_type() == ty);

    if !uniform {
      return DataValue::AnyArray(values.iter().map(DataValue::to_json).collect());
    }

    macro_rules! gather {
      ($variant:ident, $array:ident) => {
        DataValue::$array(
          values
            .into_iter()
            .filter_map(|v| match v {
              DataValue::$variant(inner) => Some(inner),
              _ => None,
            })
            .collect(),
        )
      };
    }

    match ty.scalar {
      ScalarType::Any => gather!(Any, AnyArray),
      ScalarType::String => gather!(String, StringArray),
      ScalarType::Number => gather!(Number, NumberArray),
      ScalarType::Boolean => gather!(Boolean, BooleanArray),
      ScalarType::Date => gather!(Date, DateArray),
      ScalarType::Time => gather!(Time, TimeArray),
      ScalarType::DateTime => gather!(DateTime, DateTimeArray),
      ScalarType::Object => gather!(Object, ObjectArray),
      ScalarType::ChatMessage => gather!(ChatMessage, ChatMessageArray),
      ScalarType::GptFunction => gather!(GptFunction, GptFunctionArray),
      ScalarType::Binary => gather!(Binary, BinaryArray),
      ScalarType::ControlFlowExcluded => DataValue::AnyArray(Vec::new()),
    }
  }

  /// The untagged JSON payload of this value.
  pub fn to_json(&self) -> Value {
    match self {
      DataValue::Any(v) => v.clone(),
      DataValue::String(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::DateTime(s) => {
        Value::String(s.clone())
      }
      DataValue::Number(n) => serde_json::Number::from_f64(*n)
        .map(Value::Number)
        .unwrap_or(Value::Null),
      DataValue::Boolean(b) => Value::Bool(*b),
      DataValue::Object(map) => Value::Object(map.clone()),
      DataValue::ControlFlowExcluded(_) => Value::Null,
      DataValue::AnyArray(items) => Value::Array(items.clone()),
      other => match serde_json::to_value(other) {
        Ok(Value::Object(mut tagged)) => tagged.remove("value").unwrap_or(Value::Null),
        _ => Value::Null,
      },
    }
  }

  /// Infers a tagged value from untagged JSON.
  pub fn infer(value: Value) -> DataValue {
    match value {
      Value::Null => DataValue::Any(Value::Null),
      Value::Bool(b) => DataValue::Boolean(b),
      Value::Number(n) => match n.as_f64() {
        Some(f) => DataValue::Number(f),
        None => DataValue::Any(Value::Number(n)),
      },
      Value::String(s) => DataValue::String(s),
      Value::Object(map) => DataValue::Object(map),
      Value::Array(items) => DataValue::collect_array(items.into_iter().map(DataValue::infer).collect()),
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      DataValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      DataValue::Number(n) => Some(*n),
      _ => None,
    }
  }
}

impl From<&str> for DataValue {
  fn from(value: &str) -> Self {
    DataValue::String(value.to_string())
  }
}

impl From<String> for DataValue {
  fn from(value: String) -> Self {
    DataValue::String(value)
  }
}

impl From<f64> for DataValue {
  fn from(value: f64) -> Self {
    DataValue::Number(value)
  }
}

impl From<bool> for DataValue {
  fn from(value: bool) -> Self {
    DataValue::Boolean(value)
  }
}

impl From<Vec<String>> for DataValue {
  fn from(value: Vec<String>) -> Self {
    DataValue::StringArray(value)
  }
}
