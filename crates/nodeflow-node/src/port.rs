use nodeflow_graph::PortId;
use nodeflow_value::{DataType, DataValue};
use serde::{Deserialize, Serialize};

/// Declaration of one input or output port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
  pub id: PortId,
  pub title: String,
  /// Accepted or produced types. The first entry is the primary type.
  pub data_types: Vec<DataType>,
  #[serde(default)]
  pub required: bool,
  /// Used when the input is unconnected.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<DataValue>,
}

impl PortDef {
  pub fn new(id: impl Into<PortId>, data_type: DataType) -> Self {
    let id = id.into();
    Self {
      title: id.to_string(),
      id,
      data_types: vec![data_type],
      required: false,
      default: None,
    }
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn with_title(mut self, title: impl Into<String>) -> Self {
    self.title = title.into();
    self
  }

  pub fn with_default(mut self, value: DataValue) -> Self {
    self.default = Some(value);
    self
  }

  /// Adds another accepted type to the union.
  pub fn or_type(mut self, data_type: DataType) -> Self {
    self.data_types.push(data_type);
    self
  }

  pub fn data_type(&self) -> DataType {
    self.data_types.first().copied().unwrap_or(DataType::ANY)
  }

  /// Whether any accepted type is an array type.
  pub fn declares_array(&self) -> bool {
    self.data_types.iter().any(|t| t.array)
  }
}
