use thiserror::Error;

use crate::DataType;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
  #[error("unknown data type '{name}'")]
  UnknownType { name: String },

  #[error("cannot coerce {from} to {to}")]
  Unsupported { from: DataType, to: DataType },

  #[error("invalid value for {to}: {message}")]
  Invalid { to: DataType, message: String },
}
