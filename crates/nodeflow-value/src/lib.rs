//! Nodeflow Value
//!
//! The tagged value model that flows between node ports. Every value carries
//! its type tag: a scalar type or the array form of one. Arrays are
//! homogeneous by construction since each array variant wraps a vector of
//! one scalar representation.
//!
//! A special sentinel, [`DataValue::ControlFlowExcluded`], marks a port that
//! intentionally produced nothing because a branch was not taken.

pub mod coerce;
mod data_type;
mod error;
mod number;
mod value;

pub use data_type::{DataType, ScalarType};
pub use error::ValueError;
pub use value::{ChatMessage, ChatRole, DataValue, Exclusion, FunctionDescriptor};
