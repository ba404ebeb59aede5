//! Serde for numbers that survives JSON.
//!
//! JSON has no literal for infinities or NaN, so those are written as the
//! strings `"Infinity"`, `"-Infinity"` and `"NaN"`. Finite numbers stay
//! plain JSON numbers. `null` reads back as NaN, which is what a plain
//! `f64` serializer would have written for any non-finite value.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const INFINITY: &str = "Infinity";
const NEG_INFINITY: &str = "-Infinity";
const NAN: &str = "NaN";

pub(crate) fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
  if n.is_nan() {
    serializer.serialize_str(NAN)
  } else if *n == f64::INFINITY {
    serializer.serialize_str(INFINITY)
  } else if *n == f64::NEG_INFINITY {
    serializer.serialize_str(NEG_INFINITY)
  } else {
    serializer.serialize_f64(*n)
  }
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
  deserializer.deserialize_any(NumberVisitor)
}

struct NumberVisitor;

impl Visitor<'_> for NumberVisitor {
  type Value = f64;

  fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("a number, \"Infinity\", \"-Infinity\" or \"NaN\"")
  }

  fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
    Ok(v)
  }

  fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
    Ok(v as f64)
  }

  fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
    Ok(v as f64)
  }

  fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
    Ok(f64::NAN)
  }

  fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
    match v {
      INFINITY => Ok(f64::INFINITY),
      NEG_INFINITY => Ok(f64::NEG_INFINITY),
      NAN => Ok(f64::NAN),
      other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
    }
  }
}

/// One element of a `number[]`.
struct Element(f64);

impl Serialize for Element {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serialize(&self.0, serializer)
  }
}

impl<'de> Deserialize<'de> for Element {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    deserialize(deserializer).map(Element)
  }
}

pub(crate) mod array {
  use serde::{Deserialize, Deserializer, Serializer};

  use super::Element;

  pub(crate) fn serialize<S: Serializer>(items: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(items.iter().map(|n| Element(*n)))
  }

  pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    let items = Vec::<Element>::deserialize(deserializer)?;
    Ok(items.into_iter().map(|Element(n)| n).collect())
  }
}
