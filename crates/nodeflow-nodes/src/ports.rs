use nodeflow_graph::PortId;
use nodeflow_node::{Inputs, Outputs, PortDef};
use nodeflow_value::{DataType, DataValue};

/// `{prefix}1..={count}` ports of one type.
pub(crate) fn numbered_ports(prefix: &str, count: usize, data_type: DataType) -> Vec<PortDef> {
  (1..=count)
    .map(|i| PortDef::new(format!("{prefix}{i}"), data_type))
    .collect()
}

/// Inputs named exactly `{prefix}N`, ordered by `N`.
pub(crate) fn numbered_inputs<'a>(inputs: &'a Inputs, prefix: &str) -> Vec<(usize, &'a DataValue)> {
  let mut numbered: Vec<_> = inputs
    .iter()
    .filter_map(|(id, value)| {
      let n = id.as_str().strip_prefix(prefix)?.parse::<usize>().ok()?;
      Some((n, value))
    })
    .collect();
  numbered.sort_by_key(|(n, _)| *n);
  numbered
}

pub(crate) fn outputs<'a>(pairs: impl IntoIterator<Item = (&'a str, DataValue)>) -> Outputs {
  pairs
    .into_iter()
    .map(|(id, value)| (PortId::from(id), value))
    .collect()
}

/// A present, non-excluded input.
pub(crate) fn present<'a>(inputs: &'a Inputs, id: &str) -> Option<&'a DataValue> {
  inputs.get(id).filter(|v| !v.is_excluded())
}
