//! Execution of a single dispatched node.
//!
//! A job runs in its own task. It either replays a recorded execution,
//! executes the node once, or fans out into split-run branches and gathers
//! their results back into arrays. Cancellation of the job's token wins over
//! whatever the node is doing, after a short grace period in which the node
//! may wind down.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{join_all, try_join_all};
use nodeflow_graph::{NodeId, PortId};
use nodeflow_node::{ExecutionContext, Inputs, NodeError, NodeImpl, Outputs};
use nodeflow_value::{DataType, DataValue};
use tracing::{debug, instrument, warn};

use crate::{ReplaySource, ReplayedOutcome};

/// How long a cancelled node may keep running to report its own end.
const CANCEL_GRACE: Duration = Duration::from_millis(250);

/// How a split-run node fans out.
#[derive(Debug, Clone)]
pub(crate) struct SplitPlan {
  pub count: usize,
  /// Array inputs whose elements are handed out one per branch.
  pub ports: Vec<(PortId, Vec<DataValue>)>,
  /// Declared output ports and their per-branch types, each gathered into
  /// an array.
  pub outputs: Vec<(PortId, DataType)>,
  pub sequential: bool,
  pub isolate_errors: bool,
}

pub(crate) struct NodeJob {
  pub node_id: NodeId,
  pub node_type: String,
  pub imp: Arc<dyn NodeImpl>,
  pub inputs: Inputs,
  pub split: Option<SplitPlan>,
  pub ctx: ExecutionContext,
  pub replay: Option<Arc<dyn ReplaySource>>,
}

#[derive(Debug)]
pub(crate) enum JobFailure {
  Node(NodeError),
  /// Replay had no entry for this node and iteration.
  ReplayMismatch,
}

#[derive(Debug)]
pub(crate) struct JobResult {
  pub node_id: NodeId,
  pub iteration: u32,
  pub outcome: Result<Outputs, JobFailure>,
}

#[instrument(
  name = "node_execute",
  skip(job),
  fields(
    node_id = %job.node_id,
    process_id = %job.ctx.process_id(),
    iteration = job.ctx.iteration(),
  )
)]
pub(crate) async fn run_job(job: NodeJob) -> JobResult {
  let node_id = job.node_id.clone();
  let iteration = job.ctx.iteration();
  let cancel = job.ctx.cancellation().clone();

  let work = AssertUnwindSafe(execute(job)).catch_unwind();
  tokio::pin!(work);
  let outcome = tokio::select! {
    result = &mut work => result.unwrap_or_else(|_| {
      warn!(node_id = %node_id, "node_panicked");
      Err(JobFailure::Node(NodeError::failed("node panicked")))
    }),
    _ = cancel.cancelled() => {
      // A subgraph child reports its own end while winding down
      if tokio::time::timeout(CANCEL_GRACE, &mut work).await.is_err() {
        debug!(node_id = %node_id, "node_abandoned");
      }
      Err(JobFailure::Node(NodeError::Aborted))
    }
  };

  JobResult {
    node_id,
    iteration,
    outcome,
  }
}

async fn execute(job: NodeJob) -> Result<Outputs, JobFailure> {
  let NodeJob {
    node_id,
    node_type,
    imp,
    inputs,
    split,
    ctx,
    replay,
  } = job;

  if let Some(replay) = replay {
    let replayed = replay
      .replay(&node_id, &node_type, ctx.iteration())
      .ok_or(JobFailure::ReplayMismatch)?;
    if let Some(delay) = replayed.delay {
      ctx.sleep(delay).await.map_err(JobFailure::Node)?;
    }
    return match replayed.outcome {
      ReplayedOutcome::Completed(outputs) => Ok(outputs),
      ReplayedOutcome::Failed(message) => Err(JobFailure::Node(NodeError::failed(message))),
      ReplayedOutcome::Aborted => {
        ctx.cancellation().cancelled().await;
        Err(JobFailure::Node(NodeError::Aborted))
      }
    };
  }

  let result = match split {
    Some(split) => run_split(imp.as_ref(), &inputs, split, &ctx).await,
    None => imp.execute(inputs, &ctx).await,
  };
  result.map_err(JobFailure::Node)
}

async fn run_split(
  imp: &dyn NodeImpl,
  inputs: &Inputs,
  split: SplitPlan,
  ctx: &ExecutionContext,
) -> Result<Outputs, NodeError> {
  let branch = |index: usize| {
    let mut branch_inputs = inputs.clone();
    for (port, items) in &split.ports {
      match items.get(index) {
        Some(item) => branch_inputs.insert(port.clone(), item.clone()),
        None => branch_inputs.remove(port),
      };
    }
    let ctx = ctx.for_branch(index);
    async move {
      let result = imp.execute(branch_inputs, &ctx).await;
      if let Ok(outputs) = &result {
        ctx.emit_partial(outputs.clone());
      }
      result
    }
  };

  let results: Vec<Result<Outputs, NodeError>> = match (split.sequential, split.isolate_errors) {
    (true, isolate) => {
      let mut results = Vec::with_capacity(split.count);
      for index in 0..split.count {
        let result = branch(index).await;
        if !isolate {
          results.push(Ok(result?));
        } else {
          results.push(result);
        }
      }
      results
    }
    (false, true) => join_all((0..split.count).map(branch)).await,
    (false, false) => try_join_all((0..split.count).map(branch))
      .await?
      .into_iter()
      .map(Ok)
      .collect(),
  };

  Ok(gather(ctx, &split.outputs, results))
}

/// Collects per-branch outputs into one array per port, in branch order.
/// Failed branches contribute `null`; a port every branch excluded stays
/// excluded. With no branches at all a declared port gets the empty array of
/// its type.
fn gather(
  ctx: &ExecutionContext,
  declared: &[(PortId, DataType)],
  results: Vec<Result<Outputs, NodeError>>,
) -> Outputs {
  let mut ports: BTreeSet<PortId> = declared.iter().map(|(port, _)| port.clone()).collect();
  for outputs in results.iter().flatten() {
    ports.extend(outputs.keys().cloned());
  }
  let empty = |port: &PortId| {
    declared
      .iter()
      .find(|(id, _)| id == port)
      .filter(|(_, ty)| !ty.array)
      .map_or(DataValue::AnyArray(Vec::new()), |(_, ty)| {
        DataType::array_of(ty.scalar).default_value()
      })
  };

  for (index, result) in results.iter().enumerate() {
    if let Err(err) = result {
      warn!(node_id = %ctx.node_id(), branch = index, error = %err, "split_branch_failed");
    }
  }

  ports
    .into_iter()
    .map(|port| {
      let values: Vec<DataValue> = results
        .iter()
        .map(|result| match result {
          Ok(outputs) => outputs.get(&port).cloned().unwrap_or_else(DataValue::excluded),
          Err(_) => DataValue::Any(serde_json::Value::Null),
        })
        .collect();
      let value = if values.is_empty() {
        empty(&port)
      } else if values.iter().all(DataValue::is_excluded) {
        DataValue::excluded()
      } else {
        DataValue::collect_array(values)
      };
      (port, value)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use nodeflow_graph::{Connection, Project};
  use nodeflow_node::{ExecutionKey, PortDef, ProcessId, Settings, StandaloneServices};
  use tokio_util::sync::CancellationToken;

  /// Upper-cases `text`, failing on "boom" and sleeping longer for earlier
  /// branches so they finish last.
  struct Shout;

  #[async_trait]
  impl NodeImpl for Shout {
    fn input_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
      vec![PortDef::new("text", DataType::STRING)]
    }

    fn output_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
      vec![PortDef::new("output", DataType::STRING)]
    }

    async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
      let text = inputs["text"].as_str().unwrap_or_default().to_string();
      if text == "boom" {
        return Err(NodeError::failed("boom"));
      }
      let wait = 30 - 10 * ctx.branch().unwrap_or(0) as u64;
      ctx.sleep(Duration::from_millis(wait)).await?;
      let mut out = Outputs::new();
      out.insert("output".into(), DataValue::String(text.to_uppercase()));
      Ok(out)
    }
  }

  fn context() -> ExecutionContext {
    let key = ExecutionKey {
      node_id: "shout".into(),
      process_id: ProcessId::new(),
      iteration: 0,
      branch: None,
    };
    ExecutionContext::new(
      key,
      Arc::new(Settings::new()),
      CancellationToken::new(),
      Arc::new(StandaloneServices::new(Project::default())),
    )
  }

  fn split(items: &[&str], sequential: bool, isolate_errors: bool) -> SplitPlan {
    SplitPlan {
      count: items.len(),
      ports: vec![(
        "text".into(),
        items.iter().map(|s| DataValue::from(*s)).collect(),
      )],
      outputs: vec![("output".into(), DataType::STRING)],
      sequential,
      isolate_errors,
    }
  }

  #[tokio::test]
  async fn test_parallel_branches_keep_input_order() {
    let out = run_split(&Shout, &Inputs::new(), split(&["a", "b", "c"], false, false), &context())
      .await
      .unwrap();
    assert_eq!(
      out["output"],
      DataValue::StringArray(vec!["A".into(), "B".into(), "C".into()])
    );
  }

  #[tokio::test]
  async fn test_first_error_fails_the_node() {
    for sequential in [false, true] {
      let err = run_split(&Shout, &Inputs::new(), split(&["a", "boom"], sequential, false), &context())
        .await
        .unwrap_err();
      assert_eq!(err.to_string(), "boom");
    }
  }

  #[tokio::test]
  async fn test_isolated_errors_become_nulls() {
    let out = run_split(&Shout, &Inputs::new(), split(&["a", "boom", "c"], true, true), &context())
      .await
      .unwrap();
    assert_eq!(
      out["output"],
      DataValue::AnyArray(vec![
        serde_json::json!("A"),
        serde_json::Value::Null,
        serde_json::json!("C")
      ])
    );
  }

  #[tokio::test]
  async fn test_empty_split_keeps_declared_array_type() {
    let out = run_split(&Shout, &Inputs::new(), split(&[], false, false), &context())
      .await
      .unwrap();
    assert_eq!(out["output"], DataValue::StringArray(Vec::new()));
  }

  struct Recorded(ReplayedOutcome);

  impl ReplaySource for Recorded {
    fn replay(&self, _: &NodeId, _: &str, _: u32) -> Option<crate::ReplayedExecution> {
      Some(crate::ReplayedExecution {
        outcome: self.0.clone(),
        delay: None,
      })
    }
  }

  fn replayed_job(outcome: ReplayedOutcome, ctx: ExecutionContext) -> NodeJob {
    NodeJob {
      node_id: "shout".into(),
      node_type: "shout".into(),
      imp: Arc::new(Shout),
      inputs: Inputs::new(),
      split: None,
      ctx,
      replay: Some(Arc::new(Recorded(outcome))),
    }
  }

  #[tokio::test]
  async fn test_replayed_failure_fails_node() {
    let result = run_job(replayed_job(ReplayedOutcome::Failed("boom".into()), context())).await;
    match result.outcome {
      Err(JobFailure::Node(err)) => assert_eq!(err.to_string(), "boom"),
      other => panic!("expected a node failure, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_replayed_abort_waits_for_cancellation() {
    let ctx = context();
    let cancel = ctx.cancellation().clone();
    let job = tokio::spawn(run_job(replayed_job(ReplayedOutcome::Aborted, ctx)));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!job.is_finished());
    cancel.cancel();
    let result = job.await.unwrap();
    assert!(matches!(result.outcome, Err(JobFailure::Node(NodeError::Aborted))));
  }

  #[tokio::test]
  async fn test_cancelled_node_may_wind_down() {
    use std::sync::atomic::{AtomicBool, Ordering};

    struct WindDown(Arc<AtomicBool>);

    #[async_trait]
    impl NodeImpl for WindDown {
      fn input_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
        Vec::new()
      }

      fn output_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
        Vec::new()
      }

      async fn execute(&self, _: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
        ctx.cancellation().cancelled().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.0.store(true, Ordering::SeqCst);
        Err(NodeError::Aborted)
      }
    }

    let wound_down = Arc::new(AtomicBool::new(false));
    let ctx = context();
    let cancel = ctx.cancellation().clone();
    let job = NodeJob {
      node_id: "wind".into(),
      node_type: "wind".into(),
      imp: Arc::new(WindDown(wound_down.clone())),
      inputs: Inputs::new(),
      split: None,
      ctx,
      replay: None,
    };
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      cancel.cancel();
    });

    let result = run_job(job).await;
    assert!(matches!(result.outcome, Err(JobFailure::Node(NodeError::Aborted))));
    assert!(wound_down.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_replay_mismatch() {
    struct Empty;
    impl ReplaySource for Empty {
      fn replay(&self, _: &NodeId, _: &str, _: u32) -> Option<crate::ReplayedExecution> {
        None
      }
    }

    let job = NodeJob {
      node_id: "shout".into(),
      node_type: "shout".into(),
      imp: Arc::new(Shout),
      inputs: Inputs::new(),
      split: None,
      ctx: context(),
      replay: Some(Arc::new(Empty)),
    };
    let result = run_job(job).await;
    assert!(matches!(result.outcome, Err(JobFailure::ReplayMismatch)));
  }

  #[tokio::test]
  async fn test_cancelled_job_reports_aborted() {
    let ctx = context();
    ctx.cancellation().cancel();
    let mut inputs = Inputs::new();
    inputs.insert("text".into(), DataValue::from("slow"));
    let job = NodeJob {
      node_id: "shout".into(),
      node_type: "shout".into(),
      imp: Arc::new(Shout),
      inputs,
      split: None,
      ctx,
      replay: None,
    };
    let result = run_job(job).await;
    assert!(matches!(result.outcome, Err(JobFailure::Node(NodeError::Aborted))));
  }
}
