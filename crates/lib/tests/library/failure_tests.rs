//! Graph errors and step failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use buildchain_lib::{BuildChainBuilder, BuildError, ExecutionError, GraphError, ItemId, StepDescriptor};

use super::common::{Count, Doubled, Marker, Report, Summary, config};

#[test]
fn every_graph_error_is_reported_together() {
  let err = BuildChainBuilder::new()
    .add_step(StepDescriptor::builder("a1").produces_final::<Count>().build(|_| Ok(())))
    .add_step(StepDescriptor::builder("a2").produces_final::<Count>().build(|_| Ok(())))
    .add_step(
      StepDescriptor::builder("orphan")
        .consumes::<Summary>()
        .produces_final::<Report>()
        .build(|_| Ok(())),
    )
    .add_step(
      StepDescriptor::builder("x")
        .consumes::<Doubled>()
        .produces_final::<Marker>()
        .build(|_| Ok(())),
    )
    .add_step(
      StepDescriptor::builder("y")
        .consumes::<Marker>()
        .produces::<Doubled>()
        .build(|_| Ok(())),
    )
    .build()
    .unwrap_err();

  let errors = err.errors();
  assert!(errors.contains(&GraphError::AmbiguousProducer {
    item: ItemId::of::<Count>(),
    steps: vec!["a1".into(), "a2".into()],
  }));
  assert!(errors.contains(&GraphError::MissingProducer {
    step: "orphan".into(),
    item: ItemId::of::<Summary>(),
  }));
  assert!(errors.contains(&GraphError::CyclicDependency {
    cycle: vec!["x".into(), "y".into(), "x".into()],
  }));

  let rendered = err.to_string();
  assert!(rendered.contains("multiple producers of single item `Count`: a1, a2"));
  assert!(rendered.contains("dependency cycle: x -> y -> x"));
}

#[tokio::test]
async fn failed_step_blocks_its_dependents() {
  let dependent_ran = Arc::new(AtomicBool::new(false));
  let flag = dependent_ran.clone();

  let err = buildchain_lib::run(
    vec![
      StepDescriptor::builder("broken")
        .produces::<Count>()
        .build(|_| anyhow::bail!("cannot count")),
      StepDescriptor::builder("dependent")
        .consumes::<Count>()
        .produces_final::<Doubled>()
        .build(move |_| {
          flag.store(true, Ordering::SeqCst);
          Ok(())
        }),
    ],
    &config(2),
  )
  .await
  .unwrap_err();

  let BuildError::Execution(err) = err else {
    panic!("expected an execution error");
  };
  assert_eq!(err.failed_step(), Some("broken"));
  assert!(err.to_string().contains("cannot count"));
  assert!(!dependent_ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn in_flight_steps_drain_before_failure_is_returned() {
  let slow_finished = Arc::new(AtomicBool::new(false));
  let flag = slow_finished.clone();

  let chain = BuildChainBuilder::new()
    .add_step(
      StepDescriptor::builder("fails-fast")
        .produces_final::<Report>()
        .build(|_| {
          std::thread::sleep(Duration::from_millis(5));
          anyhow::bail!("fast failure")
        }),
    )
    .add_step(
      StepDescriptor::builder("slow")
        .produces_final::<Summary>()
        .build(move |ctx| {
          std::thread::sleep(Duration::from_millis(150));
          ctx.produce(Summary("late".into()))?;
          flag.store(true, Ordering::SeqCst);
          Ok(())
        }),
    )
    .add_step(
      StepDescriptor::builder("after-slow")
        .consumes::<Summary>()
        .produces_final::<Count>()
        .build(|_| panic!("must not be scheduled after a failure")),
    )
    .build()
    .unwrap();

  let err = chain.execution().run(&config(2)).await.unwrap_err();

  assert!(slow_finished.load(Ordering::SeqCst));
  match err {
    ExecutionError::StepFailed { first, secondary } => {
      assert_eq!(first.step, "fails-fast");
      assert!(secondary.is_empty());
    }
    other => panic!("expected a step failure, got {other}"),
  }
}

#[tokio::test]
async fn step_misuse_of_context_fails_the_step() {
  let err = buildchain_lib::run(
    vec![
      StepDescriptor::builder("sneaky")
        .produces_final::<Count>()
        .build(|ctx| {
          ctx.produce(Doubled(1))?;
          Ok(())
        }),
    ],
    &config(1),
  )
  .await
  .unwrap_err();

  assert!(
    err
      .to_string()
      .contains("step `sneaky` does not declare `Doubled` as produced")
  );
}
