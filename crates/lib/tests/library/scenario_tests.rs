//! Whole-build scenarios: data flow, pruning, weak ordering and overrides.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use buildchain_lib::step::StepError;
use buildchain_lib::{BuildChainBuilder, StepDescriptor};

use super::common::{Count, Doubled, Journal, Marker, Report, Summary, config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn count_doubled_report_scenario() {
  let journal = Journal::default();
  let (ja, jb, jc, jd) = (journal.clone(), journal.clone(), journal.clone(), journal.clone());

  let chain = BuildChainBuilder::new()
    .add_step(StepDescriptor::builder("A").produces::<Count>().build(move |ctx| {
      ja.record("A");
      ctx.produce(Count(5))?;
      Ok(())
    }))
    .add_step(
      StepDescriptor::builder("B")
        .consumes::<Count>()
        .produces::<Doubled>()
        .build(move |ctx| {
          jb.record("B");
          let count = ctx.consume::<Count>()?.0;
          ctx.produce(Doubled(count * 2))?;
          Ok(())
        }),
    )
    .add_step(
      StepDescriptor::builder("C")
        .consumes_optional::<Doubled>()
        .produces_final::<Report>()
        .build(move |ctx| {
          jc.record("C");
          std::thread::sleep(std::time::Duration::from_millis(20));
          ctx.produce_multi(Report("done".into()))?;
          Ok(())
        }),
    )
    .add_step(
      StepDescriptor::builder("D")
        .consumes_optional::<Doubled>()
        .produces_final::<Report>()
        .build(move |ctx| {
          jd.record("D");
          ctx.produce_multi(Report("done2".into()))?;
          Ok(())
        }),
    )
    .build()
    .unwrap();

  let result = chain.execution().run(&config(4)).await.unwrap();

  assert_eq!(result.get::<Count>(), Some(&Count(5)));
  assert_eq!(result.get::<Doubled>(), Some(&Doubled(10)));
  let reports: Vec<&str> = result.get_all::<Report>().iter().map(|r| r.0.as_str()).collect();
  assert_eq!(reports, vec!["done", "done2"]);

  assert!(journal.position("A") < journal.position("B"));
  assert!(journal.position("B") < journal.position("C"));
  assert!(journal.position("B") < journal.position("D"));
  assert_eq!(result.step_records().len(), 4);
  assert!(result.pruned_steps().is_empty());
}

#[tokio::test]
async fn unneeded_chain_is_pruned_and_never_runs() {
  let ran = Arc::new(AtomicBool::new(false));
  let (ran_a, ran_b) = (ran.clone(), ran.clone());

  let chain = BuildChainBuilder::new()
    .add_step(StepDescriptor::builder("a").produces::<Count>().build(move |ctx| {
      ran_a.store(true, Ordering::SeqCst);
      ctx.produce(Count(1))?;
      Ok(())
    }))
    .add_step(
      StepDescriptor::builder("b")
        .consumes::<Count>()
        .produces::<Doubled>()
        .build(move |_| {
          ran_b.store(true, Ordering::SeqCst);
          Ok(())
        }),
    )
    .add_step(
      StepDescriptor::builder("kept")
        .produces_final::<Summary>()
        .build(|ctx| Ok(ctx.produce(Summary("kept".into()))?)),
    )
    .build()
    .unwrap();

  assert_eq!(chain.pruned_steps(), &["a".to_string(), "b".to_string()]);

  let result = chain.execution().run(&config(2)).await.unwrap();
  assert!(!ran.load(Ordering::SeqCst));
  assert_eq!(result.execution_log(), vec!["kept"]);
  assert_eq!(result.pruned_steps(), &["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn weak_consumption_orders_without_forcing() {
  // Nobody needs Marker for its value, so its producer is pruned.
  let chain = BuildChainBuilder::new()
    .add_step(StepDescriptor::builder("p").produces::<Marker>().build(|_| Ok(())))
    .add_step(
      StepDescriptor::builder("w")
        .consumes_weak::<Marker>()
        .produces_final::<Summary>()
        .build(|ctx| Ok(ctx.produce(Summary("w".into()))?)),
    )
    .build()
    .unwrap();

  assert_eq!(chain.pruned_steps(), &["p".to_string()]);
  let result = chain.execution().run(&config(2)).await.unwrap();
  assert_eq!(result.execution_log(), vec!["w"]);

  // Once something else keeps p alive, the weak consumer runs after it.
  let journal = Journal::default();
  let (jp, jw) = (journal.clone(), journal.clone());
  let chain = BuildChainBuilder::new()
    .add_step(StepDescriptor::builder("p").produces::<Marker>().build(move |_| {
      std::thread::sleep(std::time::Duration::from_millis(10));
      jp.record("p");
      Ok(())
    }))
    .add_step(
      StepDescriptor::builder("w")
        .consumes_weak::<Marker>()
        .produces_final::<Summary>()
        .build(move |ctx| {
          jw.record("w");
          // Ordering only: the weak consumer never sees the item itself.
          let hidden = matches!(
            ctx.is_present::<Marker>(),
            Err(StepError::Undeclared { access: "consumed", .. })
          );
          ctx.produce(Summary(format!("hidden={hidden}")))?;
          Ok(())
        }),
    )
    .add_step(
      StepDescriptor::builder("keeper")
        .consumes_optional::<Marker>()
        .produces_final::<Report>()
        .build(|_| Ok(())),
    )
    .build()
    .unwrap();

  let result = chain.execution().run(&config(4)).await.unwrap();
  assert_eq!(journal.entries(), vec!["p".to_string(), "w".to_string()]);
  assert!(result.contains::<Marker>());
  assert_eq!(result.get::<Summary>().map(|summary| summary.0.as_str()), Some("hidden=true"));
}

#[tokio::test]
async fn required_items_flow_through_a_chain() {
  let chain = BuildChainBuilder::new()
    .add_initial::<Count>()
    .add_step(
      StepDescriptor::builder("double")
        .consumes::<Count>()
        .produces::<Doubled>()
        .build(|ctx| {
          let count = ctx.consume::<Count>()?.0;
          ctx.produce(Doubled(count * 2))?;
          Ok(())
        }),
    )
    .add_step(
      StepDescriptor::builder("describe")
        .consumes::<Doubled>()
        .produces_final::<Summary>()
        .build(|ctx| {
          let doubled = ctx.consume::<Doubled>()?.0;
          ctx.produce(Summary(format!("doubled to {doubled}")))?;
          Ok(())
        }),
    )
    .build()
    .unwrap();

  let result = chain.execution().initial(Count(21)).run(&config(2)).await.unwrap();

  assert_eq!(result.get::<Summary>(), Some(&Summary("doubled to 42".into())));
  assert_eq!(result.execution_log(), vec!["double", "describe"]);
}

#[tokio::test]
async fn real_producer_overrides_overridable_one() {
  let chain = BuildChainBuilder::new()
    .add_step(
      StepDescriptor::builder("default-count")
        .produces_overridable::<Count>()
        .build(|ctx| Ok(ctx.produce(Count(1))?)),
    )
    .add_step(
      StepDescriptor::builder("user-count")
        .produces::<Count>()
        .build(|ctx| Ok(ctx.produce(Count(99))?)),
    )
    .add_step(
      StepDescriptor::builder("use")
        .consumes::<Count>()
        .produces_final::<Doubled>()
        .build(|ctx| {
          let count = ctx.consume::<Count>()?.0;
          ctx.produce(Doubled(count * 2))?;
          Ok(())
        }),
    )
    .build()
    .unwrap();

  assert_eq!(chain.pruned_steps(), &["default-count".to_string()]);
  let result = chain.execution().run(&config(2)).await.unwrap();
  assert_eq!(result.get::<Doubled>(), Some(&Doubled(198)));
}

#[tokio::test]
async fn overridable_producer_runs_when_alone() {
  let result = buildchain_lib::run(
    vec![
      StepDescriptor::builder("default-count")
        .produces_overridable::<Count>()
        .build(|ctx| Ok(ctx.produce(Count(1))?)),
      StepDescriptor::builder("use")
        .consumes::<Count>()
        .produces_final::<Doubled>()
        .build(|ctx| {
          let count = ctx.consume::<Count>()?.0;
          ctx.produce(Doubled(count * 2))?;
          Ok(())
        }),
    ],
    &config(2),
  )
  .await
  .unwrap();

  assert_eq!(result.get::<Doubled>(), Some(&Doubled(2)));
}

#[tokio::test]
async fn report_lists_steps_and_items() {
  let result = buildchain_lib::run(
    vec![
      StepDescriptor::builder("a")
        .produces_final::<Report>()
        .build(|ctx| Ok(ctx.produce_multi(Report("x".into()))?)),
    ],
    &config(1),
  )
  .await
  .unwrap();

  let report = result.report();
  assert_eq!(report.steps.len(), 1);
  assert_eq!(report.steps[0].name, "a");
  let item = report.items.iter().find(|i| i.name == "Report").unwrap();
  assert_eq!(item.count, 1);
}
