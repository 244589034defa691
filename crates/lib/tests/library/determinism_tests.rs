//! Multi item aggregation must not depend on completion order.

use std::collections::hash_map::RandomState;
use std::sync::Arc;

use buildchain_lib::{BuildChainBuilder, StepDescriptor};

use super::common::{Count, Report, config, jitter};

const RUNS: usize = 100;
const PRODUCERS: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multi_items_follow_registration_order() {
  let state = Arc::new(RandomState::new());
  let expected: Vec<String> = (0..PRODUCERS)
    .flat_map(|i| [format!("p{i}-0"), format!("p{i}-1")])
    .collect();

  for run in 0..RUNS {
    let mut builder = BuildChainBuilder::new();
    for i in 0..PRODUCERS {
      let state = state.clone();
      builder = builder.add_step(
        StepDescriptor::builder(format!("p{i}"))
          .produces_final::<Report>()
          .build(move |ctx| {
            std::thread::sleep(jitter(&state, run, i, 3));
            ctx.produce_multi(Report(format!("p{i}-0")))?;
            ctx.produce_multi(Report(format!("p{i}-1")))?;
            Ok(())
          }),
      );
    }

    let result = builder.build().unwrap().execution().run(&config(4)).await.unwrap();
    let reports: Vec<String> = result.get_all::<Report>().iter().map(|r| r.0.clone()).collect();
    assert_eq!(reports, expected, "run {run} produced a different order");
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consumers_see_the_same_order_as_the_result() {
  let state = Arc::new(RandomState::new());

  for run in 0..RUNS / 4 {
    let mut builder = BuildChainBuilder::new();
    for i in 0..PRODUCERS {
      let state = state.clone();
      builder = builder.add_step(StepDescriptor::builder(format!("p{i}")).produces::<Report>().build(
        move |ctx| {
          std::thread::sleep(jitter(&state, run, i, 2));
          ctx.produce_multi(Report(i.to_string()))?;
          Ok(())
        },
      ));
    }
    builder = builder.add_step(
      StepDescriptor::builder("collect")
        .consumes::<Report>()
        .produces_final::<Count>()
        .build(|ctx| {
          let digits: String = ctx.consume_multi::<Report>()?.iter().map(|r| r.0.as_str()).collect();
          ctx.produce(Count(digits.parse()?))?;
          Ok(())
        }),
    );

    let result = builder.build().unwrap().execution().run(&config(3)).await.unwrap();
    assert_eq!(result.get::<Count>(), Some(&Count(1234567)));
  }
}
