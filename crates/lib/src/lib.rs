//! buildchain-lib: a build step dependency graph engine.
//!
//! Independently written build steps declare the items they produce and
//! consume. The engine:
//! - derives producer-to-consumer edges between steps (`graph`)
//! - prunes steps whose outputs nobody needs and rejects broken graphs,
//!   reporting every problem at once
//! - runs the remaining steps in parallel as soon as their inputs exist (`execute`)
//! - aggregates multi-valued items deterministically into a `BuildResult`
//!
//! ```
//! use buildchain_lib::step::StepDescriptor;
//! use buildchain_lib::{BuildChainBuilder, ExecuteConfig, simple_build_item};
//!
//! struct Count(u32);
//! struct Doubled(u32);
//! simple_build_item!(Count, Doubled);
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let chain = BuildChainBuilder::new()
//!   .add_step(StepDescriptor::builder("count").produces::<Count>().build(|ctx| {
//!     ctx.produce(Count(5))?;
//!     Ok(())
//!   }))
//!   .add_step(
//!     StepDescriptor::builder("double")
//!       .consumes::<Count>()
//!       .produces_final::<Doubled>()
//!       .build(|ctx| {
//!         let count = ctx.consume::<Count>()?.0;
//!         ctx.produce(Doubled(count * 2))?;
//!         Ok(())
//!       }),
//!   )
//!   .build()
//!   .unwrap();
//!
//! let result = chain.execution().run(&ExecuteConfig::default()).await.unwrap();
//! assert_eq!(result.get::<Doubled>().map(|d| d.0), Some(10));
//! # });
//! ```

pub mod chain;
pub mod execute;
pub mod graph;
pub mod item;
pub mod plan;
pub mod result;
pub mod step;
pub mod store;

#[cfg(test)]
mod util;

pub use chain::{BuildChain, BuildChainBuilder, BuildError, ExecutionBuilder, run};
pub use execute::{ExecuteConfig, ExecutionError, StepExecutionError};
pub use graph::{ChainBuildError, GraphError};
pub use item::{BuildItem, EmptyBuildItem, ItemId, ItemKind, MultiBuildItem, SimpleBuildItem};
pub use result::{BuildReport, BuildResult};
pub use step::{ConsumeMode, StepContext, StepDescriptor};
