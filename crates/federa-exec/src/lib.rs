//! # federa-exec
//!
//! Pull-based execution core of the Federa federated query engine.
//!
//! An immutable [`QueryPlan`](plan::QueryPlan) is turned into a fresh
//! tree of [`ExecNode`](node::ExecNode)s for every execution. The root is
//! driven by a [`QueryProcessor`](processor::QueryProcessor), which pulls
//! batches until one is flagged final.
//!
//! Nodes never block. When a data source or buffer has nothing ready,
//! `next_batch` returns `Poll::Pending` and keeps its partial results, so
//! the caller can simply call it again later.
//!
//! ## Modules
//!
//! - [`poll`]: the suspension protocol
//! - [`node`]: node trait and the simple node kinds
//! - [`sort`]: external multi-pass sort and duplicate removal
//! - [`join`]: merge, nested-loop, partitioned and dependent joins
//! - [`grouping`]: grouping and aggregation
//! - [`dependent`]: runtime IN-list parameterization of commands
//! - [`plan`]: immutable plans, the plan builder and plan descriptions
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use federa_buffer::{BufferConfig, MemoryBufferManager};
//! use federa_common::{DataType, ExecutionConfig, Field, ProcessId, Schema};
//! use federa_exec::context::CommandContext;
//! use federa_exec::plan::PlanBuilder;
//! use federa_exec::processor::QueryProcessor;
//! use federa_exec::source::MemoryDataManager;
//! use federa_common::row;
//!
//! let schema = Arc::new(Schema::new(vec![Field::nullable("n", DataType::Int)]));
//! let mut builder = PlanBuilder::new();
//! let values = builder.values(schema, vec![row![3], row![1], row![2]]);
//! let sorted = builder.sort_by_columns(values, &[0]).unwrap();
//! let plan = builder.build(sorted).unwrap();
//!
//! let config = ExecutionConfig::new();
//! let buffers = MemoryBufferManager::shared(BufferConfig::from_execution(&config)).unwrap();
//! let ctx = CommandContext::shared(
//!     ProcessId::new(1),
//!     config,
//!     buffers,
//!     Arc::new(MemoryDataManager::new()),
//! );
//! let mut processor = QueryProcessor::new(&plan, ctx).unwrap();
//! let rows = processor.run_to_completion().unwrap();
//! assert_eq!(rows, vec![row![1], row![2], row![3]]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod poll;

pub mod buffer;
pub mod context;
pub mod dependent;
pub mod expr;
pub mod grouping;
pub mod join;
pub mod node;
pub mod plan;
pub mod processor;
pub mod rows;
pub mod sort;
pub mod source;
pub mod subquery;

#[cfg(test)]
pub(crate) mod test_util;

pub use context::CommandContext;
pub use node::ExecNode;
pub use plan::{PlanBuilder, QueryPlan};
pub use poll::{Poll, PollResult};
pub use processor::QueryProcessor;
