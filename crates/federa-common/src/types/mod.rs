//! Core types for the Federa execution core.
//!
//! This module contains the fundamental data types shared by every node:
//! identifiers, runtime values, rows, schemas and tuple batches.

mod batch;
mod ids;
mod row;
mod schema;
mod value;

pub use batch::TupleBatch;
pub use ids::{BufferId, NodeId, ProcessId};
pub use row::Row;
pub use schema::{DataType, Field, Schema};
pub use value::{NullOrdering, Value};
