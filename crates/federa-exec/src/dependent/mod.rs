//! Dependent criteria.
//!
//! A dependent command carries `expr IN <values>` predicates whose values
//! are only known at runtime: the rows a dependent join published for its
//! right side, or a literal list too long to send at once. The
//! [`DependentCriteriaProcessor`] rewrites such criteria into a series of
//! bounded `IN` lists and [`DependentAccessNode`] submits one command per
//! rewrite.

mod access;
mod processor;

pub use access::DependentAccessNode;
pub use processor::DependentCriteriaProcessor;
