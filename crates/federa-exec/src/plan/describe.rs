//! Read-only plan descriptions for display and debugging.

use std::fmt;

use federa_common::types::NodeId;

use super::{NodeSpec, QueryPlan};
use crate::sort::ListComparator;

/// Tree-shaped summary of a plan: node types, their properties and
/// estimated cardinalities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDescription {
    /// Node this entry describes.
    pub node_id: NodeId,
    /// Node kind, as reported by the execution node.
    pub node_type: String,
    /// Named properties in display order.
    pub properties: Vec<(String, String)>,
    /// Expected output cardinality, when known.
    pub estimated_rows: Option<usize>,
    /// Descriptions of the inputs.
    pub children: Vec<PlanDescription>,
}

impl PlanDescription {
    pub(crate) fn of(plan: &QueryPlan, id: NodeId) -> Self {
        let Some(node) = plan.node(id) else {
            return Self {
                node_id: id,
                node_type: "Unknown".to_string(),
                properties: Vec::new(),
                estimated_rows: None,
                children: Vec::new(),
            };
        };
        Self {
            node_id: id,
            node_type: node.spec.node_type().to_string(),
            properties: properties(&node.spec),
            estimated_rows: node.estimated_rows,
            children: node
                .children
                .iter()
                .map(|child| Self::of(plan, *child))
                .collect(),
        }
    }

    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Counts the nodes in this subtree.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        write!(f, "{}{} [{}]", "  ".repeat(indent), self.node_type, self.node_id)?;
        if !self.properties.is_empty() {
            let details: Vec<String> = self
                .properties
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            write!(f, " ({})", details.join(", "))?;
        }
        if let Some(rows) = self.estimated_rows {
            write!(f, " rows={rows}")?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.fmt_indented(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

fn properties(spec: &NodeSpec) -> Vec<(String, String)> {
    let mut props = Vec::new();
    let mut add = |key: &str, value: String| props.push((key.to_string(), value));
    match spec {
        NodeSpec::Values { rows } => add("rows", rows.len().to_string()),
        NodeSpec::Access {
            source_name,
            command,
            connection_hint,
        } => {
            add("source", source_name.clone());
            add("command", command.to_string());
            if let Some(hint) = connection_hint {
                add("connection", hint.clone());
            }
        }
        NodeSpec::DependentAccess {
            source_name,
            command,
        } => {
            add("source", source_name.clone());
            add("command", command.to_string());
        }
        NodeSpec::Sort { mode, comparator } => {
            add("mode", mode.to_string());
            if !comparator.keys().is_empty() {
                add("keys", sort_keys(comparator));
            }
        }
        NodeSpec::Join(join) => {
            add("type", join.join_type.to_string());
            add("strategy", join.effective_strategy().to_string());
            if !join.left_keys.is_empty() {
                add("left_keys", columns(&join.left_keys));
                add("right_keys", columns(&join.right_keys));
            }
            if let Some(criteria) = &join.criteria {
                add("criteria", criteria.to_string());
            }
            if let Some(source) = &join.dependent_source {
                add("dependent", source.clone());
            }
        }
        NodeSpec::Grouping {
            group_by,
            aggregates,
        } => {
            if !group_by.is_empty() {
                add("group_by", join_display(group_by));
            }
            add("aggregates", join_display(aggregates));
        }
        NodeSpec::Project {
            expressions,
            subqueries,
        } => {
            add("exprs", join_display(expressions));
            if !subqueries.is_empty() {
                add("subqueries", subqueries.len().to_string());
            }
        }
        NodeSpec::Select {
            predicate,
            subqueries,
        } => {
            add("predicate", predicate.to_string());
            if !subqueries.is_empty() {
                add("subqueries", subqueries.len().to_string());
            }
        }
        NodeSpec::Limit { offset, limit } => {
            if *offset > 0 {
                add("offset", offset.to_string());
            }
            if let Some(limit) = limit {
                add("limit", limit.to_string());
            }
        }
        NodeSpec::Union => {}
        NodeSpec::Insert { source_name, table } => {
            add("source", source_name.clone());
            add("insert", table.clone());
        }
        NodeSpec::Update {
            source_name,
            command,
        } => {
            add("source", source_name.clone());
            add("command", command.to_string());
        }
    }
    props
}

fn columns(cols: &[usize]) -> String {
    let cols: Vec<String> = cols.iter().map(|c| format!("#{c}")).collect();
    format!("[{}]", cols.join(", "))
}

fn sort_keys(comparator: &ListComparator) -> String {
    let keys: Vec<String> = comparator
        .keys()
        .iter()
        .map(|k| format!("#{} {}", k.column, if k.ascending { "ASC" } else { "DESC" }))
        .collect();
    format!("[{}]", keys.join(", "))
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    let items: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}
