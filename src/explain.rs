//! Read-only rendering of an optimized plan for diagnostics.
//!
//! The explanation lists every node in execution order (subquery bodies
//! right before the subquery node that runs them), the rules that fired and
//! any warnings. It renders as an aligned text table or as JSON. Nothing in
//! here feeds back into optimization.

use std::fmt::Write as _;

use serde::Serialize;

use crate::plan::{
    format_number, ExecutionHints, ExchangeOp, IndexRange, NodeId, NodeKind, Plan, ScanOrder,
    SortStrategy, VariableTable,
};

/// Diagnostic view of a plan.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    /// Nodes in execution order.
    pub nodes: Vec<ExplainNode>,
    /// Applied rule names in firing order.
    pub rules: Vec<String>,
    /// Advisory warnings raised during optimization.
    pub warnings: Vec<String>,
    /// Structural fingerprint of the plan.
    pub plan_hash: u64,
}

/// One plan node as shown in explain output.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainNode {
    /// Node id.
    pub id: NodeId,
    /// Node type name, e.g. `IndexNode`.
    #[serde(rename = "type")]
    pub node_type: &'static str,
    /// Estimated number of output rows.
    pub estimated_items: u64,
    /// Query-like rendering of the node.
    pub description: String,
    /// Subquery nesting depth.
    pub depth: usize,
    /// Execution hints and other node details.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub props: Vec<ExplainProp>,
}

/// Single key/value detail of an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value formatted for display.
    pub value: String,
}

impl ExplainProp {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Explanation {
    /// Describes `plan` together with the rules and warnings of its run.
    pub fn new(plan: &Plan, rules: &[&'static str], warnings: &[String]) -> Self {
        let vars = plan.variables();
        let nodes = plan
            .walk()
            .into_iter()
            .filter_map(|(id, depth)| {
                let node = plan.node(id)?;
                Some(ExplainNode {
                    id,
                    node_type: node.kind.type_name(),
                    estimated_items: node.estimated_nr_items,
                    description: describe(&node.kind, &node.hints, vars),
                    depth,
                    props: props(&node.kind, &node.hints),
                })
            })
            .collect();
        Self {
            nodes,
            rules: rules.iter().map(|r| (*r).to_owned()).collect(),
            warnings: warnings.to_vec(),
            plan_hash: plan.fingerprint(),
        }
    }

    /// Node with the given id.
    pub fn node(&self, id: NodeId) -> Option<&ExplainNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Aligned text table followed by the applied rules and warnings.
    pub fn to_text(&self) -> String {
        let id_width = self
            .nodes
            .iter()
            .map(|n| n.id.to_string().len())
            .max()
            .unwrap_or(0)
            .max(2);
        let type_width = self
            .nodes
            .iter()
            .map(|n| n.node_type.len())
            .max()
            .unwrap_or(0)
            .max(8);
        let est_width = self
            .nodes
            .iter()
            .map(|n| n.estimated_items.to_string().len())
            .max()
            .unwrap_or(0)
            .max(4);

        let mut out = String::from("Execution plan:\n");
        let _ = writeln!(
            out,
            " {:>id_width$}   {:<type_width$}   {:>est_width$}   Comment",
            "Id", "NodeType", "Est."
        );
        for node in &self.nodes {
            let marker = if node.node_type == "SingletonNode" { "*" } else { "-" };
            let _ = writeln!(
                out,
                " {:>id_width$}   {:<type_width$}   {:>est_width$}   {}{} {}",
                node.id,
                node.node_type,
                node.estimated_items,
                "  ".repeat(node.depth),
                marker,
                node.description
            );
        }

        out.push_str("\nOptimization rules applied:\n");
        if self.rules.is_empty() {
            out.push_str(" none\n");
        } else {
            let width = self.rules.len().to_string().len().max(2);
            let _ = writeln!(out, " {:>width$}   RuleName", "Id");
            for (pos, rule) in self.rules.iter().enumerate() {
                let _ = writeln!(out, " {:>width$}   {}", pos + 1, rule);
            }
        }

        if !self.warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for warning in &self.warnings {
                let _ = writeln!(out, " - {warning}");
            }
        }
        out
    }
}

fn describe(kind: &NodeKind, hints: &ExecutionHints, vars: &VariableTable) -> String {
    let name = |var| vars.name(var);
    match kind {
        NodeKind::Singleton => "ROOT".to_owned(),
        NodeKind::EnumerateCollection {
            collection,
            out_var,
        } => {
            let mut notes = vec!["full collection scan".to_owned()];
            notes.extend(projection_notes(hints));
            format!("FOR {} IN {}   /* {} */", name(*out_var), collection, notes.join(", "))
        }
        NodeKind::IndexScan {
            collection,
            out_var,
            index,
            ranges,
            order,
        } => {
            let mut notes = vec![format!(
                "{} index scan using {}",
                index.kind.as_str(),
                index.display_name()
            )];
            if !ranges.is_empty() {
                let doc = name(*out_var);
                let conditions: Vec<String> =
                    ranges.iter().map(|r| describe_range(&doc, r)).collect();
                notes.push(format!("condition: {}", conditions.join(" && ")));
            }
            if *order == ScanOrder::Reverse {
                notes.push("reverse".to_owned());
            }
            if hints.sort_strategy == SortStrategy::IndexOrder {
                notes.push("sorted by index".to_owned());
            }
            notes.extend(projection_notes(hints));
            format!("FOR {} IN {}   /* {} */", name(*out_var), collection, notes.join(", "))
        }
        NodeKind::EnumerateList { in_var, out_var } => {
            format!("FOR {} IN {}   /* list iteration */", name(*out_var), name(*in_var))
        }
        NodeKind::Calculation { out_var, expr } => {
            format!("LET {} = {}", name(*out_var), expr.display(vars))
        }
        NodeKind::Filter { condition } => format!("FILTER {}", condition.display(vars)),
        NodeKind::Sort { elements, .. } => {
            let keys: Vec<String> = elements
                .iter()
                .map(|e| format!("{} {}", name(e.var), if e.ascending { "ASC" } else { "DESC" }))
                .collect();
            let strategy = match hints.sort_strategy {
                SortStrategy::Grouped => {
                    format!("grouped({})", hints.number_of_top_grouped_elements)
                }
                SortStrategy::Standard => "standard".to_owned(),
                SortStrategy::IndexOrder => "index-order".to_owned(),
            };
            format!("SORT {}   /* sorting strategy: {} */", keys.join(", "), strategy)
        }
        NodeKind::Limit { offset, count } => format!("LIMIT {offset}, {count}"),
        NodeKind::Aggregate { groups, into } => {
            let mut text = String::from("COLLECT");
            let keys: Vec<String> = groups
                .iter()
                .map(|g| format!("{} = {}", name(g.out_var), name(g.in_var)))
                .collect();
            if !keys.is_empty() {
                text.push(' ');
                text.push_str(&keys.join(", "));
            }
            if let Some(into) = into {
                let _ = write!(text, " INTO {}", name(*into));
            }
            text
        }
        NodeKind::Return { in_var } => format!("RETURN {}", name(*in_var)),
        NodeKind::Subquery { out_var, .. } => {
            format!("LET {} = ( ... )   /* subquery */", name(*out_var))
        }
        NodeKind::NoResults => "/* empty result set */".to_owned(),
        NodeKind::Modification {
            collection, in_var, ..
        } => {
            let keyword = kind.modification_keyword().unwrap_or("MODIFY");
            let preposition = if keyword == "INSERT" { "INTO" } else { "IN" };
            format!("{keyword} {} {preposition} {collection}", name(*in_var))
        }
        NodeKind::Exchange { op } => match op {
            ExchangeOp::Scatter => "SCATTER".to_owned(),
            ExchangeOp::Gather => "GATHER".to_owned(),
            ExchangeOp::Distribute => "DISTRIBUTE".to_owned(),
            ExchangeOp::Remote => "REMOTE".to_owned(),
        },
    }
}

fn projection_notes(hints: &ExecutionHints) -> Vec<String> {
    let mut notes = Vec::new();
    if !hints.produces_result {
        notes.push("without document output".to_owned());
    } else if !hints.projections.is_empty() {
        let paths: Vec<String> = hints.projections.iter().map(|p| format!("`{p}`")).collect();
        notes.push(format!("projections: {}", paths.join(", ")));
        if hints.index_covers_projections {
            notes.push("index only".to_owned());
        }
    }
    notes
}

/// Renders an index range as comparisons on `doc.field`.
fn describe_range(doc: &str, range: &IndexRange) -> String {
    let subject = format!("{doc}.{}", range.field);
    if range.is_equality() {
        if let Some(lower) = &range.lower {
            return format!("{subject} == {}", lower.value);
        }
    }
    let mut parts = Vec::new();
    if let Some(lower) = &range.lower {
        let op = if lower.inclusive { ">=" } else { ">" };
        parts.push(format!("{subject} {op} {}", lower.value));
    }
    if let Some(upper) = &range.upper {
        let op = if upper.inclusive { "<=" } else { "<" };
        parts.push(format!("{subject} {op} {}", upper.value));
    }
    if parts.is_empty() {
        return format!("{subject} (any)");
    }
    parts.join(" && ")
}

fn props(kind: &NodeKind, hints: &ExecutionHints) -> Vec<ExplainProp> {
    let mut props = Vec::new();
    match kind {
        NodeKind::EnumerateCollection { .. } | NodeKind::IndexScan { .. } => {
            if let NodeKind::IndexScan { index, order, .. } = kind {
                props.push(ExplainProp::new("index", index.display_name()));
                if let Some(selectivity) = index.selectivity_estimate {
                    props.push(ExplainProp::new("selectivity", format_number(selectivity)));
                }
                if *order != ScanOrder::Unspecified {
                    props.push(ExplainProp::new("order", format!("{order:?}").to_lowercase()));
                }
            }
            props.push(ExplainProp::new(
                "producesResult",
                hints.produces_result.to_string(),
            ));
            if !hints.projections.is_empty() {
                let paths: Vec<String> = hints.projections.iter().map(|p| p.to_string()).collect();
                props.push(ExplainProp::new("projections", paths.join(",")));
            }
            props.push(ExplainProp::new(
                "indexCoversProjections",
                hints.index_covers_projections.to_string(),
            ));
            if hints.sort_strategy != SortStrategy::Standard {
                props.push(ExplainProp::new("sortStrategy", hints.sort_strategy.as_str()));
            }
        }
        NodeKind::Sort { stable, .. } => {
            props.push(ExplainProp::new("sortStrategy", hints.sort_strategy.as_str()));
            props.push(ExplainProp::new(
                "numberOfTopGroupedElements",
                hints.number_of_top_grouped_elements.to_string(),
            ));
            if *stable {
                props.push(ExplainProp::new("stable", "true"));
            }
        }
        _ => {}
    }
    props
}
