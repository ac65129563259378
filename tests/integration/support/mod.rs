//! Reference interpreter used to compare optimized and unoptimized plans.
//!
//! Executes a plan over in-memory collections, honouring index ranges,
//! sparse-index omission, scan order, grouped sorts and scan projections, so
//! a wrong rewrite shows up as different rows.
#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use docql_optimizer::catalog::{CollectionInfo, InMemoryCatalog, IndexDescriptor};
use docql_optimizer::optimizer::{OptimizedPlan, Optimizer, OptimizerConfig};
use docql_optimizer::plan::{
    AttributePath, ExecutionHints, IndexRange, NodeId, NodeKind, Plan, PlanNode, ScanOrder,
    SortElement, SortStrategy, Value, VarId,
};
use docql_optimizer::sort::grouped_sort;

pub type Row = HashMap<VarId, Value>;

/// Collections of documents keyed by name.
#[derive(Default)]
pub struct Dataset {
    collections: HashMap<String, Vec<Value>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, docs: Vec<Value>) -> Self {
        self.collections.insert(name.to_owned(), docs);
        self
    }

    fn docs(&self, name: &str) -> &[Value] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Object value from attribute pairs.
pub fn doc(pairs: &[(&str, Value)]) -> Value {
    Value::object(pairs.iter().map(|(k, v)| (*k, v.clone())))
}

/// Catalog holding one collection with the given indexes.
pub fn catalog(collection: &str, count: u64, indexes: Vec<IndexDescriptor>) -> InMemoryCatalog {
    let mut info = CollectionInfo::new(collection, count);
    info.indexes = indexes;
    InMemoryCatalog::new().with_collection(info)
}

/// Optimizes with the given directives.
pub fn optimize_with(plan: Plan, rules: &[&str], catalog: &InMemoryCatalog) -> OptimizedPlan {
    let config = OptimizerConfig::default().with_rules(rules.iter().copied());
    Optimizer::new(config)
        .expect("valid config")
        .run(plan, catalog)
        .expect("optimizes")
}

/// Nodes of a given type name.
pub fn nodes_of<'a>(plan: &'a Plan, type_name: &str) -> Vec<&'a PlanNode> {
    plan.nodes().filter(|n| n.kind.type_name() == type_name).collect()
}

/// Runs the plan and returns the values of its main `RETURN`.
pub fn execute(plan: &Plan, data: &Dataset) -> Vec<Value> {
    run_scope(plan, plan.sink(), &Row::new(), data)
}

fn lookup(value: &Value, path: &AttributePath) -> Value {
    path.parts()
        .iter()
        .fold(value.clone(), |current, part| current.attribute(part))
}

fn compare_fields(a: &Value, b: &Value, fields: &[AttributePath]) -> Ordering {
    fields
        .iter()
        .map(|f| lookup(a, f).compare(&lookup(b, f)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn set_path(target: &mut BTreeMap<String, Value>, parts: &[String], value: Value) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    if rest.is_empty() {
        target.insert(first.clone(), value);
        return;
    }
    let entry = target
        .entry(first.clone())
        .or_insert_with(|| Value::Object(BTreeMap::new()));
    if let Value::Object(inner) = entry {
        set_path(inner, rest, value);
    }
}

/// What the executor would bind for a scanned document given the hints.
fn materialize(document: &Value, hints: &ExecutionHints) -> Value {
    if !hints.produces_result {
        return Value::Null;
    }
    if hints.projections.is_empty() {
        return document.clone();
    }
    let mut out = BTreeMap::new();
    for path in &hints.projections {
        set_path(&mut out, path.parts(), lookup(document, path));
    }
    Value::Object(out)
}

fn scan_index(
    data: &Dataset,
    collection: &str,
    index: &IndexDescriptor,
    ranges: &[IndexRange],
    order: ScanOrder,
) -> Vec<Value> {
    let mut docs: Vec<Value> = data
        .docs(collection)
        .iter()
        .filter(|d| !index.sparse || index.fields.iter().all(|f| !lookup(d, f).is_null()))
        .filter(|d| ranges.iter().all(|r| r.contains(&lookup(d, &r.field))))
        .cloned()
        .collect();
    match order {
        ScanOrder::Unspecified => {}
        ScanOrder::Forward => docs.sort_by(|a, b| compare_fields(a, b, &index.fields)),
        ScanOrder::Reverse => docs.sort_by(|a, b| compare_fields(b, a, &index.fields)),
    }
    docs
}

fn compare_rows(a: &Row, b: &Row, elements: &[SortElement]) -> Ordering {
    for e in elements {
        let left = a.get(&e.var).cloned().unwrap_or(Value::Null);
        let right = b.get(&e.var).cloned().unwrap_or(Value::Null);
        let ord = left.compare(&right);
        let ord = if e.ascending { ord } else { ord.reverse() };
        if ord.is_ne() {
            return ord;
        }
    }
    Ordering::Equal
}

fn run_scope(plan: &Plan, tip: NodeId, input: &Row, data: &Dataset) -> Vec<Value> {
    let mut rows: Vec<Row> = Vec::new();
    let mut results = Vec::new();
    for id in plan.scope_nodes(tip) {
        let node = plan.get(id).expect("live node");
        rows = match &node.kind {
            NodeKind::Singleton => vec![input.clone()],
            NodeKind::EnumerateCollection {
                collection,
                out_var,
            } => rows
                .iter()
                .flat_map(|row| {
                    data.docs(collection).iter().map(move |d| {
                        let mut next = row.clone();
                        next.insert(*out_var, materialize(d, &node.hints));
                        next
                    })
                })
                .collect(),
            NodeKind::IndexScan {
                collection,
                out_var,
                index,
                ranges,
                order,
            } => {
                let docs = scan_index(data, collection, index, ranges, *order);
                rows.iter()
                    .flat_map(|row| {
                        docs.iter().map(move |d| {
                            let mut next = row.clone();
                            next.insert(*out_var, materialize(d, &node.hints));
                            next
                        })
                    })
                    .collect()
            }
            NodeKind::EnumerateList { in_var, out_var } => rows
                .iter()
                .flat_map(|row| {
                    let items = match row.get(in_var) {
                        Some(Value::Array(items)) => items.clone(),
                        _ => Vec::new(),
                    };
                    items.into_iter().map(move |item| {
                        let mut next = row.clone();
                        next.insert(*out_var, item);
                        next
                    })
                })
                .collect(),
            NodeKind::Calculation { out_var, expr } => rows
                .into_iter()
                .map(|mut row| {
                    let value = expr.evaluate(&row).expect("evaluates");
                    row.insert(*out_var, value);
                    row
                })
                .collect(),
            NodeKind::Filter { condition } => rows
                .into_iter()
                .filter(|row| condition.evaluate(row).expect("evaluates").is_truthy())
                .collect(),
            NodeKind::Sort { elements, .. } => match node.hints.sort_strategy {
                SortStrategy::Grouped => {
                    let k = node.hints.number_of_top_grouped_elements;
                    let (prefix, rest) = elements.split_at(k.min(elements.len()));
                    grouped_sort(
                        rows,
                        |a, b| compare_rows(a, b, prefix).is_eq(),
                        |a, b| compare_rows(a, b, rest),
                    )
                    .collect()
                }
                _ => {
                    let mut sorted = rows;
                    sorted.sort_by(|a, b| compare_rows(a, b, elements));
                    sorted
                }
            },
            NodeKind::Limit { offset, count } => rows
                .into_iter()
                .skip(*offset as usize)
                .take(*count as usize)
                .collect(),
            NodeKind::Aggregate { groups, into } => {
                let mut buckets: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
                for row in rows {
                    let key: Vec<Value> = groups
                        .iter()
                        .map(|g| row.get(&g.in_var).cloned().unwrap_or(Value::Null))
                        .collect();
                    match buckets.iter_mut().find(|(k, _)| {
                        k.iter().zip(&key).all(|(a, b)| a.compare(b).is_eq())
                    }) {
                        Some((_, members)) => members.push(row),
                        None => buckets.push((key, vec![row])),
                    }
                }
                buckets.sort_by(|(a, _), (b, _)| {
                    a.iter()
                        .zip(b)
                        .map(|(x, y)| x.compare(y))
                        .find(|o| o.is_ne())
                        .unwrap_or(Ordering::Equal)
                });
                buckets
                    .into_iter()
                    .map(|(key, members)| {
                        let mut row = input.clone();
                        for (g, value) in groups.iter().zip(key) {
                            row.insert(g.out_var, value);
                        }
                        if let Some(into) = into {
                            let values = members
                                .iter()
                                .map(|m| {
                                    let mut vars: Vec<_> = m.iter().collect();
                                    vars.sort_by_key(|(v, _)| **v);
                                    Value::Array(vars.into_iter().map(|(_, v)| v.clone()).collect())
                                })
                                .collect();
                            row.insert(*into, Value::Array(values));
                        }
                        row
                    })
                    .collect()
            }
            NodeKind::Return { in_var } => {
                results = rows
                    .iter()
                    .map(|row| row.get(in_var).cloned().unwrap_or(Value::Null))
                    .collect();
                rows
            }
            NodeKind::Subquery { subquery, out_var } => rows
                .into_iter()
                .map(|mut row| {
                    let values = run_scope(plan, *subquery, &row, data);
                    row.insert(*out_var, Value::Array(values));
                    row
                })
                .collect(),
            NodeKind::NoResults => Vec::new(),
            NodeKind::Modification { in_var, out_var, .. } => rows
                .into_iter()
                .map(|mut row| {
                    if let Some(out) = out_var {
                        let value = row.get(in_var).cloned().unwrap_or(Value::Null);
                        row.insert(*out, value);
                    }
                    row
                })
                .collect(),
            NodeKind::Exchange { .. } => rows,
        };
    }
    results
}

/// Sorts values with the total value order, for multiset comparisons.
pub fn sorted(mut values: Vec<Value>) -> Vec<Value> {
    values.sort_by(|a, b| a.compare(b));
    values
}
