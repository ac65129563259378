#![allow(missing_docs)]

mod support;

use docql_optimizer::catalog::{IndexDescriptor, IndexKind};
use docql_optimizer::plan::{AttributePath, ExecutionHints, Function, NodeKind};
use docql_optimizer::{Expr, InMemoryCatalog, Plan, PlanBuilder, Value};

use support::{catalog, doc, execute, optimize_with, Dataset};

const PROJECTIONS_ONLY: [&str; 2] = ["-all", "+reduce-extraction-to-projection"];
const LOOKUP_AND_PROJECTIONS: [&str; 3] =
    ["-all", "+use-indexes", "+reduce-extraction-to-projection"];

fn orders() -> Dataset {
    let docs = (0..40)
        .map(|i| {
            doc(&[
                ("_key", Value::from(format!("o{i}"))),
                ("status", Value::from(if i % 4 == 0 { "open" } else { "closed" })),
                ("total", Value::from(i * 10)),
                (
                    "customer",
                    doc(&[
                        ("name", Value::from(format!("c{}", i % 7))),
                        ("tier", Value::from(i % 3)),
                    ]),
                ),
                ("tags", Value::Array(vec![Value::from("x"), Value::from(i)])),
            ])
        })
        .collect();
    Dataset::new().with("orders", docs)
}

fn scan_hints(plan: &Plan) -> ExecutionHints {
    plan.nodes()
        .find(|n| n.kind.is_collection_scan())
        .map(|n| n.hints.clone())
        .expect("scan node")
}

fn paths(names: &[&str]) -> Vec<AttributePath> {
    names.iter().map(|n| AttributePath::parse(n)).collect()
}

#[test]
fn nested_attribute_reads_become_projections() {
    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    b.filter(Expr::path(o, "customer.tier").equals(Expr::lit(1)));
    let out = b.calculate(
        "out",
        Expr::Array(vec![Expr::path(o, "total"), Expr::path(o, "tags").at(Expr::lit(1))]),
    );
    b.return_var(out);
    let plan = b.build().expect("valid plan");

    let data = orders();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &PROJECTIONS_ONLY, &InMemoryCatalog::new());

    assert_eq!(optimized.applied_rules, vec!["reduce-extraction-to-projection"]);
    let hints = scan_hints(&optimized.plan);
    assert!(hints.produces_result);
    assert_eq!(hints.projections, paths(&["customer.tier", "tags", "total"]));
    assert!(!hints.index_covers_projections);
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 13);
}

#[test]
fn parent_path_absorbs_its_children() {
    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    b.filter(Expr::path(o, "customer.tier").greater_than(Expr::lit(0)));
    let name = b.calculate(
        "name",
        Expr::call(Function::Upper, vec![Expr::path(o, "customer.name")]),
    );
    let customer = b.calculate("customer", Expr::path(o, "customer"));
    let out = b.calculate("out", Expr::Array(vec![Expr::var(name), Expr::var(customer)]));
    b.return_var(out);
    let plan = b.build().expect("valid plan");

    let data = orders();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &PROJECTIONS_ONLY, &InMemoryCatalog::new());
    assert_eq!(scan_hints(&optimized.plan).projections, paths(&["customer"]));
    assert_eq!(execute(&optimized.plan, &data), expected);
}

#[test]
fn whole_document_uses_disable_projections() {
    let data = orders();

    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    b.filter(Expr::path(o, "total").less_than(Expr::lit(50)));
    b.return_var(o);
    let plan = b.build().expect("valid plan");
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &PROJECTIONS_ONLY, &InMemoryCatalog::new());
    assert!(optimized.applied_rules.is_empty());
    assert!(scan_hints(&optimized.plan).projections.is_empty());
    assert_eq!(execute(&optimized.plan, &data), expected);

    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    let field = b.calculate("field", Expr::lit("status"));
    let dynamic = b.calculate("dynamic", Expr::var(o).at(Expr::var(field)));
    b.return_var(dynamic);
    let plan = b.build().expect("valid plan");
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &PROJECTIONS_ONLY, &InMemoryCatalog::new());
    assert!(scan_hints(&optimized.plan).projections.is_empty());
    assert_eq!(execute(&optimized.plan, &data), expected);

    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    b.begin_subquery();
    let copy = b.calculate("copy", Expr::var(o));
    b.return_var(copy);
    let inner = b.end_subquery("inner");
    b.return_var(inner);
    let plan = b.build().expect("valid plan");
    let optimized = optimize_with(plan, &PROJECTIONS_ONLY, &InMemoryCatalog::new());
    assert!(scan_hints(&optimized.plan).projections.is_empty());
    assert!(scan_hints(&optimized.plan).produces_result);
}

#[test]
fn unread_documents_are_not_produced() {
    let mut b = PlanBuilder::new();
    b.enumerate_collection("orders", "o");
    let one = b.calculate("one", Expr::lit(1));
    b.return_var(one);
    let plan = b.build().expect("valid plan");

    let data = orders();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &PROJECTIONS_ONLY, &InMemoryCatalog::new());
    let hints = scan_hints(&optimized.plan);
    assert!(!hints.produces_result);
    assert!(hints.projections.is_empty());
    assert!(!hints.index_covers_projections);
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 40);
}

#[test]
fn index_lookup_covering_all_reads_is_marked() {
    let by_status = IndexDescriptor::new(4, IndexKind::Persistent, &["status", "total"]);
    let cat = catalog("orders", 40, vec![by_status]);
    let data = orders();

    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    b.filter(Expr::path(o, "status").equals(Expr::lit("open")));
    let total = b.calculate("total", Expr::path(o, "total"));
    b.return_var(total);
    let plan = b.build().expect("valid plan");
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &LOOKUP_AND_PROJECTIONS, &cat);

    assert_eq!(
        optimized.applied_rules,
        vec!["use-indexes", "reduce-extraction-to-projection"]
    );
    assert!(optimized
        .plan
        .nodes()
        .any(|n| matches!(n.kind, NodeKind::IndexScan { .. })));
    let hints = scan_hints(&optimized.plan);
    assert_eq!(hints.projections, paths(&["status", "total"]));
    assert!(hints.index_covers_projections);
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 10);

    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    b.filter(Expr::path(o, "status").equals(Expr::lit("open")));
    let tier = b.calculate("tier", Expr::path(o, "customer.tier"));
    b.return_var(tier);
    let plan = b.build().expect("valid plan");
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &LOOKUP_AND_PROJECTIONS, &cat);
    let hints = scan_hints(&optimized.plan);
    assert_eq!(hints.projections, paths(&["customer.tier", "status"]));
    assert!(!hints.index_covers_projections);
    assert_eq!(execute(&optimized.plan, &data), expected);
}

#[test]
fn primary_index_covers_key_reads() {
    let cat = catalog("orders", 40, vec![IndexDescriptor::primary(0)]);
    let mut b = PlanBuilder::new();
    let o = b.enumerate_collection("orders", "o");
    b.filter(Expr::path(o, "_key").equals(Expr::lit("o12")));
    let key = b.calculate("key", Expr::path(o, "_key"));
    b.return_var(key);
    let plan = b.build().expect("valid plan");

    let data = orders();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &[], &cat);
    let hints = scan_hints(&optimized.plan);
    assert_eq!(hints.projections, paths(&["_key"]));
    assert!(hints.index_covers_projections);
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected, vec![Value::from("o12")]);
}
