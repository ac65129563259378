#![allow(missing_docs)]

mod support;

use docql_optimizer::catalog::{IndexDescriptor, IndexKind};
use docql_optimizer::explain::ExplainProp;
use docql_optimizer::{Expr, InMemoryCatalog, Plan, PlanBuilder};

use support::{catalog, optimize_with};

fn events_plan(keys: &[(&str, bool)]) -> Plan {
    let mut b = PlanBuilder::new();
    let e = b.enumerate_collection("events", "e");
    b.filter(Expr::path(e, "kind").equals(Expr::lit("click")));
    let sort: Vec<_> = keys
        .iter()
        .map(|(path, asc)| (b.calculate(path, Expr::path(e, path)), *asc))
        .collect();
    b.sort(sort);
    b.limit(0, 20);
    let when = b.calculate("when", Expr::path(e, "at"));
    b.return_var(when);
    b.build().expect("valid plan")
}

fn prop<'a>(props: &'a [ExplainProp], key: &str) -> Option<&'a str> {
    props.iter().find(|p| p.key == key).map(|p| p.value.as_str())
}

#[test]
fn grouped_sort_is_explained_in_text_and_props() {
    let by_user = IndexDescriptor::new(2, IndexKind::Persistent, &["user"]).named("by_user");
    let optimized = optimize_with(
        events_plan(&[("user", true), ("at", true)]),
        &["-all", "+use-index-for-sort"],
        &catalog("events", 500, vec![by_user]),
    );
    let explanation = optimized.explain();
    let text = explanation.to_text();

    assert!(text.contains("persistent index scan using by_user"));
    assert!(text.contains("SORT user ASC, at ASC   /* sorting strategy: grouped(1) */"));
    assert!(text.contains("Optimization rules applied:\n"));
    assert!(text.contains("1   use-index-for-sort"));

    let sort = explanation
        .nodes
        .iter()
        .find(|n| n.node_type == "SortNode")
        .expect("sort node");
    assert_eq!(prop(&sort.props, "sortStrategy"), Some("grouped"));
    assert_eq!(prop(&sort.props, "numberOfTopGroupedElements"), Some("1"));

    let scan = explanation
        .nodes
        .iter()
        .find(|n| n.node_type == "IndexNode")
        .expect("index node");
    assert_eq!(prop(&scan.props, "index"), Some("by_user"));
    assert_eq!(prop(&scan.props, "order"), Some("forward"));
}

#[test]
fn index_order_scan_is_explained() {
    let by_user = IndexDescriptor::new(2, IndexKind::Skiplist, &["user"]);
    let optimized = optimize_with(
        events_plan(&[("user", false)]),
        &["-all", "+use-index-for-sort", "+reduce-extraction-to-projection"],
        &catalog("events", 500, vec![by_user]),
    );
    let explanation = optimized.explain();
    let text = explanation.to_text();

    assert!(!text.contains("SortNode"));
    assert!(text.contains(
        "skiplist index scan using idx_2, reverse, sorted by index, projections: `at`, `kind`, `user`"
    ));
    let scan = explanation
        .nodes
        .iter()
        .find(|n| n.node_type == "IndexNode")
        .expect("index node");
    assert_eq!(prop(&scan.props, "sortStrategy"), Some("index-order"));
    assert_eq!(prop(&scan.props, "projections"), Some("at,kind,user"));
    assert_eq!(prop(&scan.props, "indexCoversProjections"), Some("false"));
    assert_eq!(prop(&scan.props, "producesResult"), Some("true"));
}

#[test]
fn estimates_follow_the_catalog() {
    let optimized = optimize_with(
        events_plan(&[("user", true)]),
        &["-all"],
        &catalog("events", 500, Vec::new()),
    );
    let explanation = optimized.explain();
    let estimates: Vec<(&str, u64)> = explanation
        .nodes
        .iter()
        .map(|n| (n.node_type, n.estimated_items))
        .collect();
    assert_eq!(
        estimates,
        vec![
            ("SingletonNode", 1),
            ("EnumerateCollectionNode", 500),
            ("FilterNode", 250),
            ("CalculationNode", 250),
            ("SortNode", 250),
            ("LimitNode", 20),
            ("CalculationNode", 20),
            ("ReturnNode", 20),
        ]
    );
    assert!(explanation.to_text().contains("\nOptimization rules applied:\n none\n"));
}

#[test]
fn json_output_carries_nodes_rules_and_hash() {
    let by_user = IndexDescriptor::new(2, IndexKind::Persistent, &["user", "at"]).sparse();
    let optimized = optimize_with(
        events_plan(&[("user", true), ("at", true)]),
        &[],
        &catalog("events", 500, vec![by_user]),
    );
    let explanation = optimized.explain();
    let json: serde_json::Value =
        serde_json::from_str(&explanation.to_json().expect("serializes")).expect("valid json");

    assert_eq!(json["planHash"].as_u64(), Some(optimized.plan.fingerprint()));
    let rules: Vec<&str> = json["rules"]
        .as_array()
        .expect("rules")
        .iter()
        .filter_map(|r| r.as_str())
        .collect();
    assert_eq!(rules, optimized.applied_rules);
    let warnings = json["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap_or_default().contains("idx_2"));

    let nodes = json["nodes"].as_array().expect("nodes");
    assert_eq!(nodes.len(), explanation.nodes.len());
    assert_eq!(nodes[0]["type"], "SingletonNode");
    assert_eq!(nodes[0]["estimatedItems"], 1);
    assert!(nodes.iter().all(|n| n["depth"] == 0));
    assert!(nodes.iter().any(|n| n["type"] == "SortNode"));
}

#[test]
fn subquery_bodies_are_listed_before_their_node() {
    let mut b = PlanBuilder::new();
    let u = b.enumerate_collection("users", "u");
    b.begin_subquery();
    let e = b.enumerate_collection("events", "e");
    b.filter(Expr::path(e, "user").equals(Expr::path(u, "_key")));
    b.return_var(e);
    let events = b.end_subquery("events");
    b.return_var(events);
    let plan = b.build().expect("valid plan");

    let optimized = optimize_with(plan, &["-all"], &InMemoryCatalog::new());
    let explanation = optimized.explain();
    let layout: Vec<(&str, usize)> = explanation
        .nodes
        .iter()
        .map(|n| (n.node_type, n.depth))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("SingletonNode", 0),
            ("EnumerateCollectionNode", 0),
            ("SingletonNode", 1),
            ("EnumerateCollectionNode", 1),
            ("FilterNode", 1),
            ("ReturnNode", 1),
            ("SubqueryNode", 0),
            ("ReturnNode", 0),
        ]
    );
    let text = explanation.to_text();
    assert!(text.contains("LET events = ( ... )   /* subquery */"));
    assert!(text.contains("  - FILTER e.user == u._key"));
}
