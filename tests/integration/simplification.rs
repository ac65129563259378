#![allow(missing_docs)]

mod support;

use docql_optimizer::catalog::{IndexDescriptor, IndexKind};
use docql_optimizer::plan::{BinaryOp, Function, NodeKind};
use docql_optimizer::{Expr, InMemoryCatalog, Plan, PlanBuilder, Value, VarId};

use support::{catalog, doc, execute, nodes_of, optimize_with, sorted, Dataset};

fn numbers() -> Dataset {
    Dataset::new().with(
        "nums",
        (0..12)
            .map(|i| doc(&[("x", Value::from(i)), ("y", Value::from(i % 3))]))
            .collect(),
    )
}

fn filter_conditions(plan: &Plan) -> Vec<Expr> {
    plan.nodes()
        .filter_map(|n| match &n.kind {
            NodeKind::Filter { condition } => Some(condition.clone()),
            _ => None,
        })
        .collect()
}

fn scan_filter(condition: impl FnOnce(VarId) -> Expr) -> (Plan, VarId) {
    let mut b = PlanBuilder::new();
    let n = b.enumerate_collection("nums", "n");
    b.filter(condition(n));
    let x = b.calculate("x", Expr::path(n, "x"));
    b.return_var(x);
    (b.build().expect("valid plan"), n)
}

#[test]
fn single_use_calculation_is_inlined_into_its_filter() {
    let mut b = PlanBuilder::new();
    let n = b.enumerate_collection("nums", "n");
    let doubled = b.calculate(
        "doubled",
        Expr::binary(BinaryOp::Mul, Expr::path(n, "x"), Expr::lit(2)),
    );
    b.filter(Expr::var(doubled).greater_than(Expr::lit(15)));
    b.return_var(n);
    let plan = b.build().expect("valid plan");

    let data = numbers();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(
        plan,
        &["-all", "+remove-redundant-calculations"],
        &InMemoryCatalog::new(),
    );

    assert_eq!(optimized.applied_rules, vec!["remove-redundant-calculations"]);
    assert!(nodes_of(&optimized.plan, "CalculationNode").is_empty());
    assert_eq!(
        filter_conditions(&optimized.plan),
        vec![Expr::binary(BinaryOp::Mul, Expr::path(n, "x"), Expr::lit(2))
            .greater_than(Expr::lit(15))]
    );
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 4);
}

#[test]
fn shared_impure_or_loop_crossing_calculations_stay() {
    let rules = ["-all", "+remove-redundant-calculations"];
    let empty = InMemoryCatalog::new();

    let mut b = PlanBuilder::new();
    let n = b.enumerate_collection("nums", "n");
    let x = b.calculate("x", Expr::path(n, "x"));
    b.filter(Expr::var(x).greater_than(Expr::lit(2)));
    b.filter(Expr::var(x).less_than(Expr::lit(9)));
    b.return_var(n);
    let shared = optimize_with(b.build().expect("valid plan"), &rules, &empty);
    assert!(shared.applied_rules.is_empty());

    let mut b = PlanBuilder::new();
    let n = b.enumerate_collection("nums", "n");
    let r = b.calculate("r", Expr::call(Function::Rand, Vec::new()));
    b.filter(Expr::var(r).less_than(Expr::path(n, "x")));
    b.return_var(n);
    let impure = optimize_with(b.build().expect("valid plan"), &rules, &empty);
    assert!(impure.applied_rules.is_empty());

    let mut b = PlanBuilder::new();
    let limit = b.calculate("limit", Expr::binary(BinaryOp::Add, Expr::lit(1), Expr::lit(2)));
    let n = b.enumerate_collection("nums", "n");
    b.filter(Expr::path(n, "x").less_than(Expr::var(limit)));
    b.return_var(n);
    let outer = optimize_with(b.build().expect("valid plan"), &rules, &empty);
    assert!(outer.applied_rules.is_empty());
    assert_eq!(nodes_of(&outer.plan, "CalculationNode").len(), 1);
}

#[test]
fn calculations_used_inside_a_subquery_stay_outside() {
    let mut b = PlanBuilder::new();
    let n = b.enumerate_collection("nums", "n");
    let x = b.calculate("x", Expr::path(n, "x"));
    b.begin_subquery();
    let m = b.enumerate_collection("nums", "m");
    b.filter(Expr::path(m, "x").equals(Expr::var(x)));
    b.return_var(m);
    let same = b.end_subquery("same");
    b.return_var(same);
    let plan = b.build().expect("valid plan");

    let data = numbers();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(
        plan,
        &["-all", "+remove-redundant-calculations"],
        &InMemoryCatalog::new(),
    );
    assert!(optimized.applied_rules.is_empty());
    assert_eq!(execute(&optimized.plan, &data), expected);
}

#[test]
fn same_direction_or_keeps_the_loosest_bound() {
    let data = numbers();
    let rules = ["-all", "+remove-redundant-or"];
    let empty = InMemoryCatalog::new();
    let cases = [
        ((BinaryOp::Gt, 5), (BinaryOp::Gt, 8), (BinaryOp::Gt, 5)),
        ((BinaryOp::Ge, 5), (BinaryOp::Gt, 5), (BinaryOp::Ge, 5)),
        ((BinaryOp::Lt, 3), (BinaryOp::Le, 7), (BinaryOp::Le, 7)),
        ((BinaryOp::Le, 4), (BinaryOp::Lt, 4), (BinaryOp::Le, 4)),
    ];
    for ((op_a, a), (op_b, b), (kept_op, kept)) in cases {
        let (plan, n) = scan_filter(|n| {
            Expr::binary(op_a, Expr::path(n, "x"), Expr::lit(a))
                .or(Expr::binary(op_b, Expr::path(n, "x"), Expr::lit(b)))
        });
        let expected = execute(&plan, &data);
        let optimized = optimize_with(plan, &rules, &empty);
        assert_eq!(optimized.applied_rules, vec!["remove-redundant-or"]);
        assert_eq!(
            filter_conditions(&optimized.plan),
            vec![Expr::binary(kept_op, Expr::path(n, "x"), Expr::lit(kept))]
        );
        assert_eq!(execute(&optimized.plan, &data), expected);
    }
}

#[test]
fn or_rewrite_picks_inclusive_operator_on_ties() {
    let (plan, n) = scan_filter(|n| {
        Expr::path(n, "x")
            .greater_than(Expr::lit(6))
            .or(Expr::path(n, "x").greater_equal(Expr::lit(6)))
            .or(Expr::path(n, "x").greater_than(Expr::lit(9)))
    });
    let data = numbers();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &["-all", "+remove-redundant-or"], &InMemoryCatalog::new());
    assert_eq!(
        filter_conditions(&optimized.plan),
        vec![Expr::path(n, "x").greater_equal(Expr::lit(6))]
    );
    assert_eq!(execute(&optimized.plan, &data), expected);
}

#[test]
fn mixed_or_is_left_alone() {
    let data = numbers();
    let rules = ["-all", "+remove-redundant-or"];
    let empty = InMemoryCatalog::new();

    let (plan, _) = scan_filter(|n| {
        Expr::path(n, "x")
            .greater_than(Expr::lit(9))
            .or(Expr::path(n, "x").less_than(Expr::lit(2)))
    });
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &rules, &empty);
    assert!(optimized.applied_rules.is_empty());
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 4);

    let (plan, _) = scan_filter(|n| {
        Expr::path(n, "x")
            .greater_than(Expr::lit(9))
            .or(Expr::path(n, "y").greater_than(Expr::lit(1)))
    });
    assert!(optimize_with(plan, &rules, &empty).applied_rules.is_empty());

    let (plan, _) = scan_filter(|n| {
        Expr::path(n, "x")
            .equals(Expr::lit(9))
            .or(Expr::path(n, "x").equals(Expr::lit(1)))
    });
    assert!(optimize_with(plan, &rules, &empty).applied_rules.is_empty());
}

#[test]
fn equality_chain_becomes_in_list() {
    let (plan, n) = scan_filter(|n| {
        Expr::path(n, "x")
            .equals(Expr::lit(3))
            .or(Expr::lit(7).equals(Expr::path(n, "x")))
            .or(Expr::path(n, "x").in_list(Expr::lit(Value::from(vec![3, 11]))))
    });
    let data = numbers();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &["-all", "+replace-or-with-in"], &InMemoryCatalog::new());
    assert_eq!(optimized.applied_rules, vec!["replace-or-with-in"]);
    assert_eq!(
        filter_conditions(&optimized.plan),
        vec![Expr::path(n, "x").in_list(Expr::lit(Value::from(vec![3, 7, 11])))]
    );
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 3);

    let (plan, _) = scan_filter(|n| {
        Expr::path(n, "x")
            .equals(Expr::lit(3))
            .or(Expr::path(n, "y").equals(Expr::lit(1)))
    });
    let optimized = optimize_with(plan, &["-all", "+replace-or-with-in"], &InMemoryCatalog::new());
    assert!(optimized.applied_rules.is_empty());
}

#[test]
fn filters_enforced_by_the_index_scan_are_dropped() {
    let by_x = IndexDescriptor::new(5, IndexKind::Persistent, &["x"]);
    let cat = catalog("nums", 12, vec![by_x]);
    let rules = ["-all", "+use-indexes", "+remove-filters-covered-by-index"];
    let data = numbers();

    let (plan, _) = scan_filter(|n| {
        Expr::path(n, "x")
            .greater_than(Expr::lit(4))
            .and(Expr::path(n, "x").less_equal(Expr::lit(8)))
    });
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &rules, &cat);
    assert_eq!(
        optimized.applied_rules,
        vec!["use-indexes", "remove-filters-covered-by-index"]
    );
    assert_eq!(nodes_of(&optimized.plan, "IndexNode").len(), 1);
    assert!(nodes_of(&optimized.plan, "FilterNode").is_empty());
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 4);

    let (plan, n) = scan_filter(|n| {
        Expr::path(n, "x")
            .greater_equal(Expr::lit(6))
            .and(Expr::path(n, "y").equals(Expr::lit(0)))
    });
    let expected = execute(&plan, &data);
    let optimized = optimize_with(plan, &rules, &cat);
    assert_eq!(
        filter_conditions(&optimized.plan),
        vec![Expr::path(n, "y").equals(Expr::lit(0))]
    );
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 2);
}

#[test]
fn constant_false_filter_empties_the_query() {
    let (plan, _) = scan_filter(|_| Expr::lit(3).less_than(Expr::lit(1)));
    let data = numbers();
    let optimized = optimize_with(plan, &[], &InMemoryCatalog::new());
    assert!(optimized.applied_rules.contains(&"fold-constant-expressions"));
    assert!(optimized.applied_rules.contains(&"remove-unnecessary-filters"));
    assert_eq!(nodes_of(&optimized.plan, "NoResultsNode").len(), 1);
    assert!(execute(&optimized.plan, &data).is_empty());
}

#[test]
fn negative_zero_folds_equal_to_zero() {
    let (plan, _) = scan_filter(|_| {
        Expr::binary(BinaryOp::Mul, Expr::lit(0), Expr::lit(-1)).equals(Expr::lit(0))
    });
    let data = numbers();
    let expected = execute(&plan, &data);
    let optimized = optimize_with(
        plan,
        &["-all", "+fold-constant-expressions", "+remove-unnecessary-filters"],
        &InMemoryCatalog::new(),
    );
    assert_eq!(
        optimized.applied_rules,
        vec!["fold-constant-expressions", "remove-unnecessary-filters"]
    );
    assert!(nodes_of(&optimized.plan, "NoResultsNode").is_empty());
    assert!(nodes_of(&optimized.plan, "FilterNode").is_empty());
    assert_eq!(execute(&optimized.plan, &data), expected);
    assert_eq!(expected.len(), 12);
}

#[test]
fn unused_calculations_are_removed_unless_they_may_throw() {
    let mut b = PlanBuilder::new();
    let n = b.enumerate_collection("nums", "n");
    b.calculate("unused", Expr::path(n, "y"));
    b.calculate("boom", Expr::call(Function::Fail, vec![Expr::lit("stop")]));
    let x = b.calculate("x", Expr::path(n, "x"));
    b.return_var(x);
    let plan = b.build().expect("valid plan");

    let optimized = optimize_with(
        plan,
        &["-all", "+remove-unnecessary-calculations"],
        &InMemoryCatalog::new(),
    );
    assert_eq!(optimized.applied_rules, vec!["remove-unnecessary-calculations"]);
    let remaining: Vec<String> = nodes_of(&optimized.plan, "CalculationNode")
        .into_iter()
        .filter_map(|node| match &node.kind {
            NodeKind::Calculation { out_var, .. } => Some(optimized.plan.variables().name(*out_var)),
            _ => None,
        })
        .collect();
    assert_eq!(sorted_names(remaining), vec!["boom".to_owned(), "x".to_owned()]);
}

fn sorted_names(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn full_pipeline_matches_unoptimized_results() {
    let mut b = PlanBuilder::new();
    let n = b.enumerate_collection("nums", "n");
    let lower = b.calculate("lower", Expr::binary(BinaryOp::Add, Expr::lit(1), Expr::lit(1)));
    let x = b.calculate("x", Expr::path(n, "x"));
    b.filter(
        Expr::var(x)
            .greater_equal(Expr::var(lower))
            .or(Expr::var(x).greater_than(Expr::lit(4))),
    );
    b.filter(Expr::lit(true));
    let y = b.calculate("y", Expr::path(n, "y"));
    b.sort([(y, true), (y, true)]);
    b.return_var(n);
    let plan = b.build().expect("valid plan");

    let data = numbers();
    let expected = sorted(execute(&plan, &data));
    let optimized = optimize_with(plan, &[], &InMemoryCatalog::new());
    assert_eq!(sorted(execute(&optimized.plan, &data)), expected);
    assert_eq!(expected.len(), 10);
}
