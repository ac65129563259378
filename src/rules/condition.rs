//! Helpers for reading filter conditions as constraints on attribute paths.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;

use crate::plan::{AttributePath, BinaryOp, Expr, IndexRange, LogicalOp, RangeBound, Value, VarId};

/// Calculation expressions keyed by the variable they define.
pub(crate) type Definitions<'a> = FxHashMap<VarId, &'a Expr>;

const MAX_RESOLVE_DEPTH: usize = 16;

/// Operands of a chain of `&&`, left to right.
pub(crate) fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    flatten(expr, LogicalOp::And, &mut out);
    out
}

/// Operands of a chain of `||`, left to right.
pub(crate) fn disjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    flatten(expr, LogicalOp::Or, &mut out);
    out
}

fn flatten<'a>(expr: &'a Expr, wanted: LogicalOp, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Logical { op, lhs, rhs } if *op == wanted => {
            flatten(lhs, wanted, out);
            flatten(rhs, wanted, out);
        }
        _ => out.push(expr),
    }
}

/// Conjuncts of a filter condition, looking through variables bound by
/// calculations (`LET c = a && b FILTER c`).
pub(crate) fn condition_terms<'a>(expr: &'a Expr, defs: &Definitions<'a>) -> Vec<&'a Expr> {
    let mut out = Vec::new();
    collect_terms(expr, defs, 0, &mut out);
    out
}

fn collect_terms<'a>(
    expr: &'a Expr,
    defs: &Definitions<'a>,
    depth: usize,
    out: &mut Vec<&'a Expr>,
) {
    for term in conjuncts(expr) {
        match term {
            Expr::Variable(var) if depth < MAX_RESOLVE_DEPTH => match defs.get(var) {
                Some(def) => collect_terms(*def, defs, depth + 1, out),
                None => out.push(term),
            },
            _ => out.push(term),
        }
    }
}

/// Resolves an expression to `variable.path`, following calculations that
/// merely alias an attribute (`LET k = doc.a.b`).
pub(crate) fn resolve_path(expr: &Expr, defs: &Definitions<'_>) -> Option<(VarId, AttributePath)> {
    resolve_path_at(expr, defs, 0)
}

fn resolve_path_at(
    expr: &Expr,
    defs: &Definitions<'_>,
    depth: usize,
) -> Option<(VarId, AttributePath)> {
    if depth > MAX_RESOLVE_DEPTH {
        return None;
    }
    match expr {
        Expr::Variable(var) => match defs.get(var) {
            Some(def) => resolve_path_at(def, defs, depth + 1),
            None => Some((*var, AttributePath::default())),
        },
        Expr::Attribute { base, name } => {
            let (var, path) = resolve_path_at(base, defs, depth)?;
            Some((var, path.child(name)))
        }
        _ => None,
    }
}

/// Literal value of an expression, following calculations that bind a
/// literal.
pub(crate) fn resolve_constant(expr: &Expr, defs: &Definitions<'_>) -> Option<Value> {
    resolve_constant_at(expr, defs, 0)
}

fn resolve_constant_at(expr: &Expr, defs: &Definitions<'_>, depth: usize) -> Option<Value> {
    match expr {
        Expr::Literal(value) => Some(value.clone()),
        Expr::Variable(var) if depth < MAX_RESOLVE_DEPTH => {
            resolve_constant_at(defs.get(var)?, defs, depth + 1)
        }
        _ => None,
    }
}

/// `var.path OP value` with the path on the left.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PathCondition {
    pub var: VarId,
    pub path: AttributePath,
    pub op: BinaryOp,
    pub value: Value,
}

impl PathCondition {
    /// Index range equivalent to this condition, for `==` and the relational
    /// operators.
    pub fn to_range(&self) -> Option<IndexRange> {
        let bound = |inclusive| {
            Some(RangeBound {
                value: self.value.clone(),
                inclusive,
            })
        };
        let field = self.path.clone();
        match self.op {
            BinaryOp::Eq => Some(IndexRange::equals(field, self.value.clone())),
            BinaryOp::Lt => Some(IndexRange { field, lower: None, upper: bound(false) }),
            BinaryOp::Le => Some(IndexRange { field, lower: None, upper: bound(true) }),
            BinaryOp::Gt => Some(IndexRange { field, lower: bound(false), upper: None }),
            BinaryOp::Ge => Some(IndexRange { field, lower: bound(true), upper: None }),
            _ => None,
        }
    }

    /// True when no row whose attribute is null or missing satisfies the
    /// condition.
    pub fn excludes_null(&self) -> bool {
        match self.op {
            BinaryOp::Ne => self.value.is_null(),
            BinaryOp::In => match &self.value {
                Value::Array(items) => !items.iter().any(Value::is_null),
                _ => true,
            },
            BinaryOp::NotIn => match &self.value {
                Value::Array(items) => items.iter().any(Value::is_null),
                _ => false,
            },
            _ => self.to_range().is_some_and(|r| r.excludes_null()),
        }
    }
}

/// Reads a comparison between a resolvable path and a constant. The operator
/// is mirrored when the constant is on the left.
pub(crate) fn path_condition(expr: &Expr, defs: &Definitions<'_>) -> Option<PathCondition> {
    let Expr::Binary { op, lhs, rhs } = expr else {
        return None;
    };
    if !matches!(
        op,
        BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::NotIn
    ) {
        return None;
    }
    if let (Some((var, path)), Some(value)) = (resolve_path(lhs, defs), resolve_constant(rhs, defs))
    {
        return Some(PathCondition {
            var,
            path,
            op: *op,
            value,
        });
    }
    let swapped = op.swapped()?;
    let (var, path) = resolve_path(rhs, defs)?;
    let value = resolve_constant(lhs, defs)?;
    Some(PathCondition {
        var,
        path,
        op: swapped,
        value,
    })
}

/// Every comparison on `var` found among the conjuncts of `conditions`.
pub(crate) fn conditions_on<'a, I>(
    var: VarId,
    conditions: I,
    defs: &Definitions<'a>,
) -> Vec<PathCondition>
where
    I: IntoIterator<Item = &'a Expr>,
{
    conditions
        .into_iter()
        .flat_map(|cond| condition_terms(cond, defs))
        .filter_map(|term| path_condition(term, defs))
        .filter(|cond| cond.var == var)
        .collect()
}

/// Narrows `range` by `other`, keeping the tighter end on each side. On equal
/// values the exclusive end is tighter.
pub(crate) fn intersect(mut range: IndexRange, other: &IndexRange) -> IndexRange {
    if let Some(lo) = &other.lower {
        let tighter = match &range.lower {
            None => true,
            Some(cur) => match lo.value.compare(&cur.value) {
                Ordering::Greater => true,
                Ordering::Equal => !lo.inclusive,
                Ordering::Less => false,
            },
        };
        if tighter {
            range.lower = Some(lo.clone());
        }
    }
    if let Some(hi) = &other.upper {
        let tighter = match &range.upper {
            None => true,
            Some(cur) => match hi.value.compare(&cur.value) {
                Ordering::Less => true,
                Ordering::Equal => !hi.inclusive,
                Ordering::Greater => false,
            },
        };
        if tighter {
            range.upper = Some(hi.clone());
        }
    }
    range
}

/// True when every value `inner` admits is also admitted by `outer`.
pub(crate) fn range_within(inner: &IndexRange, outer: &IndexRange) -> bool {
    let lower_ok = match (&outer.lower, &inner.lower) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(o), Some(i)) => match i.value.compare(&o.value) {
            Ordering::Greater => true,
            Ordering::Equal => o.inclusive || !i.inclusive,
            Ordering::Less => false,
        },
    };
    let upper_ok = match (&outer.upper, &inner.upper) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(o), Some(i)) => match i.value.compare(&o.value) {
            Ordering::Less => true,
            Ordering::Equal => o.inclusive || !i.inclusive,
            Ordering::Greater => false,
        },
    };
    lower_ok && upper_ok
}
