//! Expression trees attached to calculation and filter nodes.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};

use super::func::{EvalError, Function};
use super::value::Value;
use super::variable::VariableTable;
use super::{AttributePath, VarId};

/// Binary operators: comparisons and arithmetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `IN`
    In,
    /// `NOT IN`
    NotIn,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

impl BinaryOp {
    /// Operator as written in queries.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "IN",
            BinaryOp::NotIn => "NOT IN",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    /// `<`, `<=`, `>` or `>=`.
    pub fn is_relational(self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    /// Operator to use when the operands trade places.
    pub fn swapped(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Eq),
            BinaryOp::Ne => Some(BinaryOp::Ne),
            BinaryOp::Lt => Some(BinaryOp::Gt),
            BinaryOp::Le => Some(BinaryOp::Ge),
            BinaryOp::Gt => Some(BinaryOp::Lt),
            BinaryOp::Ge => Some(BinaryOp::Le),
            _ => None,
        }
    }

    /// Applies the operator to two evaluated operands.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Value {
        use std::cmp::Ordering::*;
        match self {
            BinaryOp::Eq => Value::Bool(lhs.compare(rhs) == Equal),
            BinaryOp::Ne => Value::Bool(lhs.compare(rhs) != Equal),
            BinaryOp::Lt => Value::Bool(lhs.compare(rhs) == Less),
            BinaryOp::Le => Value::Bool(lhs.compare(rhs) != Greater),
            BinaryOp::Gt => Value::Bool(lhs.compare(rhs) == Greater),
            BinaryOp::Ge => Value::Bool(lhs.compare(rhs) != Less),
            BinaryOp::In => Value::Bool(contains(rhs, lhs)),
            BinaryOp::NotIn => Value::Bool(!contains(rhs, lhs)),
            BinaryOp::Add => Value::number(lhs.to_number() + rhs.to_number()),
            BinaryOp::Sub => Value::number(lhs.to_number() - rhs.to_number()),
            BinaryOp::Mul => Value::number(lhs.to_number() * rhs.to_number()),
            BinaryOp::Div => Value::number(lhs.to_number() / rhs.to_number()),
            BinaryOp::Mod => Value::number(lhs.to_number() % rhs.to_number()),
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| item.compare(needle).is_eq()),
        _ => false,
    }
}

/// Short-circuiting logical operators. Both return one of their operands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Unary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Minus,
}

/// Expression tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Constant value.
    Literal(Value),
    /// Reference to a variable.
    Variable(VarId),
    /// `base.name`
    Attribute {
        /// Object being accessed.
        base: Box<Expr>,
        /// Attribute name.
        name: String,
    },
    /// `base[index]`
    Indexed {
        /// Array or object being accessed.
        base: Box<Expr>,
        /// Position or key.
        index: Box<Expr>,
    },
    /// Built-in function call.
    Call {
        /// Function invoked.
        func: Function,
        /// Arguments in order.
        args: Vec<Expr>,
    },
    /// Comparison or arithmetic.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `&&` / `||`.
    Logical {
        /// Operator.
        op: LogicalOp,
        /// Left operand, always evaluated.
        lhs: Box<Expr>,
        /// Right operand, evaluated on demand.
        rhs: Box<Expr>,
    },
    /// `!x` / `-x`.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Integer range `low..high`.
    Range {
        /// First value.
        low: Box<Expr>,
        /// Last value, inclusive.
        high: Box<Expr>,
    },
    /// Array constructor.
    Array(Vec<Expr>),
    /// Object constructor.
    Object(Vec<(String, Expr)>),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Literal(Value::Null)
    }
}

/// Source of variable values during evaluation.
pub trait Bindings {
    /// Current value of `var`, if bound.
    fn lookup(&self, var: VarId) -> Option<&Value>;
}

impl<S: BuildHasher> Bindings for HashMap<VarId, Value, S> {
    fn lookup(&self, var: VarId) -> Option<&Value> {
        self.get(&var)
    }
}

/// Evaluation context with no variables bound.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBindings;

impl Bindings for NoBindings {
    fn lookup(&self, _var: VarId) -> Option<&Value> {
        None
    }
}

impl Expr {
    /// Literal expression.
    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    /// Variable reference.
    pub fn var(var: VarId) -> Expr {
        Expr::Variable(var)
    }

    /// Attribute chain on a variable, e.g. `path(doc, "a.b")` for `doc.a.b`.
    pub fn path(var: VarId, dotted: &str) -> Expr {
        AttributePath::parse(dotted)
            .parts()
            .iter()
            .fold(Expr::Variable(var), |base, name| base.attr(name))
    }

    /// `self.name`
    pub fn attr(self, name: &str) -> Expr {
        Expr::Attribute {
            base: Box::new(self),
            name: name.to_owned(),
        }
    }

    /// `self[index]`
    pub fn at(self, index: Expr) -> Expr {
        Expr::Indexed {
            base: Box::new(self),
            index: Box::new(index),
        }
    }

    /// Function call.
    pub fn call(func: Function, args: Vec<Expr>) -> Expr {
        Expr::Call { func, args }
    }

    /// Binary operation.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `self == rhs`
    pub fn equals(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, self, rhs)
    }

    /// `self != rhs`
    pub fn not_equals(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Ne, self, rhs)
    }

    /// `self < rhs`
    pub fn less_than(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, self, rhs)
    }

    /// `self <= rhs`
    pub fn less_equal(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Le, self, rhs)
    }

    /// `self > rhs`
    pub fn greater_than(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, self, rhs)
    }

    /// `self >= rhs`
    pub fn greater_equal(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Ge, self, rhs)
    }

    /// `self IN rhs`
    pub fn in_list(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::In, self, rhs)
    }

    /// `self && rhs`
    pub fn and(self, rhs: Expr) -> Expr {
        Expr::Logical {
            op: LogicalOp::And,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    /// `self || rhs`
    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Logical {
            op: LogicalOp::Or,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    /// `!self`
    pub fn negate(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// `low..high`
    pub fn range(low: Expr, high: Expr) -> Expr {
        Expr::Range {
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    /// Constant value, when this is a literal.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Visits direct children.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Expr::Literal(_) | Expr::Variable(_) => {}
            Expr::Attribute { base, .. } => f(base),
            Expr::Indexed { base, index } => {
                f(base);
                f(index);
            }
            Expr::Call { args, .. } | Expr::Array(args) => args.iter().for_each(|a| f(a)),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Expr::Unary { operand, .. } => f(operand),
            Expr::Range { low, high } => {
                f(low);
                f(high);
            }
            Expr::Object(pairs) => pairs.iter().for_each(|(_, v)| f(v)),
        }
    }

    /// Visits direct children mutably.
    pub fn for_each_child_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            Expr::Literal(_) | Expr::Variable(_) => {}
            Expr::Attribute { base, .. } => f(base),
            Expr::Indexed { base, index } => {
                f(base);
                f(index);
            }
            Expr::Call { args, .. } | Expr::Array(args) => args.iter_mut().for_each(|a| f(a)),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Expr::Unary { operand, .. } => f(operand),
            Expr::Range { low, high } => {
                f(low);
                f(high);
            }
            Expr::Object(pairs) => pairs.iter_mut().for_each(|(_, v)| f(v)),
        }
    }

    /// Pre-order traversal of the whole tree.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        self.for_each_child(&mut |child| child.walk(f));
    }

    fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |e| found = found || pred(e));
        found
    }

    /// Appends every variable occurrence, repetitions included.
    pub fn collect_variables(&self, out: &mut Vec<VarId>) {
        self.walk(&mut |e| {
            if let Expr::Variable(v) = e {
                out.push(*v);
            }
        });
    }

    /// Distinct variables referenced.
    pub fn variables(&self) -> BTreeSet<VarId> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out.into_iter().collect()
    }

    /// Number of occurrences of `var`.
    pub fn references(&self, var: VarId) -> usize {
        let mut count = 0;
        self.walk(&mut |e| {
            if matches!(e, Expr::Variable(v) if *v == var) {
                count += 1;
            }
        });
        count
    }

    /// No call to a non-deterministic function.
    pub fn is_deterministic(&self) -> bool {
        !self.any(&|e| matches!(e, Expr::Call { func, .. } if !func.is_deterministic()))
    }

    /// Some part may raise an error.
    pub fn can_throw(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Call { func, .. } if func.can_throw()))
    }

    /// Some part reads from storage.
    pub fn performs_io(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Call { func, .. } if func.performs_io()))
    }

    /// Contains `NOOPT(...)`.
    pub fn blocks_optimization(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Call { func, .. } if func.blocks_optimization()))
    }

    /// Deterministic, non-throwing, free of IO and not shielded by `NOOPT`.
    pub fn is_pure(&self) -> bool {
        !self.any(&|e| matches!(e, Expr::Call { func, .. } if !func.is_pure()))
    }

    /// Pure and free of variables, so it can be evaluated at plan time.
    pub fn is_constant(&self) -> bool {
        self.is_pure() && !self.any(&|e| matches!(e, Expr::Variable(_)))
    }

    /// Resolves `var.a.b` style chains to the variable and static path.
    pub fn static_path(&self) -> Option<(VarId, AttributePath)> {
        match self {
            Expr::Variable(v) => Some((*v, AttributePath::default())),
            Expr::Attribute { base, name } => {
                let (var, path) = base.static_path()?;
                Some((var, path.child(name)))
            }
            _ => None,
        }
    }

    /// Replaces every occurrence of `var` with `replacement`. Returns the
    /// number of replacements.
    pub fn substitute(&mut self, var: VarId, replacement: &Expr) -> usize {
        if matches!(self, Expr::Variable(v) if *v == var) {
            *self = replacement.clone();
            return 1;
        }
        let mut count = 0;
        self.for_each_child_mut(&mut |child| count += child.substitute(var, replacement));
        count
    }

    /// Evaluates the expression.
    pub fn evaluate(&self, bindings: &dyn Bindings) -> Result<Value, EvalError> {
        Ok(match self {
            Expr::Literal(value) => value.clone(),
            Expr::Variable(var) => bindings.lookup(*var).cloned().ok_or(EvalError::Unbound(*var))?,
            Expr::Attribute { base, name } => base.evaluate(bindings)?.attribute(name),
            Expr::Indexed { base, index } => {
                let base = base.evaluate(bindings)?;
                base.index(&index.evaluate(bindings)?)
            }
            Expr::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                func.evaluate(&values)?
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.evaluate(bindings)?;
                op.apply(&lhs, &rhs.evaluate(bindings)?)
            }
            Expr::Logical { op, lhs, rhs } => {
                let left = lhs.evaluate(bindings)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => left,
                    _ => rhs.evaluate(bindings)?,
                }
            }
            Expr::Unary { op, operand } => {
                let value = operand.evaluate(bindings)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Minus => Value::number(-value.to_number()),
                }
            }
            Expr::Range { low, high } => {
                let low = range_bound(&low.evaluate(bindings)?);
                let high = range_bound(&high.evaluate(bindings)?);
                if low <= high {
                    (low..=high).map(Value::from).collect::<Vec<_>>().into()
                } else {
                    (high..=low).rev().map(Value::from).collect::<Vec<_>>().into()
                }
            }
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.evaluate(bindings))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Expr::Object(pairs) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in pairs {
                    map.insert(key.clone(), value.evaluate(bindings)?);
                }
                Value::Object(map)
            }
        })
    }

    /// Folds constant subtrees into literals, bottom-up.
    ///
    /// `&&`/`||` with a constant left operand collapse to the operand they
    /// would return. Ranges stay symbolic, and an expression over a range of
    /// more than `MAX_FOLDED_RANGE` elements is left unevaluated. Division
    /// or modulo by a constant zero folds to null and records a warning.
    /// Returns whether anything changed.
    pub fn fold(&mut self, warnings: &mut Vec<String>) -> bool {
        let mut changed = false;
        self.for_each_child_mut(&mut |child| changed |= child.fold(warnings));

        if let Expr::Logical { op, lhs, rhs } = self {
            if let Expr::Literal(left) = lhs.as_ref() {
                let keep_left = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                };
                let replacement = if keep_left {
                    Expr::Literal(left.clone())
                } else {
                    std::mem::take(rhs.as_mut())
                };
                *self = replacement;
                return true;
            }
        }

        if matches!(self, Expr::Literal(_) | Expr::Range { .. }) || !self.is_constant() {
            return changed;
        }
        if self.any(&|e| matches!(e, Expr::Range { low, high } if !small_range(low, high))) {
            return changed;
        }
        if let Expr::Binary {
            op: BinaryOp::Div | BinaryOp::Mod,
            rhs,
            ..
        } = self
        {
            if rhs.as_literal().is_some_and(|v| v.to_number() == 0.0) {
                warnings.push("division by zero".to_owned());
            }
        }
        match self.evaluate(&NoBindings) {
            Ok(value) => {
                *self = Expr::Literal(value);
                true
            }
            Err(_) => changed,
        }
    }

    /// Renders the expression using variable names from `vars`.
    pub fn display<'a>(&'a self, vars: &'a VariableTable) -> ExprDisplay<'a> {
        ExprDisplay { expr: self, vars }
    }
}

/// Largest constant range that constant folding materializes.
const MAX_FOLDED_RANGE: u64 = 1_000;

fn range_bound(value: &Value) -> i64 {
    value.to_number().trunc() as i64
}

/// Number of values `low..high` yields.
pub(crate) fn range_len(low: &Value, high: &Value) -> u64 {
    range_bound(low).abs_diff(range_bound(high)).saturating_add(1)
}

fn small_range(low: &Expr, high: &Expr) -> bool {
    match (low.as_literal(), high.as_literal()) {
        (Some(low), Some(high)) => range_len(low, high) <= MAX_FOLDED_RANGE,
        _ => false,
    }
}

/// [`fmt::Display`] adapter produced by [`Expr::display`].
pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    vars: &'a VariableTable,
}

impl ExprDisplay<'_> {
    fn nested<'b>(&'b self, expr: &'b Expr) -> ExprDisplay<'b> {
        ExprDisplay {
            expr,
            vars: self.vars,
        }
    }

    fn operand(&self, f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
        match expr {
            Expr::Binary { .. } | Expr::Logical { .. } | Expr::Range { .. } => {
                write!(f, "({})", self.nested(expr))
            }
            _ => write!(f, "{}", self.nested(expr)),
        }
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr {
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Variable(var) => f.write_str(&self.vars.name(*var)),
            Expr::Attribute { base, name } => {
                self.operand(f, base)?;
                write!(f, ".{name}")
            }
            Expr::Indexed { base, index } => {
                self.operand(f, base)?;
                write!(f, "[{}]", self.nested(index))
            }
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", self.nested(arg))?;
                }
                f.write_str(")")
            }
            Expr::Binary { op, lhs, rhs } => {
                self.operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                self.operand(f, rhs)
            }
            Expr::Logical { op, lhs, rhs } => {
                self.operand(f, lhs)?;
                f.write_str(match op {
                    LogicalOp::And => " && ",
                    LogicalOp::Or => " || ",
                })?;
                self.operand(f, rhs)
            }
            Expr::Unary { op, operand } => {
                f.write_str(match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Minus => "-",
                })?;
                self.operand(f, operand)
            }
            Expr::Range { low, high } => {
                self.operand(f, low)?;
                f.write_str(" .. ")?;
                self.operand(f, high)
            }
            Expr::Array(items) => {
                f.write_str("[ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", self.nested(item))?;
                }
                f.write_str(" ]")
            }
            Expr::Object(pairs) => {
                f.write_str("{ ")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{key}\" : {}", self.nested(value))?;
                }
                f.write_str(" }")
            }
        }
    }
}
