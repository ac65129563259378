//! Built-in function catalog and the purity facts rules depend on.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Value;
use super::VarId;

/// Failure while evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// `FAIL()` was evaluated.
    #[error("query failed: {0}")]
    Failed(String),
    /// The function needs storage or a clock and cannot be evaluated here.
    #[error("function {0} cannot be evaluated without an execution context")]
    NotEvaluable(&'static str),
    /// Wrong number of arguments.
    #[error("function {func} expects {expected} arguments, got {found}")]
    Arity {
        /// Function name.
        func: &'static str,
        /// Accepted argument count description.
        expected: &'static str,
        /// Supplied count.
        found: usize,
    },
    /// A variable had no binding.
    #[error("variable {0} is not bound")]
    Unbound(VarId),
}

/// Built-in functions known to the optimizer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Function {
    /// Length of a string, array or object.
    Length,
    /// String concatenation of all arguments.
    Concat,
    /// Upper-casing.
    Upper,
    /// Lower-casing.
    Lower,
    /// Numeric conversion.
    ToNumber,
    /// String conversion.
    ToString,
    /// Boolean conversion.
    ToBool,
    /// Absolute value.
    Abs,
    /// Round toward negative infinity.
    Floor,
    /// Round half away from zero.
    Round,
    /// Random number in `[0, 1)`.
    Rand,
    /// Current wall-clock time in milliseconds.
    DateNow,
    /// Document lookup by id.
    Document,
    /// Raises a query error.
    Fail,
    /// Identity that shields its argument from optimization.
    Noopt,
}

impl Function {
    /// Name as written in queries.
    pub fn name(self) -> &'static str {
        match self {
            Function::Length => "LENGTH",
            Function::Concat => "CONCAT",
            Function::Upper => "UPPER",
            Function::Lower => "LOWER",
            Function::ToNumber => "TO_NUMBER",
            Function::ToString => "TO_STRING",
            Function::ToBool => "TO_BOOL",
            Function::Abs => "ABS",
            Function::Floor => "FLOOR",
            Function::Round => "ROUND",
            Function::Rand => "RAND",
            Function::DateNow => "DATE_NOW",
            Function::Document => "DOCUMENT",
            Function::Fail => "FAIL",
            Function::Noopt => "NOOPT",
        }
    }

    /// Same inputs always give the same output.
    pub fn is_deterministic(self) -> bool {
        !matches!(self, Function::Rand | Function::DateNow)
    }

    /// May raise an error at runtime.
    pub fn can_throw(self) -> bool {
        matches!(self, Function::Fail | Function::Document)
    }

    /// Reads from storage.
    pub fn performs_io(self) -> bool {
        matches!(self, Function::Document)
    }

    /// Marks its argument as off-limits for rewrites.
    pub fn blocks_optimization(self) -> bool {
        matches!(self, Function::Noopt)
    }

    /// Safe to move, duplicate or evaluate at plan time.
    pub fn is_pure(self) -> bool {
        self.is_deterministic()
            && !self.can_throw()
            && !self.performs_io()
            && !self.blocks_optimization()
    }

    fn arity(self) -> (usize, Option<usize>, &'static str) {
        match self {
            Function::Concat => (0, None, "any number of"),
            Function::Rand | Function::DateNow => (0, Some(0), "0"),
            Function::Fail => (0, Some(1), "0 or 1"),
            _ => (1, Some(1), "1"),
        }
    }

    /// Evaluates the function over already evaluated arguments.
    pub fn evaluate(self, args: &[Value]) -> Result<Value, EvalError> {
        let (min, max, expected) = self.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(EvalError::Arity {
                func: self.name(),
                expected,
                found: args.len(),
            });
        }
        let first = args.first().cloned().unwrap_or(Value::Null);
        let value = match self {
            Function::Length => Value::number(first.length()),
            Function::Concat => Value::String(args.iter().map(Value::to_text).collect()),
            Function::Upper => Value::String(first.to_text().to_uppercase()),
            Function::Lower => Value::String(first.to_text().to_lowercase()),
            Function::ToNumber => Value::number(first.to_number()),
            Function::ToString => Value::String(first.to_text()),
            Function::ToBool => Value::Bool(first.is_truthy()),
            Function::Abs => Value::number(first.to_number().abs()),
            Function::Floor => Value::number(first.to_number().floor()),
            Function::Round => Value::number(first.to_number().round()),
            Function::Noopt => first,
            Function::Fail => return Err(EvalError::Failed(first.to_text())),
            Function::Rand | Function::DateNow | Function::Document => {
                return Err(EvalError::NotEvaluable(self.name()))
            }
        };
        Ok(value)
    }

    /// Looks a function up by its query-language name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Function> {
        let upper = name.to_ascii_uppercase();
        ALL_FUNCTIONS.iter().copied().find(|f| f.name() == upper)
    }
}

const ALL_FUNCTIONS: [Function; 15] = [
    Function::Length,
    Function::Concat,
    Function::Upper,
    Function::Lower,
    Function::ToNumber,
    Function::ToString,
    Function::ToBool,
    Function::Abs,
    Function::Floor,
    Function::Round,
    Function::Rand,
    Function::DateNow,
    Function::Document,
    Function::Fail,
    Function::Noopt,
];
