//! Built-in functions for policy expressions
//!
//! Functions are looked up by (case-insensitive) name once, while the
//! document is parsed, and their argument types are checked at the same time.
//! At evaluation time only [`Function::apply`] runs; it is pure and total over
//! the argument types accepted by [`Function::check`].

use std::cmp::Ordering;

use crate::attribute::{AttributeType, AttributeValue, Element};
use crate::error::EvalError;

/// Built-in function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Equal,
    Greater,
    Less,
    Contains,
    Subdomain,
    Not,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Intersect,
    Union,
    Len,
    Concat,
}

const FUNCTIONS: &[(&str, Function)] = &[
    ("equal", Function::Equal),
    ("greater", Function::Greater),
    ("less", Function::Less),
    ("contains", Function::Contains),
    ("subdomain", Function::Subdomain),
    ("not", Function::Not),
    ("and", Function::And),
    ("or", Function::Or),
    ("add", Function::Add),
    ("subtract", Function::Subtract),
    ("multiply", Function::Multiply),
    ("divide", Function::Divide),
    ("intersect", Function::Intersect),
    ("union", Function::Union),
    ("len", Function::Len),
    ("concat", Function::Concat),
];

fn describe(args: &[AttributeType]) -> String {
    let names: Vec<String> = args.iter().map(|t| t.to_string()).collect();
    format!("({})", names.join(", "))
}

impl Function {
    /// Look up a function by case-insensitive name
    pub fn lookup(name: &str) -> Option<Function> {
        FUNCTIONS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, f)| *f)
    }

    /// Canonical name as written in policy documents
    pub fn name(self) -> &'static str {
        FUNCTIONS
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    /// Check argument types and return the result type
    pub fn check(self, args: &[AttributeType]) -> Result<AttributeType, String> {
        use AttributeType as T;

        let result = match (self, args) {
            (Function::Equal, [a, b]) if a == b => Some(T::Boolean),
            (Function::Greater | Function::Less, [a, b]) if a == b && a.is_ordered() => {
                Some(T::Boolean)
            }
            (Function::Contains, [T::String, T::String]) => Some(T::Boolean),
            (Function::Contains, [T::Network, T::Address]) => Some(T::Boolean),
            (Function::Contains, [T::Set(crate::attribute::ElementType::Network), T::Address]) => {
                Some(T::Boolean)
            }
            (Function::Contains, [T::Set(e) | T::List(e), item]) if e.scalar() == *item => {
                Some(T::Boolean)
            }
            (Function::Subdomain, [T::Domain, T::Domain]) => Some(T::Boolean),
            (Function::Not, [T::Boolean]) => Some(T::Boolean),
            (Function::And | Function::Or, args)
                if !args.is_empty() && args.iter().all(|a| *a == T::Boolean) =>
            {
                Some(T::Boolean)
            }
            (Function::Add | Function::Subtract | Function::Multiply | Function::Divide, [a, b])
                if a == b && a.is_numeric() =>
            {
                Some(*a)
            }
            (Function::Intersect | Function::Union, [T::Set(a), T::Set(b)]) if a == b => {
                Some(T::Set(*a))
            }
            (Function::Len, [a]) if *a == T::String || a.is_collection() => Some(T::Integer),
            (Function::Concat, args) if !args.is_empty() => {
                let first = args[0].element();
                match first {
                    Some(e) if args.iter().all(|a| a.element() == Some(e)) => Some(T::List(e)),
                    _ => None,
                }
            }
            _ => None,
        };

        result.ok_or_else(|| {
            format!(
                "function \"{}\" does not accept arguments {}",
                self.name(),
                describe(args)
            )
        })
    }

    /// Apply the function to already evaluated arguments
    ///
    /// `and`/`or` are normally short-circuited by the evaluator; applying them
    /// here folds over all arguments.
    pub fn apply(self, args: &[AttributeValue]) -> Result<AttributeValue, EvalError> {
        let name = self.name();
        let unexpected = || {
            let types: Vec<AttributeType> = args.iter().map(|a| a.attribute_type()).collect();
            EvalError::function(name, format!("unexpected arguments {}", describe(&types)))
        };

        match (self, args) {
            (Function::Equal, [a, b]) => Ok(AttributeValue::Boolean(a == b)),
            (Function::Greater, [a, b]) => a
                .compare(b)
                .map(|o| AttributeValue::Boolean(o == Ordering::Greater))
                .ok_or_else(|| EvalError::function(name, "values are not comparable")),
            (Function::Less, [a, b]) => a
                .compare(b)
                .map(|o| AttributeValue::Boolean(o == Ordering::Less))
                .ok_or_else(|| EvalError::function(name, "values are not comparable")),
            (Function::Contains, [container, item]) => container
                .contains(item)
                .map(AttributeValue::Boolean)
                .ok_or_else(unexpected),
            (
                Function::Subdomain,
                [AttributeValue::Domain(child), AttributeValue::Domain(parent)],
            ) => Ok(AttributeValue::Boolean(child.is_subdomain_of(parent))),
            (Function::Not, [AttributeValue::Boolean(b)]) => Ok(AttributeValue::Boolean(!b)),
            (Function::And, args) => {
                let mut acc = true;
                for arg in args {
                    acc &= arg.as_bool().ok_or_else(unexpected)?;
                }
                Ok(AttributeValue::Boolean(acc))
            }
            (Function::Or, args) => {
                let mut acc = false;
                for arg in args {
                    acc |= arg.as_bool().ok_or_else(unexpected)?;
                }
                Ok(AttributeValue::Boolean(acc))
            }
            (
                Function::Add | Function::Subtract | Function::Multiply | Function::Divide,
                [a, b],
            ) => arithmetic(self, a, b).unwrap_or_else(|| Err(unexpected())),
            (Function::Intersect, [a, b]) => a.intersect(b).ok_or_else(unexpected),
            (Function::Union, [a, b]) => a.union(b).ok_or_else(unexpected),
            (Function::Len, [a]) => {
                let n = a.len().ok_or_else(unexpected)?;
                i64::try_from(n)
                    .map(AttributeValue::Integer)
                    .map_err(|_| EvalError::function(name, "length does not fit an integer"))
            }
            (Function::Concat, args) if !args.is_empty() => {
                let element = args[0].attribute_type().element().ok_or_else(unexpected)?;
                let mut items: Vec<Element> = Vec::new();
                for arg in args {
                    if arg.attribute_type().element() != Some(element) {
                        return Err(unexpected());
                    }
                    if let Some(elements) = arg.elements() {
                        items.extend(elements.cloned());
                    }
                }
                Ok(AttributeValue::List(element, items))
            }
            _ => Err(unexpected()),
        }
    }
}

fn arithmetic(
    function: Function,
    a: &AttributeValue,
    b: &AttributeValue,
) -> Option<Result<AttributeValue, EvalError>> {
    let name = function.name();
    match (a, b) {
        (AttributeValue::Integer(x), AttributeValue::Integer(y)) => {
            let result = match function {
                Function::Add => x.checked_add(*y),
                Function::Subtract => x.checked_sub(*y),
                Function::Multiply => x.checked_mul(*y),
                Function::Divide => {
                    if *y == 0 {
                        return Some(Err(EvalError::function(name, "division by zero")));
                    }
                    x.checked_div(*y)
                }
                _ => return None,
            };
            Some(
                result
                    .map(AttributeValue::Integer)
                    .ok_or_else(|| EvalError::function(name, "integer overflow")),
            )
        }
        (AttributeValue::Float(x), AttributeValue::Float(y)) => {
            let result = match function {
                Function::Add => x + y,
                Function::Subtract => x - y,
                Function::Multiply => x * y,
                Function::Divide => {
                    if *y == 0.0 {
                        return Some(Err(EvalError::function(name, "division by zero")));
                    }
                    x / y
                }
                _ => return None,
            };
            if result.is_finite() {
                Some(Ok(AttributeValue::Float(result)))
            } else {
                Some(Err(EvalError::function(name, "result is not a finite number")))
            }
        }
        _ => None,
    }
}
