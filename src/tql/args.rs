// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Numbered query arguments (`$0`, `$1`, …).
//!
//! The parser stays value-agnostic: it records argument positions and
//! the compiler pulls typed values out of an `Arguments` provider when
//! the operand's declared type is known. List arguments are disclosed
//! only through `is_argument_list`; asking for the scalar type of a list
//! argument is an error.

use crate::error::{TroveError, TroveResult};
use crate::keys::ObjKey;
use crate::value::{ColumnType, Value};

/// Provider of typed argument values.
pub trait Arguments {
    /// Number of bound arguments.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether argument `n` is null.
    fn is_argument_null(&self, n: usize) -> TroveResult<bool>;

    /// Whether argument `n` is a list.
    fn is_argument_list(&self, n: usize) -> TroveResult<bool>;

    /// Scalar value of argument `n`.
    fn value_for_argument(&self, n: usize) -> TroveResult<Value>;

    /// List payload of argument `n`.
    fn list_for_argument(&self, n: usize) -> TroveResult<Vec<Value>>;

    /// Dynamic type of a scalar argument. Errors for lists.
    fn type_for_argument(&self, n: usize) -> TroveResult<Option<ColumnType>> {
        if self.is_argument_list(n)? {
            return Err(TroveError::InvalidQueryArg {
                message: format!("argument ${} is a list; no scalar type", n),
            });
        }
        Ok(self.value_for_argument(n)?.data_type())
    }

    fn bool_for_argument(&self, n: usize) -> TroveResult<bool> {
        match self.value_for_argument(n)? {
            Value::Bool(b) => Ok(b),
            other => Err(arg_type_error(n, "bool", &other)),
        }
    }

    fn long_for_argument(&self, n: usize) -> TroveResult<i64> {
        match self.value_for_argument(n)? {
            Value::Int(v) => Ok(v),
            other => Err(arg_type_error(n, "int", &other)),
        }
    }

    fn string_for_argument(&self, n: usize) -> TroveResult<String> {
        match self.value_for_argument(n)? {
            Value::String(s) => Ok(s),
            other => Err(arg_type_error(n, "string", &other)),
        }
    }

    fn objkey_for_argument(&self, n: usize) -> TroveResult<ObjKey> {
        match self.value_for_argument(n)? {
            Value::Int(v) => Ok(ObjKey(v)),
            Value::Link(k) => Ok(k),
            other => Err(arg_type_error(n, "object key", &other)),
        }
    }
}

fn arg_type_error(n: usize, expected: &str, actual: &Value) -> TroveError {
    TroveError::InvalidQueryArg {
        message: format!(
            "argument ${} has type {}, expected {}",
            n,
            actual.type_name(),
            expected
        ),
    }
}

/// Arguments backed by a plain value vector. A `Value::List` entry is a
/// list argument.
#[derive(Debug, Clone, Default)]
pub struct ArgumentList {
    values: Vec<Value>,
}

impl ArgumentList {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    fn entry(&self, n: usize) -> TroveResult<&Value> {
        self.values.get(n).ok_or_else(|| TroveError::InvalidQueryArg {
            message: format!("request for argument ${} but only {} bound", n, self.values.len()),
        })
    }
}

impl Arguments for ArgumentList {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn is_argument_null(&self, n: usize) -> TroveResult<bool> {
        Ok(self.entry(n)?.is_null())
    }

    fn is_argument_list(&self, n: usize) -> TroveResult<bool> {
        Ok(matches!(self.entry(n)?, Value::List(_) | Value::Set(_)))
    }

    fn value_for_argument(&self, n: usize) -> TroveResult<Value> {
        let v = self.entry(n)?;
        if matches!(v, Value::List(_) | Value::Set(_)) {
            return Err(TroveError::InvalidQueryArg {
                message: format!("argument ${} is a list", n),
            });
        }
        Ok(v.clone())
    }

    fn list_for_argument(&self, n: usize) -> TroveResult<Vec<Value>> {
        match self.entry(n)? {
            Value::List(items) | Value::Set(items) => Ok(items.clone()),
            _ => Err(TroveError::InvalidQueryArg {
                message: format!("argument ${} is not a list", n),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_arguments() {
        let args = ArgumentList::new(vec![Value::Int(5), Value::String("x".into()), Value::Null]);
        assert_eq!(args.long_for_argument(0).unwrap(), 5);
        assert_eq!(args.string_for_argument(1).unwrap(), "x");
        assert!(args.is_argument_null(2).unwrap());
        assert!(args.long_for_argument(1).is_err());
        assert!(args.value_for_argument(9).is_err());
    }

    #[test]
    fn test_list_arguments_disclosed_via_is_list() {
        let args = ArgumentList::new(vec![Value::List(vec![Value::Int(1), Value::Int(2)])]);
        assert!(args.is_argument_list(0).unwrap());
        assert_eq!(args.list_for_argument(0).unwrap().len(), 2);
        // Scalar access and scalar typing of a list argument both fail.
        assert!(args.value_for_argument(0).is_err());
        assert!(args.type_for_argument(0).is_err());
    }
}
