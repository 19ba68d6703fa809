// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! LIKE wildcard matching.
//!
//! Patterns use `*` (any run, including empty) and `?` (exactly one
//! character). The pattern is compiled to an anchored regex; every other
//! character is literal.

use crate::error::{TroveError, TroveResult};
use regex::Regex;

/// Compiles a LIKE pattern.
pub fn compile(pattern: &str, case_insensitive: bool) -> TroveResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    if case_insensitive {
        re.push_str("(?is)");
    } else {
        re.push_str("(?s)");
    }
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| TroveError::InvalidQuery {
        message: format!("invalid LIKE pattern '{}': {}", pattern, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        let re = compile("a*b?c", false).unwrap();
        assert!(re.is_match("aXYZbQc"));
        assert!(re.is_match("ab_c"));
        assert!(!re.is_match("abc"));
        assert!(!re.is_match("aXbQcZ"));
    }

    #[test]
    fn test_literals_escaped() {
        let re = compile("1+1", false).unwrap();
        assert!(re.is_match("1+1"));
        assert!(!re.is_match("11"));
    }

    #[test]
    fn test_case_insensitive() {
        let re = compile("He*o", true).unwrap();
        assert!(re.is_match("hellO"));
    }
}
