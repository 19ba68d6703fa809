// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for TroveDB operations.
//!
//! Provides structured error handling with detailed context for debugging.
//! Every failure carries the offending identifier or value where one exists.

use std::fmt;

/// Standard Result type for all TroveDB operations.
pub type TroveResult<T> = Result<T, TroveError>;

/// Error types for TroveDB operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TroveError {
    /// Object lookup by non-existent or removed key.
    InvalidKey { key: i64 },

    /// Null assigned to a non-nullable column.
    ColumnNotNullable { column: String },

    /// Column key not found in table.
    ColumnIndexOutOfRange { column: String },

    /// Operation not supported for the column type (e.g. indexing a Float
    /// column, sorting on a link operand).
    IllegalCombination { reason: String },

    /// Link target row does not exist.
    TargetRowIndexOutOfRange { key: i64 },

    /// Column name exceeds 63 bytes.
    ColumnNameTooLong { name: String },

    /// Value assigned with a type other than the column's declared type.
    TypeMismatch { expected: String, actual: String },

    /// String payload exceeds the maximum blob size.
    StringTooBig { size: usize },

    /// Binary payload exceeds the maximum blob size.
    BinaryTooBig { size: usize },

    /// Table not found.
    TableNotFound { name: String },

    /// Table already exists.
    TableAlreadyExists { name: String },

    /// Predicate failed to parse.
    SyntaxError { message: String, position: usize },

    /// Predicate references an unknown property, an incompatible operator,
    /// or an illegal quantifier.
    InvalidQuery { message: String },

    /// Bound argument's runtime type cannot be coerced to the operand's
    /// declared type.
    InvalidQueryArg { message: String },

    /// Key-path alias substitution exceeded the cycle-detection bound.
    MappingError { alias: String },

    /// Payload is not parseable JSON when setting a Mixed column.
    MalformedJson { reason: String },

    /// Database file is corrupted (bad magic, checksum mismatch, invalid
    /// ref or header).
    Corrupted { reason: String },

    /// Could not acquire the writer lock within the configured timeout.
    LockTimeout { path: String, timeout_secs: u64 },

    /// I/O error during file operations.
    IoError { operation: String, reason: String },

    /// Configuration file invalid.
    ConfigError { reason: String },
}

impl fmt::Display for TroveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { key } => {
                write!(f, "Invalid object key: {}", key)
            }
            Self::ColumnNotNullable { column } => {
                write!(f, "Column '{}' is not nullable", column)
            }
            Self::ColumnIndexOutOfRange { column } => {
                write!(f, "Column '{}' not found in table", column)
            }
            Self::IllegalCombination { reason } => {
                write!(f, "Illegal combination: {}", reason)
            }
            Self::TargetRowIndexOutOfRange { key } => {
                write!(f, "Link target row {} does not exist", key)
            }
            Self::ColumnNameTooLong { name } => {
                write!(f, "Column name too long (max 63 bytes): '{}'", name)
            }
            Self::TypeMismatch { expected, actual } => {
                write!(f, "Type mismatch: expected {}, got {}", expected, actual)
            }
            Self::StringTooBig { size } => {
                write!(f, "String too big: {} bytes", size)
            }
            Self::BinaryTooBig { size } => {
                write!(f, "Binary too big: {} bytes", size)
            }
            Self::TableNotFound { name } => {
                write!(f, "Table '{}' not found", name)
            }
            Self::TableAlreadyExists { name } => {
                write!(f, "Table '{}' already exists", name)
            }
            Self::SyntaxError { message, position } => {
                write!(f, "Syntax error at position {}: {}", position, message)
            }
            Self::InvalidQuery { message } => {
                write!(f, "Invalid query: {}", message)
            }
            Self::InvalidQueryArg { message } => {
                write!(f, "Invalid query argument: {}", message)
            }
            Self::MappingError { alias } => {
                write!(f, "Key-path substitution loop detected for '{}'", alias)
            }
            Self::MalformedJson { reason } => {
                write!(f, "Malformed JSON: {}", reason)
            }
            Self::Corrupted { reason } => {
                write!(f, "Database corrupted: {}", reason)
            }
            Self::LockTimeout { path, timeout_secs } => {
                write!(f, "Could not lock '{}' within {}s", path, timeout_secs)
            }
            Self::IoError { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
            Self::ConfigError { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
        }
    }
}

impl std::error::Error for TroveError {}

// Convenience conversion from std::io::Error
impl From<std::io::Error> for TroveError {
    fn from(err: std::io::Error) -> Self {
        TroveError::IoError {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}
