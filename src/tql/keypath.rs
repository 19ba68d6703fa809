// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Key-path aliases.
//!
//! A mapping rewrites (table, identifier) pairs into replacement paths
//! before resolution, so schema-level aliases (subquery variables,
//! renamed properties, class prefixes) stay out of the core resolver.
//! Substitution is bounded to break alias cycles.

use crate::error::{TroveError, TroveResult};
use crate::keys::TableKey;
use std::collections::HashMap;

/// Upper bound on alias substitutions for one identifier.
const MAX_SUBSTITUTIONS: usize = 50;

/// Alias table for key-path and table-name rewriting.
#[derive(Debug, Clone, Default)]
pub struct KeyPathMapping {
    mapping: HashMap<(TableKey, String), String>,
    table_mapping: HashMap<String, String>,
}

impl KeyPathMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an alias; returns false when it was already present.
    pub fn add_mapping(&mut self, table: TableKey, name: &str, alias: &str) -> bool {
        match self.mapping.entry((table, name.to_string())) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(alias.to_string());
                true
            }
        }
    }

    pub fn remove_mapping(&mut self, table: TableKey, name: &str) -> bool {
        self.mapping.remove(&(table, name.to_string())).is_some()
    }

    pub fn has_mapping(&self, table: TableKey, name: &str) -> bool {
        self.mapping.contains_key(&(table, name.to_string()))
    }

    /// Registers a table-name alias; refuses a self-alias.
    pub fn add_table_mapping(&mut self, real_name: &str, alias: &str) -> bool {
        if alias == real_name {
            return false;
        }
        match self.table_mapping.entry(alias.to_string()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(real_name.to_string());
                true
            }
        }
    }

    /// Resolves an identifier on `table`, following aliases up to the
    /// substitution bound.
    ///
    /// ## Error Conditions
    /// - `MappingError` when substitution exceeds the bound (alias loop)
    pub fn translate(&self, table: TableKey, name: &str) -> TroveResult<String> {
        let mut current = name.to_string();
        let mut substitutions = 0;
        while let Some(next) = self.mapping.get(&(table, current.clone())) {
            substitutions += 1;
            if substitutions > MAX_SUBSTITUTIONS {
                return Err(TroveError::MappingError {
                    alias: name.to_string(),
                });
            }
            current = next.clone();
        }
        Ok(current)
    }

    /// Resolves a table-name alias.
    pub fn translate_table_name(&self, name: &str) -> TroveResult<String> {
        let mut current = name.to_string();
        let mut substitutions = 0;
        while let Some(next) = self.table_mapping.get(&current) {
            substitutions += 1;
            if substitutions > MAX_SUBSTITUTIONS {
                return Err(TroveError::MappingError {
                    alias: name.to_string(),
                });
            }
            current = next.clone();
        }
        Ok(current)
    }
}
