// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Database options.
//!
//! Options cover tunables that do not affect the on-disk format: lock
//! acquisition timeout, index shape parameters and the initial file size.
//! They can be loaded from a TOML file or built in code via `Default`.

use crate::error::{TroveError, TroveResult};
use serde::Deserialize;
use std::path::Path;

/// Tunable database options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbOptions {
    /// Initial arena file size in bytes for freshly created databases.
    pub initial_file_size: u64,

    /// Seconds to wait for the writer lock before failing.
    pub lock_timeout_secs: u64,

    /// Radix index chunk width in bits. Valid range 4..=10.
    pub radix_chunk_width: u8,

    /// Entry count below which a radix subtree stays a flat sorted list.
    pub radix_compact_threshold: usize,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            initial_file_size: 1024 * 1024,
            lock_timeout_secs: 30,
            radix_chunk_width: 6,
            radix_compact_threshold: 100,
        }
    }
}

impl DbOptions {
    /// Loads options from a TOML file.
    ///
    /// ## Error Conditions
    /// - File unreadable (`IoError`)
    /// - Unparseable TOML or unknown keys (`ConfigError`)
    /// - Values outside their valid ranges (`ConfigError`)
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> TroveResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| TroveError::IoError {
            operation: "read_options".to_string(),
            reason: e.to_string(),
        })?;
        let opts: DbOptions = toml::from_str(&raw).map_err(|e| TroveError::ConfigError {
            reason: e.to_string(),
        })?;
        opts.validate()?;
        Ok(opts)
    }

    /// Validates value ranges.
    pub fn validate(&self) -> TroveResult<()> {
        if !(4..=10).contains(&self.radix_chunk_width) {
            return Err(TroveError::ConfigError {
                reason: format!(
                    "radix_chunk_width must be in 4..=10, got {}",
                    self.radix_chunk_width
                ),
            });
        }
        if self.initial_file_size < 4096 {
            return Err(TroveError::ConfigError {
                reason: "initial_file_size below 4096".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_valid() {
        assert!(DbOptions::default().validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trove.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "lock_timeout_secs = 5").unwrap();
        writeln!(f, "radix_chunk_width = 8").unwrap();
        drop(f);

        let opts = DbOptions::from_toml_file(&path).unwrap();
        assert_eq!(opts.lock_timeout_secs, 5);
        assert_eq!(opts.radix_chunk_width, 8);
        // untouched fields keep defaults
        assert_eq!(
            opts.initial_file_size,
            DbOptions::default().initial_file_size
        );
    }

    #[test]
    fn test_rejects_bad_width() {
        let opts = DbOptions {
            radix_chunk_width: 3,
            ..DbOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trove.toml");
        std::fs::write(&path, "no_such_option = true\n").unwrap();
        assert!(matches!(
            DbOptions::from_toml_file(&path),
            Err(TroveError::ConfigError { .. })
        ));
    }
}
