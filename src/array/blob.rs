// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Raw byte blobs for variable-length payloads.
//!
//! Strings, binaries and the fixed-width scalar encodings (timestamp,
//! uuid, object id, decimal, mixed) are stored as blobs: a standard array
//! header with 8-bit width followed by the raw bytes. A null cell is the
//! null ref; an empty string is a zero-length blob, keeping null and
//! empty distinct.

use super::{read_header, write_header, Header, HEADER_SIZE};
use crate::alloc::{Arena, Ref};
use crate::error::{TroveError, TroveResult};

/// Maximum blob payload in bytes, applied uniformly to strings and
/// binaries.
pub const MAX_BLOB_SIZE: usize = (1 << 24) - 1;

/// Allocates a blob holding `data`.
pub fn create(arena: &mut Arena, data: &[u8]) -> TroveResult<Ref> {
    debug_assert!(data.len() <= MAX_BLOB_SIZE);
    let cap_bytes = data.len().max(8);
    let r = arena.alloc(HEADER_SIZE + cap_bytes)?;
    write_header(
        arena,
        r,
        Header {
            flags: 0,
            width: 8,
            cap_bytes,
            size: data.len(),
        },
    );
    arena
        .bytes_mut(r + HEADER_SIZE as u64, data.len())
        .copy_from_slice(data);
    Ok(r)
}

/// Allocates a blob for a string payload, enforcing the size cap.
pub fn create_string(arena: &mut Arena, s: &str) -> TroveResult<Ref> {
    if s.len() > MAX_BLOB_SIZE {
        return Err(TroveError::StringTooBig { size: s.len() });
    }
    create(arena, s.as_bytes())
}

/// Allocates a blob for a binary payload, enforcing the size cap.
pub fn create_binary(arena: &mut Arena, data: &[u8]) -> TroveResult<Ref> {
    if data.len() > MAX_BLOB_SIZE {
        return Err(TroveError::BinaryTooBig { size: data.len() });
    }
    create(arena, data)
}

/// The blob's payload bytes.
pub fn data(arena: &Arena, r: Ref) -> &[u8] {
    let h = read_header(arena, r);
    arena.bytes(r + HEADER_SIZE as u64, h.size)
}

/// Payload interpreted as UTF-8 (stored verbatim, including NULs).
pub fn string(arena: &Arena, r: Ref) -> String {
    String::from_utf8_lossy(data(arena, r)).into_owned()
}

/// Frees the blob.
pub fn free(arena: &mut Arena, r: Ref) {
    if r == 0 {
        return;
    }
    let h = read_header(arena, r);
    arena.free(r, HEADER_SIZE + h.cap_bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbOptions;

    #[test]
    fn test_blob_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::open(dir.path().join("t.trove"), &DbOptions::default()).unwrap();
        let r = create(&mut arena, b"hello\0world").unwrap();
        assert_eq!(data(&arena, r), b"hello\0world");

        let empty = create(&mut arena, b"").unwrap();
        assert_eq!(data(&arena, empty), b"");
        assert_ne!(empty, 0);
    }

    #[test]
    fn test_size_caps() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = Arena::open(dir.path().join("t.trove"), &DbOptions::default()).unwrap();
        let big = "x".repeat(MAX_BLOB_SIZE + 1);
        assert!(matches!(
            create_string(&mut arena, &big),
            Err(TroveError::StringTooBig { .. })
        ));
    }
}
