// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Arena allocator over a single memory-mapped file.
//!
//! Every structured object in the database lives at a `Ref`: a 63-bit,
//! non-negative, even byte offset into the mapped file. Zero is the null
//! ref. Allocation is bump-from-the-tail with a free list; freed refs are
//! never reused before the next commit, so concurrent readers of the
//! previous snapshot never observe recycled memory.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ 0..4    magic "T-DB"                          │
//! │ 4       file-format version                   │
//! │ 5       flags (bit 0 = active top-ref slot)   │
//! │ 6..8    reserved                              │
//! │ 8..16   top-ref slot 0 (LE)                   │
//! │ 16..24  top-ref slot 1 (LE)                   │
//! │ 24..32  logical end of allocated space (LE)   │
//! │ 32..40  free-list blob ref (LE)               │
//! │ 40..44  crc32 of bytes 0..40                  │
//! │ 48..    allocation space                      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Commit writes the new top-ref into the inactive slot, persists the free
//! list, then flips the active-slot flag. Readers attached to the old
//! top-ref keep a consistent view of the untouched portion of the arena.

use crate::config::DbOptions;
use crate::error::{TroveError, TroveResult};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// On-disk pointer into the arena. Always even; 0 is null.
pub type Ref = u64;

const MAGIC: &[u8; 4] = b"T-DB";
const FORMAT_VERSION: u8 = 1;
const HEADER_SIZE: u64 = 48;
const GROW_CHUNK: u64 = 1024 * 1024;

/// Arena over a memory-mapped database file.
pub struct Arena {
    file: File,
    mmap: MmapMut,
    /// Allocation watermark (bytes).
    end: u64,
    /// Refs freed in earlier commits, reusable now.
    free_ready: Vec<(Ref, u32)>,
    /// Refs freed in the current write, reusable after commit.
    free_pending: Vec<(Ref, u32)>,
    /// Persisted free-list blob from the last commit (recycled next commit).
    freelist_blob: Option<(Ref, u32)>,
    /// Snapshot for rollback.
    committed_end: u64,
    committed_free: Vec<(Ref, u32)>,
}

impl Arena {
    /// Opens or creates the arena file.
    ///
    /// ## Error Conditions
    /// - I/O failure opening or mapping the file
    /// - Bad magic or checksum mismatch (`Corrupted`)
    pub fn open<P: AsRef<Path>>(path: P, opts: &DbOptions) -> TroveResult<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| TroveError::IoError {
                operation: "open_arena".to_string(),
                reason: e.to_string(),
            })?;

        if is_new {
            file.set_len(opts.initial_file_size.max(HEADER_SIZE))
                .map_err(|e| TroveError::IoError {
                    operation: "set_arena_size".to_string(),
                    reason: e.to_string(),
                })?;
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| TroveError::IoError {
                operation: "mmap_arena".to_string(),
                reason: e.to_string(),
            })?
        };

        let mut arena = Self {
            file,
            mmap,
            end: HEADER_SIZE,
            free_ready: Vec::new(),
            free_pending: Vec::new(),
            freelist_blob: None,
            committed_end: HEADER_SIZE,
            committed_free: Vec::new(),
        };

        if is_new {
            arena.initialise()?;
        } else {
            arena.load()?;
        }

        Ok(arena)
    }

    /// Writes a fresh header with both top-ref slots null.
    fn initialise(&mut self) -> TroveResult<()> {
        self.mmap[0..4].copy_from_slice(MAGIC);
        self.mmap[4] = FORMAT_VERSION;
        self.mmap[5] = 0;
        self.mmap[6..8].fill(0);
        self.mmap[8..16].copy_from_slice(&0u64.to_le_bytes());
        self.mmap[16..24].copy_from_slice(&0u64.to_le_bytes());
        self.mmap[24..32].copy_from_slice(&HEADER_SIZE.to_le_bytes());
        self.mmap[32..40].copy_from_slice(&0u64.to_le_bytes());
        self.write_header_crc();
        self.flush()?;
        Ok(())
    }

    /// Validates the header and restores the watermark and free list.
    fn load(&mut self) -> TroveResult<()> {
        if self.mmap.len() < HEADER_SIZE as usize {
            return Err(TroveError::Corrupted {
                reason: "file shorter than header".to_string(),
            });
        }
        if &self.mmap[0..4] != MAGIC {
            return Err(TroveError::Corrupted {
                reason: "bad magic".to_string(),
            });
        }
        if self.mmap[4] != FORMAT_VERSION {
            return Err(TroveError::Corrupted {
                reason: format!("unsupported file-format version {}", self.mmap[4]),
            });
        }
        let stored = u32::from_le_bytes(self.mmap[40..44].try_into().unwrap());
        let computed = crc32fast::hash(&self.mmap[0..40]);
        if stored != computed {
            return Err(TroveError::Corrupted {
                reason: "header checksum mismatch".to_string(),
            });
        }

        self.end = u64::from_le_bytes(self.mmap[24..32].try_into().unwrap());
        if self.end < HEADER_SIZE || self.end > self.mmap.len() as u64 {
            return Err(TroveError::Corrupted {
                reason: format!("invalid logical end {}", self.end),
            });
        }
        self.committed_end = self.end;

        let freelist_ref = u64::from_le_bytes(self.mmap[32..40].try_into().unwrap());
        if freelist_ref != 0 {
            self.read_freelist(freelist_ref)?;
        }
        self.committed_free = self.free_ready.clone();
        Ok(())
    }

    fn read_freelist(&mut self, r: Ref) -> TroveResult<()> {
        let count_bytes = self.checked_bytes(r, 8)?;
        let count = u64::from_le_bytes(count_bytes.try_into().unwrap()) as usize;
        let body_len = 8 + count * 12;
        let body = self.checked_bytes(r, body_len)?.to_vec();
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = 8 + i * 12;
            let er = u64::from_le_bytes(body[off..off + 8].try_into().unwrap());
            let sz = u32::from_le_bytes(body[off + 8..off + 12].try_into().unwrap());
            entries.push((er, sz));
        }
        self.free_ready = entries;
        self.freelist_blob = Some((r, body_len as u32));
        Ok(())
    }

    fn checked_bytes(&self, r: Ref, len: usize) -> TroveResult<&[u8]> {
        let start = r as usize;
        if r < HEADER_SIZE || r % 8 != 0 || start + len > self.mmap.len() {
            return Err(TroveError::Corrupted {
                reason: format!("invalid ref {}", r),
            });
        }
        Ok(&self.mmap[start..start + len])
    }

    /// Currently active top-ref (0 when the group is empty).
    pub fn top_ref(&self) -> Ref {
        let slot = if self.mmap[5] & 1 == 0 { 8 } else { 16 };
        u64::from_le_bytes(self.mmap[slot..slot + 8].try_into().unwrap())
    }

    /// Allocates `size` bytes, 8-byte aligned. The returned ref is even.
    pub fn alloc(&mut self, size: usize) -> TroveResult<Ref> {
        let needed = (size.max(8) as u64 + 7) & !7;

        // First fit from retired refs.
        for i in 0..self.free_ready.len() {
            let (r, sz) = self.free_ready[i];
            if sz as u64 >= needed {
                self.free_ready.swap_remove(i);
                let excess = sz as u64 - needed;
                if excess >= 16 {
                    self.free_ready.push((r + needed, excess as u32));
                }
                return Ok(r);
            }
        }

        self.bump_alloc(needed)
    }

    fn bump_alloc(&mut self, needed: u64) -> TroveResult<Ref> {
        let r = self.end;
        let new_end = r + needed;
        if new_end > self.mmap.len() as u64 {
            self.grow(new_end)?;
        }
        self.end = new_end;
        Ok(r)
    }

    fn grow(&mut self, required: u64) -> TroveResult<()> {
        let new_size = (required + GROW_CHUNK - 1) / GROW_CHUNK * GROW_CHUNK;
        self.file
            .set_len(new_size)
            .map_err(|e| TroveError::IoError {
                operation: "grow_arena".to_string(),
                reason: e.to_string(),
            })?;
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).map_err(|e| TroveError::IoError {
                operation: "remap_arena".to_string(),
                reason: e.to_string(),
            })?
        };
        Ok(())
    }

    /// Records a ref as free. Reuse happens only after the next commit.
    pub fn free(&mut self, r: Ref, size: usize) {
        if r == 0 {
            return;
        }
        let rounded = ((size.max(8) + 7) & !7) as u32;
        self.free_pending.push((r, rounded));
    }

    /// Read access to `len` bytes at `r`.
    pub fn bytes(&self, r: Ref, len: usize) -> &[u8] {
        let start = r as usize;
        &self.mmap[start..start + len]
    }

    /// Write access to `len` bytes at `r`.
    pub fn bytes_mut(&mut self, r: Ref, len: usize) -> &mut [u8] {
        let start = r as usize;
        &mut self.mmap[start..start + len]
    }

    /// Publishes `top` as the new database state.
    ///
    /// Writes the free list, flushes all data, stores the top-ref in the
    /// inactive slot and flips the active flag. Pending frees become
    /// reusable.
    pub fn commit(&mut self, top: Ref) -> TroveResult<()> {
        // Merge pending frees and the previous free-list blob, then
        // persist the merged list with a bump-only allocation so the list
        // does not change underneath the serialization.
        let mut merged = std::mem::take(&mut self.free_ready);
        merged.append(&mut self.free_pending);
        if let Some((r, sz)) = self.freelist_blob.take() {
            merged.push((r, sz));
        }

        let mut freelist_ref = 0u64;
        if !merged.is_empty() {
            let body_len = 8 + merged.len() * 12;
            let blob = self.bump_alloc(((body_len as u64) + 7) & !7)?;
            let mut buf = Vec::with_capacity(body_len);
            buf.extend_from_slice(&(merged.len() as u64).to_le_bytes());
            for (r, sz) in &merged {
                buf.extend_from_slice(&r.to_le_bytes());
                buf.extend_from_slice(&sz.to_le_bytes());
            }
            self.bytes_mut(blob, body_len).copy_from_slice(&buf);
            self.freelist_blob = Some((blob, body_len as u32));
            freelist_ref = blob;
        }
        self.free_ready = merged;

        self.flush()?;

        let inactive = if self.mmap[5] & 1 == 0 { 16 } else { 8 };
        self.mmap[inactive..inactive + 8].copy_from_slice(&top.to_le_bytes());
        self.mmap[5] ^= 1;
        self.mmap[24..32].copy_from_slice(&self.end.to_le_bytes());
        self.mmap[32..40].copy_from_slice(&freelist_ref.to_le_bytes());
        self.write_header_crc();
        self.flush()?;

        self.committed_end = self.end;
        self.committed_free = self.free_ready.clone();
        Ok(())
    }

    /// Discards all allocation activity since the last commit.
    pub fn rollback(&mut self) {
        self.end = self.committed_end;
        self.free_ready = self.committed_free.clone();
        self.free_pending.clear();
    }

    fn write_header_crc(&mut self) {
        let crc = crc32fast::hash(&self.mmap[0..40]);
        self.mmap[40..44].copy_from_slice(&crc.to_le_bytes());
    }

    fn flush(&mut self) -> TroveResult<()> {
        self.mmap.flush().map_err(|e| TroveError::IoError {
            operation: "flush_arena".to_string(),
            reason: e.to_string(),
        })
    }
}
