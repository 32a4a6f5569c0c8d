// Copyright 2020 <盏一 w@hidva.com>
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! One cache row, split into the two halves the locking discipline in
//! spec §5 actually needs: `SlotMeta` (name/pin_count/dirty/occupied),
//! mutated only while the cache-wide mutex is held, and `SlotIo`
//! (buffer + open descriptor), mutated only while the slot's own mutex
//! is held. Unlike `utils::sb::Slot` in the teacher, which keeps both
//! halves in one struct behind one `RwLock` and reaches for raw pointers
//! (`SharedBuffer::p2r`) to let I/O run with the table unlocked, this
//! cache has a fixed-size table that is never reallocated, so the two
//! halves can simply live in two index-aligned, separately-locked `Vec`s
//! with no unsafe code — see DESIGN.md.

use crate::cache::error::CacheError;
use crate::FILE_SIZE;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub(crate) struct SlotMeta {
    pub name: Option<PathBuf>,
    pub pin_count: u32,
    pub dirty: bool,
    pub occupied: bool,
}

impl SlotMeta {
    pub fn empty() -> Self {
        Self {
            name: None,
            pin_count: 0,
            dirty: false,
            occupied: false,
        }
    }

    /// Invariant 5: occupied, unpinned, and clean.
    pub fn is_evictable(&self) -> bool {
        self.occupied && self.pin_count == 0 && !self.dirty
    }
}

pub(crate) struct SlotIo {
    pub buffer: Box<[u8]>,
    file: Option<File>,
}

impl SlotIo {
    pub fn empty() -> Self {
        Self {
            buffer: vec![0u8; FILE_SIZE].into_boxed_slice(),
            file: None,
        }
    }

    /// Reads exactly `FILE_SIZE` bytes from `file` into the buffer.
    /// Precondition: the slot has already been marked unoccupied by the
    /// caller (release() or a fresh empty slot), so no pin references
    /// the old contents.
    pub fn load(&mut self, mut file: File, name: &Path) -> anyhow::Result<()> {
        file.seek(SeekFrom::Start(0))
            .map_err(CacheError::Canonicalize)?;
        if let Err(e) = file.read_exact(&mut self.buffer) {
            log::warn!("short read loading {:?}: {}", name, e);
            return Err(CacheError::ShortRead.into());
        }
        self.file = Some(file);
        Ok(())
    }

    /// Writes the full buffer back to the backing file at offset 0.
    /// Idempotent on a slot with no open descriptor (nothing to do).
    pub fn flush(&mut self) -> anyhow::Result<()> {
        let file = match self.file.as_mut() {
            Some(f) => f,
            None => return Ok(()),
        };
        file.seek(SeekFrom::Start(0))
            .map_err(CacheError::Canonicalize)?;
        if let Err(e) = file.write_all(&self.buffer) {
            log::warn!("short write flushing buffer: {}", e);
            return Err(CacheError::ShortWrite.into());
        }
        Ok(())
    }

    /// Drops the open descriptor. The buffer itself is left as-is; it is
    /// reserved for the cache's whole lifetime and gets overwritten by
    /// the next `load`.
    pub fn release(&mut self) {
        self.file = None;
    }
}
