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

//! A pinning, bounded, write-back cache of fixed-size file buffers.
//!
//! Clients pin files by name, read or mutate the pinned buffer directly,
//! then unpin. An explicit [`Cache::evict`] reclaims slots that are
//! unpinned and clean; [`Cache::destroy`] flushes every dirty slot and
//! tears the cache down. See the crate's `SPEC_FULL.md` for the full
//! contract this module implements; in short, it is a translation of
//! the teacher's `utils::sb::SharedBuffer` generic buffer pool,
//! specialized to one fixed-size, always-resident value type and a
//! condvar-based waiter protocol instead of ad hoc spin-waiting.

mod error;
mod resolve;
mod slot;
mod table;
mod waiters;

pub use error::CacheError;

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use resolve::PathResolver;
use slot::SlotIo;
use std::fs::File;
use std::path::Path;
use table::SlotTable;
use waiters::WaiterQueue;

struct CacheInner {
    table: SlotTable,
    occupied_count: usize,
    waiters: WaiterQueue,
    shutting_down: bool,
}

/// The top-level cache object. Safe to share across threads behind a
/// plain `&Cache` (no `Arc<Mutex<..>>` wrapper needed by callers) the
/// same way the teacher's `SharedBuffer` is used with `&self` methods.
pub struct Cache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    cond: Condvar,
    io: Vec<Mutex<SlotIo>>,
}

/// Read-only view into a pinned file's buffer. Valid only as long as the
/// caller still holds a pin on the file — exactly spec §4.4.4's "valid
/// only while the caller's pin is held", expressed as a borrow instead
/// of a raw pointer.
pub struct FileDataGuard<'a>(MappedMutexGuard<'a, [u8]>);

impl<'a> std::ops::Deref for FileDataGuard<'a> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Mutable view into a pinned file's buffer. By the time this is handed
/// out, the slot has already been marked dirty (spec §4.4.5): dirty
/// stays set even if the caller never actually writes through the
/// guard, because the cache cannot tell the difference.
pub struct MutableFileDataGuard<'a>(MappedMutexGuard<'a, [u8]>);

impl<'a> std::ops::Deref for MutableFileDataGuard<'a> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> std::ops::DerefMut for MutableFileDataGuard<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

fn claim_empty(inner: &mut CacheInner, idx: usize, name: &Path) {
    let meta = inner.table.get_mut(idx);
    meta.occupied = true;
    meta.name = Some(name.to_path_buf());
    meta.pin_count = 1;
    meta.dirty = false;
    inner.occupied_count += 1;
}

fn claim_evictable(inner: &mut CacheInner, idx: usize, name: &Path) {
    let meta = inner.table.get_mut(idx);
    debug_assert!(meta.is_evictable());
    meta.name = Some(name.to_path_buf());
    meta.pin_count = 1;
    meta.dirty = false;
    // meta.occupied was already true: release-then-reclaim of the same
    // slot leaves occupied_count unchanged (spec §4.4.2 step 4).
}

fn rollback_claim(inner: &mut CacheInner, idx: usize) {
    let meta = inner.table.get_mut(idx);
    meta.occupied = false;
    meta.name = None;
    meta.pin_count = 0;
    meta.dirty = false;
    inner.occupied_count -= 1;
}

impl Cache {
    /// Allocates a cache with `capacity >= 1` slots, all unoccupied.
    pub fn construct(capacity: usize) -> anyhow::Result<Cache> {
        anyhow::ensure!(capacity >= 1, "cache capacity must be at least 1");
        let io = (0..capacity).map(|_| Mutex::new(SlotIo::empty())).collect();
        Ok(Cache {
            capacity,
            inner: Mutex::new(CacheInner {
                table: SlotTable::new(capacity),
                occupied_count: 0,
                waiters: WaiterQueue::new(),
                shutting_down: false,
            }),
            cond: Condvar::new(),
            io,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupied_count(&self) -> usize {
        self.inner.lock().occupied_count
    }

    /// Pins every file in `files`, in order. On error the prefix already
    /// pinned remains pinned — spec §7 makes this the caller's problem
    /// to unwind with `unpin`.
    pub fn pin(&self, files: &[&str]) -> anyhow::Result<()> {
        for file in files {
            self.pin_one(file)?;
        }
        Ok(())
    }

    fn try_bump_existing(&self, canon: &Path) -> bool {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.table.find(canon) {
            let meta = inner.table.get_mut(idx);
            meta.pin_count += 1;
            log::debug!("pin: {:?} already resident, pin_count={}", canon, meta.pin_count);
            return true;
        }
        false
    }

    fn pin_one(&self, raw_name: &str) -> anyhow::Result<()> {
        let canon = PathResolver::canonicalize(raw_name)?;
        if self.try_bump_existing(&canon) {
            return Ok(());
        }

        let file = PathResolver::ensure_exists(&canon)?;

        // Non-blocking attempt: an empty slot, or one we can reuse
        // outright because it is already evictable, same as the fast
        // path in the original `file_cache_pin_files`.
        {
            let mut inner = self.inner.lock();
            anyhow::ensure!(!inner.shutting_down, CacheError::ShuttingDown);
            if let Some(idx) = inner.table.find(&canon) {
                inner.table.get_mut(idx).pin_count += 1;
                return Ok(());
            }
            if let Some(idx) = inner.table.first_empty() {
                claim_empty(&mut inner, idx, &canon);
                drop(inner);
                return self.finish_load(idx, file, &canon);
            }
            if let Some(idx) = inner.table.first_evictable() {
                claim_evictable(&mut inner, idx, &canon);
                drop(inner);
                return self.finish_load(idx, file, &canon);
            }
        }

        // No room. Register as a waiter and block. From here on we only
        // claim a slot actually vacated by `evict`/`destroy` (or handed
        // back by another pin's failed load) — we do not reuse a merely
        // evictable slot ourselves while queued, so that an explicit
        // `evict()` racing a blocked `pin()` has a slot left to find
        // (spec §8 scenario 4). `unpin` reaching a clean pin count of
        // zero still wakes us; we just loop back to sleep if nothing is
        // truly empty yet.
        let mut ticket: Option<u64> = None;
        loop {
            let mut inner = self.inner.lock();

            if inner.shutting_down {
                if let Some(t) = ticket {
                    inner.waiters.remove(t);
                }
                anyhow::bail!(CacheError::ShuttingDown);
            }

            if let Some(idx) = inner.table.find(&canon) {
                inner.table.get_mut(idx).pin_count += 1;
                if let Some(t) = ticket {
                    inner.waiters.remove(t);
                }
                return Ok(());
            }

            let at_front = ticket.map_or(true, |t| inner.waiters.is_front(t));
            if at_front {
                if let Some(idx) = inner.table.first_empty() {
                    claim_empty(&mut inner, idx, &canon);
                    if let Some(t) = ticket {
                        inner.waiters.pop_front_expect(t);
                    }
                    drop(inner);
                    return self.finish_load(idx, file, &canon);
                }
            }

            if ticket.is_none() {
                let t = inner.waiters.enqueue();
                log::debug!("pin: {:?} waiting for a free slot (ticket {})", canon, t);
                ticket = Some(t);
            }
            self.cond.wait(&mut inner);
        }
    }

    fn finish_load(&self, idx: usize, file: File, canon: &Path) -> anyhow::Result<()> {
        let mut io = self.io[idx].lock();
        io.release();
        match io.load(file, canon) {
            Ok(()) => {
                log::debug!("pin: loaded {:?} into slot {}", canon, idx);
                Ok(())
            }
            Err(e) => {
                drop(io);
                {
                    let mut inner = self.inner.lock();
                    rollback_claim(&mut inner, idx);
                }
                self.cond.notify_all();
                Err(e)
            }
        }
    }

    /// Decrements the pin count of every named file that is currently
    /// pinned. Unknown files and files already at pin count zero are a
    /// no-op (spec §7 strengthens the original's undefined behavior to
    /// this).
    pub fn unpin(&self, files: &[&str]) {
        for file in files {
            self.unpin_one(file);
        }
    }

    fn unpin_one(&self, raw_name: &str) {
        let canon = match PathResolver::canonicalize(raw_name) {
            Ok(c) => c,
            Err(_) => return,
        };
        let became_evictable = {
            let mut inner = self.inner.lock();
            match inner.table.find(&canon) {
                Some(idx) => {
                    let meta = inner.table.get_mut(idx);
                    if meta.pin_count == 0 {
                        false
                    } else {
                        meta.pin_count -= 1;
                        log::debug!("unpin: {:?} pin_count={}", canon, meta.pin_count);
                        meta.pin_count == 0 && !meta.dirty
                    }
                }
                None => false,
            }
        };
        if became_evictable {
            // Conservative, not aggressive: we wake a waiter so it can
            // re-scan and claim this slot itself; we do not evict here.
            self.cond.notify_all();
        }
    }

    /// Read-only view of a pinned file's buffer.
    pub fn file_data(&self, name: &str) -> anyhow::Result<FileDataGuard<'_>> {
        let idx = self.pinned_slot(name)?;
        let guard = MutexGuard::map(self.io[idx].lock(), |io| &mut io.buffer[..]);
        Ok(FileDataGuard(guard))
    }

    /// Mutable view of a pinned file's buffer; marks the slot dirty.
    pub fn mutable_file_data(&self, name: &str) -> anyhow::Result<MutableFileDataGuard<'_>> {
        let canon = PathResolver::canonicalize(name)?;
        let idx = {
            let mut inner = self.inner.lock();
            match inner.table.find(&canon) {
                Some(idx) if inner.table.get(idx).pin_count > 0 => {
                    inner.table.get_mut(idx).dirty = true;
                    idx
                }
                _ => anyhow::bail!(CacheError::NotFound),
            }
        };
        let guard = MutexGuard::map(self.io[idx].lock(), |io| &mut io.buffer[..]);
        Ok(MutableFileDataGuard(guard))
    }

    fn pinned_slot(&self, name: &str) -> anyhow::Result<usize> {
        let canon = PathResolver::canonicalize(name)?;
        let inner = self.inner.lock();
        match inner.table.find(&canon) {
            Some(idx) if inner.table.get(idx).pin_count > 0 => Ok(idx),
            _ => anyhow::bail!(CacheError::NotFound),
        }
    }

    /// Single scan; releases every slot that is occupied, unpinned, and
    /// clean. Returns whether at least one slot was evicted.
    pub fn evict(&self) -> bool {
        let mut inner = self.inner.lock();
        let mut evicted_any = false;
        for idx in 0..inner.table.len() {
            if inner.table.get(idx).is_evictable() {
                self.io[idx].lock().release();
                let meta = inner.table.get_mut(idx);
                meta.occupied = false;
                meta.name = None;
                meta.dirty = false;
                meta.pin_count = 0;
                inner.occupied_count -= 1;
                evicted_any = true;
                log::debug!("evict: freed slot {}", idx);
            }
        }
        drop(inner);
        if evicted_any {
            self.cond.notify_all();
        }
        evicted_any
    }

    /// Flushes every dirty slot (best-effort; failures are logged, not
    /// propagated) and releases all resources. Idempotent: a second call
    /// is a no-op. Every waiting `pin` returns a [`CacheError::ShuttingDown`]
    /// error.
    pub fn destroy(&self) {
        let already_shutting_down = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.shutting_down, true)
        };
        if already_shutting_down {
            return;
        }
        self.cond.notify_all();

        for idx in 0..self.capacity {
            let needs_flush = {
                let inner = self.inner.lock();
                let meta = inner.table.get(idx);
                meta.occupied && meta.dirty
            };
            if needs_flush {
                let mut io = self.io[idx].lock();
                if let Err(e) = io.flush() {
                    log::warn!("destroy: failed to flush slot {}: {:#}", idx, e);
                }
            }
            {
                let mut inner = self.inner.lock();
                let meta = inner.table.get_mut(idx);
                if meta.occupied {
                    meta.occupied = false;
                    meta.dirty = false;
                    meta.name = None;
                    meta.pin_count = 0;
                    inner.occupied_count -= 1;
                }
            }
            self.io[idx].lock().release();
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn named(dir: &tempfile::TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    fn assert_invariants(cache: &Cache) {
        let inner = cache.inner.lock();
        assert!(inner.occupied_count <= cache.capacity);
        assert_eq!(inner.occupied_count, inner.table.occupied_count());
        let mut seen = std::collections::HashSet::new();
        for idx in 0..inner.table.len() {
            let meta = inner.table.get(idx);
            assert!(meta.pin_count == 0 || meta.occupied);
            assert!(!meta.dirty || meta.occupied);
            if meta.occupied {
                let name = meta.name.clone().unwrap();
                assert!(seen.insert(name), "duplicate name across occupied slots");
            } else {
                assert_eq!(meta.pin_count, 0);
                assert!(!meta.dirty);
                assert!(meta.name.is_none());
            }
        }
    }

    #[test]
    fn fresh_cache_has_no_occupied_slots() {
        let cache = Cache::construct(4).unwrap();
        assert_eq!(cache.occupied_count(), 0);
        assert_invariants(&cache);
    }

    #[test]
    fn scenario_basic_pin_unpin_evict() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (named(&dir, "a"), named(&dir, "b"), named(&dir, "c"));
        let cache = Cache::construct(4).unwrap();

        cache.pin(&[&a, &b, &c]).unwrap();
        assert_invariants(&cache);
        cache.unpin(&[&a, &b]);
        assert_invariants(&cache);
        assert!(cache.evict());
        assert_eq!(cache.occupied_count(), 1);
        assert!(cache.file_data(&c).is_ok());
        assert!(cache.file_data(&a).is_err());
        assert_invariants(&cache);
    }

    #[test]
    fn scenario_re_pin_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = named(&dir, "a");
        let cache = Cache::construct(4).unwrap();

        cache.pin(&[&a]).unwrap();
        cache.pin(&[&a]).unwrap();
        cache.unpin(&[&a]);
        assert!(!cache.evict(), "still pinned once");
        cache.unpin(&[&a]);
        assert!(cache.evict());
        assert_invariants(&cache);
    }

    #[test]
    fn scenario_dirty_survives_eviction_attempt_then_destroy_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let a = named(&dir, "a");
        let cache = Cache::construct(4).unwrap();

        cache.pin(&[&a]).unwrap();
        {
            let mut buf = cache.mutable_file_data(&a).unwrap();
            buf[0] = b'X';
        }
        cache.unpin(&[&a]);
        assert!(!cache.evict(), "dirty slots are not evictable");

        cache.destroy();
        let on_disk = std::fs::read(&a).unwrap();
        assert_eq!(on_disk[0], b'X');
        assert!(on_disk[1..].iter().all(|&b| b == b'0'));
    }

    #[test]
    fn scenario_destroy_flushes_only_the_dirty_file() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (named(&dir, "a"), named(&dir, "b"));
        let cache = Cache::construct(4).unwrap();

        cache.pin(&[&a, &b]).unwrap();
        {
            let mut buf = cache.mutable_file_data(&a).unwrap();
            buf[42] = b'Y';
        }
        cache.destroy();

        assert_eq!(std::fs::read(&a).unwrap()[42], b'Y');
        assert!(std::fs::read(&b).unwrap().iter().all(|&x| x == b'0'));
    }

    #[test]
    fn scenario_unknown_unpin_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let a = named(&dir, "a");
        let cache = Cache::construct(4).unwrap();

        cache.pin(&[&a]).unwrap();
        cache.unpin(&["/does/not/exist/zzz"]);
        assert_eq!(cache.inner.lock().table.get(0).pin_count, 1);
    }

    #[test]
    fn idempotent_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let a = named(&dir, "a");
        let cache = Cache::construct(2).unwrap();
        cache.pin(&[&a]).unwrap();
        cache.unpin(&[&a]);
        assert!(cache.evict());
        assert!(!cache.evict(), "nothing left to evict the second time");
    }

    #[test]
    fn write_read_round_trip_without_intervening_evict() {
        let dir = tempfile::tempdir().unwrap();
        let a = named(&dir, "a");
        let cache = Cache::construct(2).unwrap();

        cache.pin(&[&a]).unwrap();
        {
            let mut buf = cache.mutable_file_data(&a).unwrap();
            buf[..5].copy_from_slice(b"hello");
        }
        cache.unpin(&[&a]);
        cache.pin(&[&a]).unwrap();
        assert_eq!(&cache.file_data(&a).unwrap()[..5], b"hello");
    }

    #[test]
    fn blocking_pin_is_granted_once_a_slot_is_freed() {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let (a, b, c) = (named(&dir, "a"), named(&dir, "b"), named(&dir, "c"));
        let cache = Arc::new(Cache::construct(2).unwrap());

        cache.pin(&[&a, &b]).unwrap();

        let t2_cache = cache.clone();
        let t2_c = c.clone();
        let t2 = thread::spawn(move || {
            t2_cache.pin(&[&t2_c]).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        cache.unpin(&[&a]);
        assert!(cache.evict());

        t2.join().unwrap();
        assert!(cache.file_data(&c).is_ok());
        assert!(cache.file_data(&a).is_err());
        assert_eq!(cache.occupied_count(), 2);
    }

    #[test]
    fn destroy_wakes_every_blocked_waiter_with_a_shutdown_error() {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let cache = Arc::new(Cache::construct(1).unwrap());
        let a = named(&dir, "a");
        cache.pin(&[&a]).unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let cache = cache.clone();
            let name = named(&dir, &format!("blocked{}", i));
            handles.push(thread::spawn(move || cache.pin(&[&name])));
        }
        thread::sleep(Duration::from_millis(50));
        cache.destroy();

        for h in handles {
            assert!(h.join().unwrap().is_err());
        }
    }

    #[test]
    fn concurrent_pins_of_the_same_file_sum_without_loss() {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let a = Arc::new(named(&dir, "a"));
        let cache = Arc::new(Cache::construct(4).unwrap());
        cache.pin(&[&a]).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let a = a.clone();
            handles.push(thread::spawn(move || cache.pin(&[&a]).unwrap()));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.inner.lock().table.get(0).pin_count, 9);
    }
}
