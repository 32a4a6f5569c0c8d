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

//! Fixed-capacity collection of slot metadata. Always accessed while the
//! cache-wide mutex is held by the caller. Linear scans throughout:
//! spec §4.3 calls this acceptable because `capacity` is expected to be
//! tens to low hundreds, the same tradeoff the teacher makes in
//! `utils::sb::FIFOPolicy::evict_cand`.

use crate::cache::slot::SlotMeta;
use std::path::Path;

pub(crate) struct SlotTable {
    slots: Vec<SlotMeta>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| SlotMeta::empty()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, idx: usize) -> &SlotMeta {
        &self.slots[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut SlotMeta {
        &mut self.slots[idx]
    }

    pub fn find(&self, name: &Path) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.occupied && s.name.as_deref() == Some(name))
    }

    pub fn first_empty(&self) -> Option<usize> {
        self.slots.iter().position(|s| !s.occupied)
    }

    pub fn first_evictable(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_evictable())
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn fresh_table_has_no_occupied_slots() {
        let t = SlotTable::new(4);
        assert_eq!(t.occupied_count(), 0);
        assert_eq!(t.first_empty(), Some(0));
        assert_eq!(t.first_evictable(), None);
    }

    #[test]
    fn find_matches_by_canonical_name_only_when_occupied() {
        let mut t = SlotTable::new(2);
        let name = PathBuf::from("/tmp/a");
        t.get_mut(0).name = Some(name.clone());
        assert_eq!(t.find(&name), None, "not occupied yet");
        t.get_mut(0).occupied = true;
        assert_eq!(t.find(&name), Some(0));
    }
}
