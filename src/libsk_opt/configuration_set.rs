// Copyright 2022 Karl Sundequist Blomdahl <karl.sundequist.blomdahl@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::Backoff;

use crate::alloc::try_boxed_slice;
use crate::box_configuration::{words_for, BoxConfiguration};
use crate::error::OptimizerError;

// slot headers of the probe table; anything else is `dense index + 1`
const EMPTY: u32 = 0;
const RESERVED: u32 = u32::MAX;
const DISCARDED: u32 = u32::MAX - 1;

/// Largest capacity whose `index + 1` headers stay clear of the sentinels.
pub const MAX_CAPACITY: usize = (u32::MAX - 3) as usize;

/// Assigns every distinct box configuration a dense `u32` index in insertion
/// order. Open addressing with linear probing over a power-of-two table;
/// concurrent inserts race on a per-slot header that goes
/// `EMPTY -> RESERVED -> index + 1`, so readers of a published index always
/// observe the fully written configuration words. Indices are never re-used
/// and never move.
///
/// The capacity is fixed at construction. Once the set is full every further
/// insert of a *new* configuration returns `None`; lookups and inserts of
/// known configurations keep working.
pub struct BoxConfigurationSet {
    table: Box<[AtomicU32]>,
    mask: usize,
    words_per_cfg: usize,
    words: Box<[AtomicU64]>,
    next_index: AtomicU32,
    capacity: u32,
    full: AtomicBool
}

impl BoxConfigurationSet {
    /// Creates a set for up to `capacity` configurations of `bits` box
    /// positions each.
    ///
    /// # Arguments
    ///
    /// * `capacity` -
    /// * `bits` -
    ///
    pub fn new(capacity: usize, bits: usize) -> Result<BoxConfigurationSet, OptimizerError> {
        debug_assert!(capacity > 0 && capacity <= MAX_CAPACITY);

        let words_per_cfg = words_for(bits).max(1);
        let table_len = (2 * capacity).next_power_of_two().max(16);
        let table = try_boxed_slice(table_len, "configuration table", || AtomicU32::new(EMPTY))?;
        let words = try_boxed_slice(
            capacity * words_per_cfg,
            "configuration words",
            || AtomicU64::new(0)
        )?;

        Ok(BoxConfigurationSet {
            table,
            mask: table_len - 1,
            words_per_cfg,
            words,
            next_index: AtomicU32::new(0),
            capacity: capacity as u32,
            full: AtomicBool::new(false)
        })
    }

    /// Inserts a configuration and returns its dense index, or the existing
    /// index if it is already present. Returns `None` when the set is full.
    ///
    /// # Arguments
    ///
    /// * `cfg` -
    ///
    pub fn insert(&self, cfg: &BoxConfiguration) -> Option<u32> {
        let mut index = cfg.fold_hash() as usize & self.mask;
        let backoff = Backoff::new();

        loop {
            let header = self.table[index].load(Ordering::Acquire);

            if header == EMPTY {
                if self.full.load(Ordering::Relaxed) {
                    return None;
                }

                match self.table[index].compare_exchange(EMPTY, RESERVED, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        let assigned = self.next_index.fetch_add(1, Ordering::AcqRel);

                        if assigned >= self.capacity {
                            // leave a tombstone so concurrent probers do not
                            // wait on this slot forever
                            self.full.store(true, Ordering::Relaxed);
                            self.table[index].store(DISCARDED, Ordering::Release);

                            return None;
                        }

                        let base = assigned as usize * self.words_per_cfg;
                        for (i, &word) in cfg.words().iter().enumerate() {
                            self.words[base + i].store(word, Ordering::Relaxed);
                        }
                        self.table[index].store(assigned + 1, Ordering::Release);

                        return Some(assigned);
                    },
                    Err(_) => {
                        // somebody claimed the slot under us, re-examine it
                        continue;
                    }
                }
            } else if header == RESERVED {
                // a writer is publishing this slot, it may hold our
                // configuration
                backoff.snooze();
            } else if header == DISCARDED {
                index = (index + 1) & self.mask;
            } else if self.equals(header - 1, cfg) {
                return Some(header - 1);
            } else {
                index = (index + 1) & self.mask;
            }
        }
    }

    /// Returns the dense index of `cfg` if it has been inserted.
    ///
    /// # Arguments
    ///
    /// * `cfg` -
    ///
    pub fn index_of(&self, cfg: &BoxConfiguration) -> Option<u32> {
        let mut index = cfg.fold_hash() as usize & self.mask;
        let backoff = Backoff::new();

        loop {
            let header = self.table[index].load(Ordering::Acquire);

            if header == EMPTY {
                return None;
            } else if header == RESERVED {
                backoff.snooze();
            } else if header == DISCARDED {
                index = (index + 1) & self.mask;
            } else if self.equals(header - 1, cfg) {
                return Some(header - 1);
            } else {
                index = (index + 1) & self.mask;
            }
        }
    }

    /// True if the configuration at `index` has a box on position `b`.
    ///
    /// # Arguments
    ///
    /// * `index` -
    /// * `b` -
    ///
    pub fn has_box(&self, index: u32, b: u16) -> bool {
        let word = index as usize * self.words_per_cfg + b as usize / 64;

        self.words[word].load(Ordering::Relaxed) & (1u64 << (b % 64) as u32) != 0
    }

    /// Unpacks the configuration at `index` into `out`.
    ///
    /// # Arguments
    ///
    /// * `index` -
    /// * `out` -
    ///
    pub fn copy_into(&self, index: u32, out: &mut BoxConfiguration) {
        let base = index as usize * self.words_per_cfg;
        let words = out.words_mut();

        debug_assert_eq!(words.len(), self.words_per_cfg);
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.words[base + i].load(Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        (self.next_index.load(Ordering::Acquire).min(self.capacity)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Relaxed) || self.len() == self.capacity()
    }

    /// Releases the unused tail of the word storage. Called once between the
    /// generation and search phases, while no other thread holds the set.
    pub fn shrink_to_fit(&mut self) {
        let needed = self.len() * self.words_per_cfg;

        if needed < self.words.len() {
            let mut words = Vec::with_capacity(needed);

            for i in 0..needed {
                words.push(AtomicU64::new(self.words[i].load(Ordering::Relaxed)));
            }

            self.words = words.into_boxed_slice();
        }
    }

    fn equals(&self, index: u32, cfg: &BoxConfiguration) -> bool {
        let base = index as usize * self.words_per_cfg;

        cfg.words().iter()
            .enumerate()
            .all(|(i, &word)| self.words[base + i].load(Ordering::Relaxed) == word)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn configuration(bits: usize, boxes: &[u16]) -> BoxConfiguration {
        let mut cfg = BoxConfiguration::empty(bits);

        for &b in boxes {
            cfg.set(b);
        }

        cfg
    }

    #[test]
    fn assigns_indices_in_insertion_order() {
        let set = BoxConfigurationSet::new(8, 100).unwrap();

        assert_eq!(set.insert(&configuration(100, &[1, 2])), Some(0));
        assert_eq!(set.insert(&configuration(100, &[3, 4])), Some(1));
        assert_eq!(set.insert(&configuration(100, &[1, 2])), Some(0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn index_of_unknown_is_none() {
        let set = BoxConfigurationSet::new(8, 100).unwrap();

        set.insert(&configuration(100, &[1])).unwrap();
        assert_eq!(set.index_of(&configuration(100, &[1])), Some(0));
        assert_eq!(set.index_of(&configuration(100, &[2])), None);
    }

    #[test]
    fn full_set_rejects_new_configurations() {
        let set = BoxConfigurationSet::new(2, 64).unwrap();

        assert!(set.insert(&configuration(64, &[0])).is_some());
        assert!(set.insert(&configuration(64, &[1])).is_some());
        assert_eq!(set.insert(&configuration(64, &[2])), None);
        assert!(set.is_full());

        // known configurations still resolve
        assert_eq!(set.index_of(&configuration(64, &[1])), Some(1));
    }

    #[test]
    fn copy_into_round_trips() {
        let set = BoxConfigurationSet::new(4, 130).unwrap();
        let cfg = configuration(130, &[0, 64, 129]);
        let index = set.insert(&cfg).unwrap();

        let mut out = BoxConfiguration::empty(130);
        set.copy_into(index, &mut out);
        assert_eq!(out, cfg);
        assert!(set.has_box(index, 64));
        assert!(!set.has_box(index, 65));
    }

    #[test]
    fn concurrent_inserts_agree_on_indices() {
        let set = Arc::new(BoxConfigurationSet::new(512, 64).unwrap());
        let handles = (0..4).map(|t| {
            let set = set.clone();

            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(t);
                let mut seen = vec! [];

                for _ in 0..2000 {
                    let b = rng.gen_range(0..60u16);
                    let cfg = configuration(64, &[b, b + 1, 62]);
                    seen.push((cfg.clone(), set.insert(&cfg).unwrap()));
                }

                seen
            })
        }).collect::<Vec<_>>();

        let mut all = vec! [];
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        // the same configuration always resolved to the same index
        for (cfg, index) in &all {
            assert_eq!(set.index_of(cfg), Some(*index));
        }
        assert!(set.len() <= 60);
    }

    #[test]
    fn shrink_keeps_contents() {
        let mut set = BoxConfigurationSet::new(64, 100).unwrap();
        let cfg = configuration(100, &[7, 70]);
        let index = set.insert(&cfg).unwrap();

        set.shrink_to_fit();

        let mut out = BoxConfiguration::empty(100);
        set.copy_into(index, &mut out);
        assert_eq!(out, cfg);
        assert_eq!(set.index_of(&cfg), Some(index));
    }
}
