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

use std::sync::atomic::{AtomicU32, Ordering};

use crate::alloc::try_boxed_slice;
use crate::error::OptimizerError;

const EMPTY_SLOT: u32 = u32::MAX;
const PROCESSED_BIT: u32 = 1 << 30;
const ORDER_MASK: u32 = PROCESSED_BIT - 1;

/// Largest packable order value (30 bits).
pub const MAX_ORDER_VALUE: u32 = ORDER_MASK - 1;

/// The two halves of the bidirectional search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchDirection {
    Forward = 0,
    Backward = 1
}

impl SearchDirection {
    pub fn opposite(self) -> SearchDirection {
        match self {
            SearchDirection::Forward => SearchDirection::Backward,
            SearchDirection::Backward => SearchDirection::Forward
        }
    }
}

/// Result of [`BoardPositionStorage::add_if_better`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// The metrics improved (or claimed an empty slot); the slot should be
    /// enqueued for expansion.
    Better(u64),
    /// As `Better`, but the opposite search direction has already stored
    /// metrics for the same board position: a solution candidate.
    Rendezvous(u64),
    /// An equal or better entry was already present.
    NotBetter
}

/// Best-known metrics for every board position `(box configuration, player
/// position, axis plane)`, one `u32` slot per active search direction.
///
/// Slot encoding: all-ones means empty; otherwise bit 30 is the *processed*
/// flag and bits 29..0 hold the packed order value
/// `primary * secondary_max + secondary`, so lexicographic comparison of
/// `(primary, secondary)` is plain integer comparison. The CAS upgrade loop
/// keeps the stored value the minimum over all insert attempts, and a write
/// always clears the processed flag so the slot is expanded again on its
/// improved metrics.
pub struct BoardPositionStorage {
    planes: [Option<Box<[AtomicU32]>>; 2],
    player_count: u64,
    axis_planes: u64,
    secondary_max: u32
}

impl BoardPositionStorage {
    /// Allocates storage for `configurations * player_count * axis_planes`
    /// slots per direction.
    ///
    /// # Arguments
    ///
    /// * `configurations` -
    /// * `player_count` -
    /// * `axis_planes` - 1, or 2 when the objective distinguishes the axis
    ///   of the last push
    /// * `secondary_max` - exclusive upper bound of the secondary metric
    /// * `bidirectional` - whether a backward plane is needed
    ///
    pub fn new(
        configurations: usize,
        player_count: usize,
        axis_planes: usize,
        secondary_max: u32,
        bidirectional: bool
    ) -> Result<BoardPositionStorage, OptimizerError>
    {
        debug_assert!(axis_planes == 1 || axis_planes == 2);
        debug_assert!(secondary_max > 0);

        let slots = configurations * player_count * axis_planes;
        let forward = try_boxed_slice(slots, "forward board positions", || AtomicU32::new(EMPTY_SLOT))?;
        let backward = if bidirectional {
            Some(try_boxed_slice(slots, "backward board positions", || AtomicU32::new(EMPTY_SLOT))?)
        } else {
            None
        };

        Ok(BoardPositionStorage {
            planes: [Some(forward), backward],
            player_count: player_count as u64,
            axis_planes: axis_planes as u64,
            secondary_max
        })
    }

    pub fn secondary_max(&self) -> u32 {
        self.secondary_max
    }

    pub fn is_bidirectional(&self) -> bool {
        self.planes[1].is_some()
    }

    /// Packs `(primary, secondary)` into an order value, or `None` if the
    /// pair exceeds the 30-bit budget.
    ///
    /// # Arguments
    ///
    /// * `primary` -
    /// * `secondary` -
    ///
    pub fn order_value(&self, primary: u32, secondary: u32) -> Option<u32> {
        if secondary >= self.secondary_max {
            return None;
        }

        let packed = primary as u64 * self.secondary_max as u64 + secondary as u64;

        if packed > MAX_ORDER_VALUE as u64 {
            None
        } else {
            Some(packed as u32)
        }
    }

    pub fn split_order(&self, order: u32) -> (u32, u32) {
        (order / self.secondary_max, order % self.secondary_max)
    }

    /// The flat slot index of a board position.
    ///
    /// # Arguments
    ///
    /// * `cfg` -
    /// * `player` -
    /// * `plane` -
    ///
    pub fn slot(&self, cfg: u32, player: u16, plane: usize) -> u64 {
        (cfg as u64 * self.player_count + player as u64) * self.axis_planes + plane as u64
    }

    pub fn unpack_slot(&self, slot: u64) -> (u32, u16, usize) {
        let plane = (slot % self.axis_planes) as usize;
        let rest = slot / self.axis_planes;

        ((rest / self.player_count) as u32, (rest % self.player_count) as u16, plane)
    }

    /// Stores `order` for the slot if it improves on the present value of
    /// the same search direction. Reports a rendezvous when the opposite
    /// direction has already stored metrics for this board position.
    ///
    /// # Arguments
    ///
    /// * `direction` -
    /// * `slot` -
    /// * `order` -
    ///
    pub fn add_if_better(&self, direction: SearchDirection, slot: u64, order: u32) -> AddOutcome {
        debug_assert!(order <= MAX_ORDER_VALUE);

        let cell = &self.plane(direction)[slot as usize];
        let mut current = cell.load(Ordering::Acquire);

        loop {
            if current != EMPTY_SLOT && current & ORDER_MASK <= order {
                return AddOutcome::NotBetter;
            }

            // the plain `order` also clears the processed flag
            match cell.compare_exchange_weak(current, order, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual
            }
        }

        match self.plane_opt(direction.opposite()) {
            Some(plane) if plane[slot as usize].load(Ordering::Acquire) != EMPTY_SLOT => {
                AddOutcome::Rendezvous(slot)
            },
            _ => AddOutcome::Better(slot)
        }
    }

    /// Claims the slot for expansion. Returns the `(primary, secondary)` the
    /// worker must expand on, or `None` if the slot has already been
    /// processed on its current metrics (a stale queue entry).
    ///
    /// # Arguments
    ///
    /// * `direction` -
    /// * `slot` -
    ///
    pub fn mark_processed(&self, direction: SearchDirection, slot: u64) -> Option<(u32, u32)> {
        let cell = &self.plane(direction)[slot as usize];
        let mut current = cell.load(Ordering::Acquire);

        loop {
            if current == EMPTY_SLOT || current & PROCESSED_BIT != 0 {
                return None;
            }

            match cell.compare_exchange_weak(current, current | PROCESSED_BIT, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(self.split_order(current & ORDER_MASK)),
                Err(actual) => current = actual
            }
        }
    }

    /// True if the slot currently carries the processed flag. Queue entries
    /// pointing at processed slots are skipped without expansion.
    ///
    /// # Arguments
    ///
    /// * `direction` -
    /// * `slot` -
    ///
    pub fn is_processed(&self, direction: SearchDirection, slot: u64) -> bool {
        let value = self.plane(direction)[slot as usize].load(Ordering::Acquire);

        value != EMPTY_SLOT && value & PROCESSED_BIT != 0
    }

    /// The stored `(primary, secondary)` of the slot, if any.
    ///
    /// # Arguments
    ///
    /// * `direction` -
    /// * `slot` -
    ///
    pub fn get(&self, direction: SearchDirection, slot: u64) -> Option<(u32, u32)> {
        match self.plane_opt(direction) {
            None => None,
            Some(plane) => {
                let value = plane[slot as usize].load(Ordering::Acquire);

                if value == EMPTY_SLOT {
                    None
                } else {
                    Some(self.split_order(value & ORDER_MASK))
                }
            }
        }
    }

    fn plane(&self, direction: SearchDirection) -> &[AtomicU32] {
        self.plane_opt(direction).expect("no storage plane for this search direction")
    }

    fn plane_opt(&self, direction: SearchDirection) -> Option<&Box<[AtomicU32]>> {
        self.planes[direction as usize].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn storage(secondary_max: u32, bidirectional: bool) -> BoardPositionStorage {
        BoardPositionStorage::new(16, 10, 1, secondary_max, bidirectional).unwrap()
    }

    #[test]
    fn order_value_is_lexicographic() {
        let storage = storage(100, false);

        let a = storage.order_value(2, 30).unwrap();
        let b = storage.order_value(3, 0).unwrap();
        let c = storage.order_value(3, 1).unwrap();

        assert!(a < b && b < c);
        assert_eq!(storage.split_order(a), (2, 30));
        assert_eq!(storage.order_value(1, 100), None);
    }

    #[test]
    fn order_value_respects_budget() {
        let storage = storage(1 << 20, false);

        assert_eq!(storage.order_value(1 << 11, 0), None);
        assert!(storage.order_value(1023, 17).is_some());
    }

    #[test]
    fn slot_round_trip() {
        let storage = BoardPositionStorage::new(16, 10, 2, 8, false).unwrap();

        for cfg in [0u32, 3, 15] {
            for player in [0u16, 4, 9] {
                for plane in [0usize, 1] {
                    let slot = storage.slot(cfg, player, plane);

                    assert_eq!(storage.unpack_slot(slot), (cfg, player, plane));
                }
            }
        }
    }

    #[test]
    fn add_if_better_upgrades_only_downwards() {
        let storage = storage(100, false);
        let slot = storage.slot(1, 2, 0);

        let first = storage.order_value(5, 10).unwrap();
        assert_eq!(storage.add_if_better(SearchDirection::Forward, slot, first), AddOutcome::Better(slot));

        // worse and equal are rejected
        let worse = storage.order_value(5, 11).unwrap();
        assert_eq!(storage.add_if_better(SearchDirection::Forward, slot, worse), AddOutcome::NotBetter);
        assert_eq!(storage.add_if_better(SearchDirection::Forward, slot, first), AddOutcome::NotBetter);

        let better = storage.order_value(5, 9).unwrap();
        assert_eq!(storage.add_if_better(SearchDirection::Forward, slot, better), AddOutcome::Better(slot));
        assert_eq!(storage.get(SearchDirection::Forward, slot), Some((5, 9)));
    }

    #[test]
    fn processed_flag_lifecycle() {
        let storage = storage(100, false);
        let slot = storage.slot(0, 0, 0);
        let order = storage.order_value(1, 1).unwrap();

        storage.add_if_better(SearchDirection::Forward, slot, order);
        assert!(!storage.is_processed(SearchDirection::Forward, slot));
        assert_eq!(storage.mark_processed(SearchDirection::Forward, slot), Some((1, 1)));
        assert!(storage.is_processed(SearchDirection::Forward, slot));

        // a second claim of the same metrics fails
        assert_eq!(storage.mark_processed(SearchDirection::Forward, slot), None);

        // a better write clears the flag, so the slot is expandable again
        let better = storage.order_value(1, 0).unwrap();
        assert_eq!(storage.add_if_better(SearchDirection::Forward, slot, better), AddOutcome::Better(slot));
        assert!(!storage.is_processed(SearchDirection::Forward, slot));
        assert_eq!(storage.mark_processed(SearchDirection::Forward, slot), Some((1, 0)));
    }

    #[test]
    fn opposite_direction_signals_rendezvous() {
        let storage = storage(100, true);
        let slot = storage.slot(7, 3, 0);
        let forward = storage.order_value(4, 4).unwrap();
        let backward = storage.order_value(2, 2).unwrap();

        assert_eq!(storage.add_if_better(SearchDirection::Forward, slot, forward), AddOutcome::Better(slot));
        assert_eq!(
            storage.add_if_better(SearchDirection::Backward, slot, backward),
            AddOutcome::Rendezvous(slot)
        );

        // both markers stay readable in their own planes
        assert_eq!(storage.get(SearchDirection::Forward, slot), Some((4, 4)));
        assert_eq!(storage.get(SearchDirection::Backward, slot), Some((2, 2)));
    }

    #[test]
    fn concurrent_writers_keep_the_minimum() {
        let storage = Arc::new(storage(1000, false));
        let slot = storage.slot(0, 0, 0);

        let handles = (0..4).map(|t| {
            let storage = storage.clone();

            thread::spawn(move || {
                for i in (0..250u32).rev() {
                    let order = storage.order_value(1, 4 * i + t).unwrap();
                    storage.add_if_better(SearchDirection::Forward, slot, order);
                }
            })
        }).collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.get(SearchDirection::Forward, slot), Some((1, 0)));
    }
}
