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

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::unbounded;
use crossbeam_utils::thread;
use tracing::debug;

use sk_board::{Direction, Geometry, NONE};

use crate::box_configuration::BoxConfiguration;
use crate::configuration_set::BoxConfigurationSet;
use crate::deadlock::DeadlockOracle;
use crate::status::StatusFlag;

/// What the generation phase achieved.
#[derive(Clone, Copy, Debug)]
pub struct GenerationOutcome {
    /// Number of distinct configurations in the set afterwards.
    pub generated: usize,
    /// False when the configuration set filled up (or the run was stopped)
    /// before the vicinity was exhausted; the search then runs on the
    /// truncated universe.
    pub complete: bool
}

/// Precomputed box-reachability horizon: for every box position the
/// positions a box could be relocated to, in increasing BFS distance, with a
/// per-depth cut so a budget of `k` moves maps to a prefix of the list.
pub struct VicinityTable {
    destinations: Vec<Vec<u16>>,
    within_depth: Vec<Vec<usize>>
}

impl VicinityTable {
    /// Builds the horizon up to `max_depth` box moves.
    ///
    /// # Arguments
    ///
    /// * `geometry` -
    /// * `max_depth` -
    /// * `relevant` - box positions relocation may use; `None` allows all
    ///
    pub fn new(geometry: &Geometry, max_depth: usize, relevant: Option<&[bool]>) -> VicinityTable {
        let num_boxes = geometry.box_count();
        let mut destinations = Vec::with_capacity(num_boxes);
        let mut within_depth = Vec::with_capacity(num_boxes);
        let mut distance = vec! [usize::MAX; num_boxes];

        for origin in 0..num_boxes as u16 {
            let mut reached = vec! [];
            let mut cuts = vec! [0; max_depth + 1];

            distance[origin as usize] = 0;
            reached.push(origin);

            let mut head = 0;
            while head < reached.len() {
                let current = reached[head];
                head += 1;

                if distance[current as usize] >= max_depth {
                    continue;
                }

                for dir in Direction::ALL {
                    let next = geometry.box_neighbor(current, dir);
                    let allowed = next != NONE
                        && distance[next as usize] == usize::MAX
                        && relevant.map(|r| r[next as usize]).unwrap_or(true);

                    if allowed {
                        distance[next as usize] = distance[current as usize] + 1;
                        reached.push(next);
                    }
                }
            }

            // drop the origin itself; staying put is "not choosing this box"
            let moved = reached[1..].to_vec();
            for depth in 1..=max_depth {
                cuts[depth] = moved.iter().filter(|&&b| distance[b as usize] <= depth).count();
            }
            for &b in &reached {
                distance[b as usize] = usize::MAX;
            }

            destinations.push(moved);
            within_depth.push(cuts);
        }

        VicinityTable { destinations, within_depth }
    }

    /// The relocation targets of `origin` within `depth` box moves, nearest
    /// first.
    ///
    /// # Arguments
    ///
    /// * `origin` -
    /// * `depth` -
    ///
    pub fn within(&self, origin: u16, depth: usize) -> &[u16] {
        let cuts = &self.within_depth[origin as usize];
        let end = cuts[depth.min(cuts.len() - 1)];

        &self.destinations[origin as usize][..end]
    }
}

/// Enumerates every box configuration in the vicinity of the given seed
/// configurations and inserts them into the set. One task per seed, spread
/// over `num_threads` workers.
///
/// The caller must have inserted the seed configurations themselves already;
/// this guarantees the seed path survives even when the set fills up mid
/// generation.
///
/// # Arguments
///
/// * `geometry` -
/// * `set` -
/// * `seeds` -
/// * `vicinity` - per-depth displacement budgets
/// * `relevant` - box positions relocation may use; `None` allows all
/// * `oracle` -
/// * `status` -
/// * `num_threads` -
///
pub fn generate_universe(
    geometry: &Geometry,
    set: &BoxConfigurationSet,
    seeds: &[BoxConfiguration],
    vicinity: &[usize],
    relevant: Option<&[bool]>,
    oracle: &dyn DeadlockOracle,
    status: &StatusFlag,
    num_threads: usize
) -> GenerationOutcome
{
    let max_depth = vicinity.iter().copied().max().unwrap_or(0);
    let table = VicinityTable::new(geometry, max_depth, relevant);
    let complete = AtomicBool::new(true);

    if max_depth > 0 && !seeds.is_empty() {
        let (sender, receiver) = unbounded();

        for seed in seeds {
            sender.send(seed).expect("generator channel closed early");
        }
        drop(sender);

        thread::scope(|scope| {
            for _ in 0..num_threads.max(1) {
                let receiver = receiver.clone();
                let complete = &complete;
                let table = &table;

                scope.spawn(move |_| {
                    let mut task = GeneratorTask {
                        geometry,
                        set,
                        table,
                        vicinity,
                        oracle,
                        status,
                        moved: Vec::with_capacity(vicinity.len())
                    };

                    while let Ok(seed) = receiver.recv() {
                        let mut cfg = seed.clone();

                        if !task.expand(&mut cfg, 0) {
                            complete.store(false, Ordering::Relaxed);
                            break;
                        }
                    }
                });
            }
        }).expect("generator worker panicked");
    }

    let outcome = GenerationOutcome {
        generated: set.len(),
        complete: complete.load(Ordering::Relaxed) && !status.is_stopped()
    };

    debug!(generated = outcome.generated, complete = outcome.complete, "vicinity generated");
    outcome
}

struct GeneratorTask<'a> {
    geometry: &'a Geometry,
    set: &'a BoxConfigurationSet,
    table: &'a VicinityTable,
    vicinity: &'a [usize],
    oracle: &'a dyn DeadlockOracle,
    status: &'a StatusFlag,
    moved: Vec<u16>
}

impl<'a> GeneratorTask<'a> {
    /// Relocates up to `len(vicinity) - depth` further boxes of `cfg`,
    /// inserting every configuration encountered. Returns false when the
    /// set is full or the run was stopped.
    ///
    /// # Arguments
    ///
    /// * `cfg` -
    /// * `depth` -
    ///
    fn expand(&mut self, cfg: &mut BoxConfiguration, depth: usize) -> bool {
        if depth >= self.vicinity.len() {
            return true;
        }

        let budget = self.vicinity[depth];
        let boxes = cfg.boxes().collect::<Vec<_>>();

        for from in boxes {
            if self.status.is_stopped() {
                return false;
            }
            if self.moved.contains(&from) {
                continue;
            }

            for &to in self.table.within(from, budget) {
                if cfg.has(to) {
                    continue;
                }

                cfg.move_box(from, to);

                if !self.oracle.is_deadlock(cfg) {
                    if self.set.insert(cfg).is_none() {
                        cfg.move_box(to, from);
                        return false;
                    }

                    self.moved.push(to);
                    let alive = self.expand(cfg, depth + 1);
                    self.moved.pop();

                    if !alive {
                        cfg.move_box(to, from);
                        return false;
                    }
                }

                cfg.move_box(to, from);
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sk_board::Board;

    use crate::deadlock::NoDeadlockDetection;

    use super::*;

    fn setup(text: &str) -> (Board, Geometry) {
        let board = Board::parse(text).unwrap();
        let geometry = Geometry::new(&board).unwrap();

        (board, geometry)
    }

    fn seed_of(board: &Board, geometry: &Geometry) -> BoxConfiguration {
        let mut cfg = BoxConfiguration::empty(geometry.box_count());

        for cell in board.initial_boxes() {
            cfg.set(geometry.box_index(cell));
        }

        cfg
    }

    const ROOM: &str = "\
#######
#     #
# $ . #
# @   #
#######";

    #[test]
    fn vicinity_table_orders_by_distance() {
        let (_, geometry) = setup(ROOM);
        let table = VicinityTable::new(&geometry, 2, None);
        let origin = 0;

        assert!(table.within(origin, 0).is_empty());

        let near = table.within(origin, 1).len();
        let far = table.within(origin, 2).len();
        assert!(near > 0 && far >= near);
    }

    #[test]
    fn zero_vicinity_generates_nothing_extra() {
        let (board, geometry) = setup(ROOM);
        let set = BoxConfigurationSet::new(64, geometry.box_count()).unwrap();
        let seed = seed_of(&board, &geometry);
        let status = Arc::new(StatusFlag::new());

        set.insert(&seed).unwrap();
        let outcome = generate_universe(
            &geometry, &set, &[seed], &[0], None, &NoDeadlockDetection, &status, 2
        );

        assert_eq!(outcome.generated, 1);
        assert!(outcome.complete);
    }

    #[test]
    fn one_box_vicinity_contains_all_single_displacements() {
        let (board, geometry) = setup(ROOM);
        let set = BoxConfigurationSet::new(256, geometry.box_count()).unwrap();
        let seed = seed_of(&board, &geometry);
        let status = Arc::new(StatusFlag::new());

        set.insert(&seed).unwrap();
        let outcome = generate_universe(
            &geometry, &set, &[seed.clone()], &[1], None, &NoDeadlockDetection, &status, 2
        );

        // the single box has some neighbors within the live area; seed plus
        // each one-step displacement
        let origin = seed.boxes().next().unwrap();
        let expected = 1 + VicinityTable::new(&geometry, 1, None).within(origin, 1).len();

        assert_eq!(outcome.generated, expected);
        assert!(outcome.complete);
    }

    #[test]
    fn full_set_reports_incomplete() {
        let (board, geometry) = setup(ROOM);
        let set = BoxConfigurationSet::new(2, geometry.box_count()).unwrap();
        let seed = seed_of(&board, &geometry);
        let status = Arc::new(StatusFlag::new());

        set.insert(&seed).unwrap();
        let outcome = generate_universe(
            &geometry, &set, &[seed], &[2, 2], None, &NoDeadlockDetection, &status, 1
        );

        assert!(!outcome.complete);
        assert_eq!(outcome.generated, 2);
    }

    #[test]
    fn oracle_filters_configurations() {
        struct RejectEverything;

        impl DeadlockOracle for RejectEverything {
            fn is_deadlock(&self, _cfg: &BoxConfiguration) -> bool {
                true
            }
        }

        let (board, geometry) = setup(ROOM);
        let set = BoxConfigurationSet::new(64, geometry.box_count()).unwrap();
        let seed = seed_of(&board, &geometry);
        let status = Arc::new(StatusFlag::new());

        set.insert(&seed).unwrap();
        let outcome = generate_universe(
            &geometry, &set, &[seed], &[2], None, &RejectEverything, &status, 2
        );

        assert_eq!(outcome.generated, 1);
        assert!(outcome.complete);
    }
}
