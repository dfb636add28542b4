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

use std::collections::HashSet;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use sk_board::{replay, Axis, Geometry, Replay, Solution, NONE};
use sk_utils::config;

use crate::box_configuration::{words_for, BoxConfiguration};
use crate::bucket_queue::BucketPriorityQueue;
use crate::configuration_set::{BoxConfigurationSet, MAX_CAPACITY};
use crate::deadlock::DeadlockOracle;
use crate::error::OptimizerError;
use crate::generator::generate_universe;
use crate::meeting::MeetingPoints;
use crate::options::{OptimizationMethod, SearchProfile};
use crate::params::OptimizeParams;
use crate::position_storage::BoardPositionStorage;
use crate::progress::ProgressSink;
use crate::reconstruction::{Reconstruction, SeedState};
use crate::search::{run_search, thread_split, SearchContext};
use crate::status::{OptimizerStatus, StatusFlag};

/// The iteration driver. One `Optimizer` owns the shared status flag, so a
/// user interface can call [`Optimizer::stop`] from any thread while
/// [`Optimizer::optimize`] is running.
pub struct Optimizer {
    status: Arc<StatusFlag>
}

impl Optimizer {
    pub fn new() -> Optimizer {
        Optimizer { status: Arc::new(StatusFlag::new()) }
    }

    /// Requests cooperative cancellation; every worker drains out after at
    /// most one further expansion.
    pub fn stop(&self) {
        self.status.stop(OptimizerStatus::StoppedByUser);
    }

    pub fn status(&self) -> OptimizerStatus {
        self.status.get()
    }

    /// Runs the vicinity search, iterating while enabled and improving.
    /// Returns the best solution found (the best seed when nothing
    /// improved), or `None` after an unrecovered out-of-memory condition or
    /// an internal failure; both are also reported through the sink.
    ///
    /// # Arguments
    ///
    /// * `params` -
    /// * `oracle` -
    /// * `sink` -
    ///
    pub fn optimize(
        &self,
        params: &OptimizeParams,
        oracle: &dyn DeadlockOracle,
        sink: &dyn ProgressSink
    ) -> Result<Option<Solution>, OptimizerError>
    {
        let validated = validate(params)?;
        let num_threads = if params.max_cpus > 0 { params.max_cpus } else { *config::NUM_THREADS };
        let mut pool = params.seed_solutions.clone();
        let mut best = pool.iter()
            .min_by(|a, b| params.method.compare(a.metrics(), b.metrics()))
            .cloned()
            .expect("seed pool unexpectedly empty");

        // a seed without pushes has nothing a push optimizer could improve
        if best.pushes_count() == 0 {
            sink.add_log("seed solution has no pushes, nothing to optimize");
            sink.optimizer_ended(Some(&best));

            return Ok(Some(best));
        }

        let mut seen = pool.iter()
            .map(|seed| seed.move_bytes().to_vec())
            .collect::<HashSet<_>>();
        let mut capacity_override = params.max_box_configurations;
        let mut pending_failures = params.induce_allocation_failures;
        let mut recovered_from_oom = false;

        loop {
            let seed = best.clone();
            let capacity = apply_capacity_caps(
                capacity_override.unwrap_or_else(|| estimate_capacity(params.method, &validated.geometry)),
                params.method,
                &validated.geometry
            );

            sink.add_log(&format!(
                "optimizing a solution with {} moves / {} pushes ({} box configurations allowed)",
                seed.moves_count(),
                seed.pushes_count(),
                capacity
            ));

            let round = Round {
                params,
                geometry: &validated.geometry,
                relevant: validated.relevant.as_deref(),
                oracle,
                sink,
                status: &self.status,
                num_threads
            };

            match run_round(&round, &seed, capacity, &mut pending_failures) {
                Err(OptimizerError::OutOfMemory(reason)) => {
                    if recovered_from_oom {
                        sink.add_log(&format!("out of memory again ({}), giving up", reason));
                        self.status.stop(OptimizerStatus::StoppedDueToOutOfMemory);
                        sink.optimizer_ended(None);

                        return Ok(None);
                    }

                    recovered_from_oom = true;
                    let reduced = (capacity * 7 / 10).max(1);
                    capacity_override = Some(reduced);
                    sink.add_log(&format!(
                        "out of memory ({}), backing off to {} box configurations",
                        reason, reduced
                    ));
                },
                Err(OptimizerError::Fatal(reason)) => {
                    sink.add_log(&format!("internal failure: {}", reason));
                    self.status.stop(OptimizerStatus::StoppedDueToFailure);
                    sink.optimizer_ended(None);

                    return Ok(None);
                },
                Err(invalid) => return Err(invalid),
                Ok(candidate) => {
                    let candidate = candidate.unwrap_or_else(|| seed.clone());
                    let stopped = self.status.get() == OptimizerStatus::StoppedByUser;

                    if params.method.is_improvement(candidate.metrics(), best.metrics()) {
                        let primary_changed = params.method.primary().of(candidate.metrics())
                            != params.method.primary().of(best.metrics());

                        sink.add_log(&format!(
                            "improved to {} moves / {} pushes / {} box lines / {} box changes",
                            candidate.moves_count(),
                            candidate.pushes_count(),
                            candidate.metrics().box_lines,
                            candidate.metrics().box_changes
                        ));
                        best = candidate.clone();
                        pool.push(candidate.clone());
                        sink.new_found_solution(&best, &pool);

                        let is_fixed_point = !seen.insert(candidate.move_bytes().to_vec());

                        if params.iterate
                            && !stopped
                            && !is_fixed_point
                            && !(params.stop_when_primary_unchanged && !primary_changed)
                        {
                            continue;
                        }
                    }

                    break;
                }
            }
        }

        if self.status.is_running() {
            self.status.stop(OptimizerStatus::Ended);
        }
        sink.optimizer_ended(Some(&best));

        Ok(Some(best))
    }
}

impl Default for Optimizer {
    fn default() -> Optimizer {
        Optimizer::new()
    }
}

struct Validated {
    geometry: Geometry,
    /// Allowed relocation targets by box position.
    relevant: Option<Vec<bool>>
}

fn validate(params: &OptimizeParams) -> Result<Validated, OptimizerError> {
    if params.seed_solutions.is_empty() {
        return Err(OptimizerError::InvalidInput("no seed solutions given".into()));
    }
    if params.vicinity.is_empty() {
        return Err(OptimizerError::InvalidInput("empty vicinity vector".into()));
    }
    if params.vicinity.iter().any(|&k| k > 255) {
        return Err(OptimizerError::InvalidInput("vicinity budget above 255".into()));
    }

    let mut reference: Option<Replay> = None;

    for seed in &params.seed_solutions {
        let outcome = replay(&params.board, &seed.directions())?;

        match &reference {
            None => reference = Some(outcome),
            Some(reference) => {
                if reference.final_boxes != outcome.final_boxes {
                    return Err(OptimizerError::InvalidInput(
                        "seed solutions end in different box configurations".into()
                    ));
                }
                if params.preserve_player_end && reference.final_player != outcome.final_player {
                    return Err(OptimizerError::InvalidInput(
                        "seed solutions end on different player positions".into()
                    ));
                }
            }
        }
    }

    let reference = reference.expect("validated at least one seed");

    // prefer the dead-square-reduced geometry, but a solution segment may
    // legitimately rest boxes on dead squares
    let strict = Geometry::new(&params.board)?;
    let geometry = if seed_fits(&strict, params, &reference) {
        strict
    } else {
        let permissive = Geometry::permissive(&params.board)?;

        if !seed_fits(&permissive, params, &reference) {
            return Err(OptimizerError::InvalidInput(
                "seed solution moves boxes outside the playable area".into()
            ));
        }

        permissive
    };

    let relevant = params.relevant_box_squares.as_ref().map(|cells| {
        let mut allowed = vec! [false; geometry.box_count()];

        for &cell in cells {
            if cell < params.board.num_cells() {
                let b = geometry.box_index(cell);

                if b != NONE {
                    allowed[b as usize] = true;
                }
            }
        }

        allowed
    });

    Ok(Validated { geometry, relevant })
}

/// True if every box cell the seed solution touches is a valid box position
/// of this geometry.
fn seed_fits(geometry: &Geometry, params: &OptimizeParams, reference: &Replay) -> bool {
    let initial_ok = params.board.initial_boxes().all(|cell| geometry.box_index(cell) != NONE);
    let path_ok = reference.pushes.iter().all(|push| {
        geometry.box_index(push.box_from) != NONE && geometry.box_index(push.box_to) != NONE
    });

    initial_ok && path_ok
}

fn estimate_capacity(method: OptimizationMethod, geometry: &Geometry) -> usize {
    let words = words_for(geometry.box_count()).max(1);
    let directions = if method.is_bidirectional() { 2 } else { 1 };
    let bytes_per_cfg = 8 * words
        + 8
        + 4 * geometry.player_count() * method.axis_planes() * directions;
    let budget = *config::MAX_MEMORY_MB * 1024 * 1024 / 5 * 4;

    (budget / bytes_per_cfg).max(1)
}

/// `C(box_cells, boxes)`: no vicinity can ever hold more configurations
/// than there are ways of placing the boxes on the valid box cells.
fn universe_upper_bound(box_cells: usize, boxes: usize) -> usize {
    let mut acc: u128 = 1;

    for i in 1..=boxes.min(box_cells) {
        acc = acc * (box_cells - boxes + i) as u128 / i as u128;

        if acc >= usize::MAX as u128 {
            return usize::MAX;
        }
    }

    acc as usize
}

fn apply_capacity_caps(capacity: usize, method: OptimizationMethod, geometry: &Geometry) -> usize {
    let mut capacity = capacity.min(MAX_CAPACITY);

    if method.axis_planes() == 2 {
        // inherited safety cap against index overflow in the axis-indexed
        // storages; see DESIGN.md
        let limit = (i32::MAX as u64 / (geometry.player_count() as u64 + 1) / 2)
            .saturating_sub(8) as usize;

        capacity = capacity.min(limit.max(1));
    }

    capacity.max(1)
}

struct Round<'a> {
    params: &'a OptimizeParams,
    geometry: &'a Geometry,
    relevant: Option<&'a [bool]>,
    oracle: &'a dyn DeadlockOracle,
    sink: &'a dyn ProgressSink,
    status: &'a Arc<StatusFlag>,
    num_threads: usize
}

/// Runs one generation + search + reconstruction round for the given seed.
/// `Ok(None)` means the round finished without producing a candidate (the
/// caller keeps the seed).
fn run_round(
    round: &Round,
    seed: &Solution,
    capacity: usize,
    pending_failures: &mut u32
) -> Result<Option<Solution>, OptimizerError>
{
    if *pending_failures > 0 {
        *pending_failures -= 1;

        return Err(OptimizerError::OutOfMemory("injected allocation failure".into()));
    }

    let geometry = round.geometry;
    let outcome = replay(&round.params.board, &seed.directions())
        .map_err(|err| OptimizerError::Fatal(format!("seed stopped replaying: {}", err)))?;

    if capacity < 2 * seed.pushes_count() {
        return Err(OptimizerError::OutOfMemory(format!(
            "capacity of {} box configurations cannot hold a {}-push solution",
            capacity,
            seed.pushes_count()
        )));
    }

    let profile = SearchProfile::build(round.params.method, seed.metrics(), geometry.player_count())?;

    // walk the seed once, collecting the configuration after every push and
    // the metric trajectory the search would assign to it
    let mut cfg = BoxConfiguration::empty(geometry.box_count());
    for cell in round.params.board.initial_boxes() {
        cfg.set(geometry.box_index(cell));
    }

    let mut seed_cfgs = vec! [cfg.clone()];
    let mut seed_states = vec! [];
    let mut primary = 0;
    let mut secondary = if profile.inverts_secondary() { profile.invert_pushes(0) } else { 0 };
    let mut prev_end: Option<usize> = None;
    let mut prev_box_to: Option<usize> = None;
    let mut prev_axis: Option<Axis> = round.params.segment.prefix_axis;

    for push in &outcome.pushes {
        let walk = match prev_end {
            None => push.move_index,
            Some(prev_end) => push.move_index - prev_end - 1
        } as u32;
        let (new_line, box_change) = match prev_end {
            // the first push may continue a box line across the segment
            // boundary, exactly as the search seeds it
            None => (!(walk == 0 && prev_axis == Some(push.dir.axis())), true),
            Some(_) => {
                let box_change = prev_box_to != Some(push.box_from);

                (box_change || prev_axis != Some(push.dir.axis()) || walk > 0, box_change)
            }
        };

        let advanced = profile.advance(primary, secondary, walk, new_line, box_change)
            .ok_or_else(|| OptimizerError::InvalidInput(
                "seed solution exceeds the search metric budget".into()
            ))?;
        primary = advanced.0;
        secondary = advanced.1;

        cfg.move_box(geometry.box_index(push.box_from), geometry.box_index(push.box_to));
        seed_cfgs.push(cfg.clone());
        seed_states.push(SeedState {
            cfg: 0,
            player: geometry.player_index(push.box_from),
            plane: if profile.axis_planes == 2 { push.dir.axis().as_plane() } else { 0 },
            primary,
            secondary,
            move_index: push.move_index
        });

        prev_end = Some(push.move_index);
        prev_box_to = Some(push.box_to);
        prev_axis = Some(push.dir.axis());
    }

    // universe generation; the seed path goes in first so it survives a
    // full set. There is no point in reserving more room than there are
    // placements of the boxes on the board.
    let started_at = Instant::now();
    let placements = universe_upper_bound(geometry.box_count(), seed_cfgs[0].num_boxes());
    let mut set = BoxConfigurationSet::new(capacity.min(placements), geometry.box_count())?;

    for seed_cfg in &seed_cfgs {
        set.insert(seed_cfg).ok_or_else(|| OptimizerError::OutOfMemory(
            "capacity too small for the seed solution itself".into()
        ))?;
    }

    let start_cfg = set.index_of(&seed_cfgs[0]).expect("seed start vanished from the set");
    let target_cfg = set.index_of(seed_cfgs.last().unwrap()).expect("seed target vanished from the set");

    for (state, seed_cfg) in seed_states.iter_mut().zip(seed_cfgs.iter().skip(1)) {
        state.cfg = set.index_of(seed_cfg).expect("seed state vanished from the set");
    }

    let generated = generate_universe(
        geometry,
        &set,
        &seed_cfgs,
        &round.params.vicinity,
        round.relevant,
        round.oracle,
        round.status,
        round.num_threads
    );

    if !generated.complete && !round.status.is_stopped() {
        round.sink.add_log("configuration set is full, searching a truncated vicinity");
    }
    set.shrink_to_fit();
    round.sink.add_log(&format!(
        "generated {} box configurations in {:.1}s",
        generated.generated,
        started_at.elapsed().as_secs_f32()
    ));

    // search
    let storage = BoardPositionStorage::new(
        set.len(),
        geometry.player_count(),
        profile.axis_planes,
        profile.secondary_max,
        profile.bidirectional
    )?;
    let (forward_threads, backward_threads) = thread_split(round.num_threads, profile.bidirectional);
    let forward_queue = BucketPriorityQueue::new(
        profile.min_delta,
        profile.max_delta,
        forward_threads,
        round.status.clone()
    )?;
    let backward_queue = if profile.bidirectional {
        Some(BucketPriorityQueue::new(
            profile.min_delta,
            profile.max_delta,
            backward_threads,
            round.status.clone()
        )?)
    } else {
        None
    };

    let meetings = MeetingPoints::new();
    let end_player = if round.params.preserve_player_end {
        Some(geometry.player_index(outcome.final_player))
    } else {
        None
    };
    let ctx = SearchContext {
        geometry,
        set: &set,
        storage: &storage,
        profile: &profile,
        status: round.status,
        meetings: &meetings,
        forward_queue: &forward_queue,
        backward_queue: backward_queue.as_ref(),
        start_cfg,
        start_player: geometry.player_index(round.params.board.player_start()),
        target_cfg,
        end_player,
        prefix_axis: round.params.segment.prefix_axis,
        deepest: AtomicU32::new(0),
        sink: round.sink
    };

    run_search(&ctx, round.num_threads);
    debug!(
        meetings = meetings.len(),
        elapsed = started_at.elapsed().as_secs_f64(),
        "search round finished"
    );

    match round.status.get() {
        OptimizerStatus::StoppedDueToOutOfMemory => {
            return Err(OptimizerError::OutOfMemory("search worker ran out of memory".into()));
        },
        OptimizerStatus::StoppedDueToFailure => {
            return Err(OptimizerError::Fatal("search worker failed".into()));
        },
        _ => {}
    }

    // reconstruction; on a user stop without any rendezvous, salvage
    // whatever prefix of the storage beats the seed
    let reconstruction = Reconstruction {
        geometry,
        set: &set,
        storage: &storage,
        profile: &profile,
        start_cfg,
        start_player: ctx.start_player,
        target_cfg,
        end_player,
        prefix_axis: round.params.segment.prefix_axis
    };
    let stopped = round.status.get() == OptimizerStatus::StoppedByUser;
    let bytes = if meetings.is_empty() {
        if stopped {
            reconstruction.salvage(&seed_states, seed.move_bytes())
        } else {
            None
        }
    } else {
        reconstruction.best_solution(&meetings.to_vec(), round.num_threads)
            .or_else(|| if stopped {
                reconstruction.salvage(&seed_states, seed.move_bytes())
            } else {
                None
            })
    };

    match bytes {
        None => Ok(None),
        Some(bytes) => {
            let candidate = Solution::new(bytes, &round.params.board).map_err(|err| {
                OptimizerError::Fatal(format!("reconstructed move sequence does not replay: {}", err))
            })?;
            let check = replay(&round.params.board, &candidate.directions()).map_err(|err| {
                OptimizerError::Fatal(format!("reconstructed move sequence does not replay: {}", err))
            })?;

            if check.final_boxes != outcome.final_boxes {
                return Err(OptimizerError::Fatal(
                    "reconstructed solution misses the target configuration".into()
                ));
            }
            if round.params.preserve_player_end && check.final_player != outcome.final_player {
                return Err(OptimizerError::Fatal(
                    "reconstructed solution ends on the wrong player position".into()
                ));
            }

            Ok(Some(candidate))
        }
    }
}

#[cfg(test)]
mod tests {
    use sk_board::Board;

    use super::*;

    #[test]
    fn estimate_capacity_is_positive() {
        let board = Board::parse("\
######
#@$ .#
######").unwrap();
        let geometry = Geometry::new(&board).unwrap();

        for method in OptimizationMethod::ALL {
            assert!(estimate_capacity(method, &geometry) >= 1);
        }
    }

    #[test]
    fn universe_bound_is_binomial() {
        assert_eq!(universe_upper_bound(10, 2), 45);
        assert_eq!(universe_upper_bound(7, 1), 7);
        assert_eq!(universe_upper_bound(5, 5), 1);
        assert_eq!(universe_upper_bound(200, 100), usize::MAX);
    }

    #[test]
    fn axis_cap_applies_to_axis_methods() {
        let board = Board::parse("\
######
#@$ .#
######").unwrap();
        let geometry = Geometry::new(&board).unwrap();
        let huge = usize::MAX / 2;

        let capped = apply_capacity_caps(huge, OptimizationMethod::BoxLinesMoves, &geometry);
        let uncapped = apply_capacity_caps(huge, OptimizationMethod::PushesMoves, &geometry);

        assert!(capped < uncapped);
    }

    #[test]
    fn validate_rejects_bad_input() {
        let board = Board::parse("\
######
#@$ .#
######").unwrap();
        let seed = Solution::from_lurd("RR", &board).unwrap();

        let empty = OptimizeParams::new(board.clone(), vec! [], OptimizationMethod::PushesMoves);
        assert!(matches!(
            validate(&empty),
            Err(OptimizerError::InvalidInput(_))
        ));

        let mut no_vicinity = OptimizeParams::new(
            board.clone(),
            vec! [seed.clone()],
            OptimizationMethod::PushesMoves
        );
        no_vicinity.vicinity = vec! [];
        assert!(matches!(
            validate(&no_vicinity),
            Err(OptimizerError::InvalidInput(_))
        ));

        let ok = OptimizeParams::new(board, vec! [seed], OptimizationMethod::PushesMoves);
        assert!(validate(&ok).is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_seeds() {
        let board = Board::parse("\
#######
#@$  .#
#######").unwrap();
        let long = Solution::from_lurd("RRR", &board).unwrap();

        // a second "seed" that leaves the box one cell short
        let short = Solution::from_lurd("RR", &board).unwrap();
        let params = OptimizeParams::new(board, vec! [long, short], OptimizationMethod::PushesMoves);

        assert!(matches!(
            validate(&params),
            Err(OptimizerError::InvalidInput(_))
        ));
    }
}
