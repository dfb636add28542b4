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

use std::cmp::Ordering;

use sk_board::{replay, Board, Solution};
use sk_opt::{
    optimize, NoDeadlockDetection, NullSink, OptimizationMethod, OptimizeParams, Optimizer,
    OptimizerStatus
};

use crate::support::{init_tracing, LogCapture, SolutionCapture, StopOnFirstLog};

const CORRIDOR: &str = "\
#####
#@$.#
#####";

/// A single box three pushes from its goal, with room to take a detour.
const SIDE_STEP: &str = "\
#######
#     #
#     #
# $  .#
#@    #
#######";

/// Two boxes, four straight pushes each; interleaving their pushes wastes
/// box lines and box changes.
const TWO_BOXES: &str = "\
#########
# $   . #
# $   . #
#@      #
#########";

/// A seed that pushes the box up, walks around, pushes it back down and only
/// then pushes it home: two pushes and eight moves worse than the optimum.
const SIDE_STEP_DETOUR: &str = "rUluurDldRRR";

/// Pushes the two boxes strictly alternating; eight box lines in total.
const TWO_BOXES_INTERLEAVED: &str = "uuRldRuRldRuRldRuRldR";

fn params_for(
    level: &str,
    seed_lurd: &str,
    method: OptimizationMethod
) -> (OptimizeParams, Solution)
{
    let board = Board::parse(level).unwrap();
    let seed = Solution::from_lurd(seed_lurd, &board).unwrap();
    let params = OptimizeParams::new(board, vec! [seed.clone()], method);

    (params, seed)
}

#[test]
fn empty_vicinity_returns_the_seed_unchanged() {
    init_tracing();

    let (mut params, seed) = params_for(CORRIDOR, "R", OptimizationMethod::PushesMoves);
    params.vicinity = vec! [0];

    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    assert_eq!(best.move_bytes(), seed.move_bytes());
    assert_eq!(best.metrics(), seed.metrics());
}

#[test]
fn already_optimal_solution_survives_iteration() {
    init_tracing();

    let (mut params, seed) = params_for(CORRIDOR, "R", OptimizationMethod::PushesMoves);
    params.iterate = true;

    let solutions = SolutionCapture::new();
    let best = optimize(&params, &NoDeadlockDetection, &solutions).unwrap().unwrap();

    assert_eq!(best.move_bytes(), seed.move_bytes());
    assert_eq!(solutions.count(), 0);
}

#[test]
fn side_step_detour_is_straightened() {
    init_tracing();

    let (params, seed) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);

    assert_eq!(seed.pushes_count(), 5);
    assert_eq!(seed.moves_count(), 12);

    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    assert_eq!(best.pushes_count(), 3);
    assert_eq!(best.moves_count(), 4);

    // the reported solution replays to the solved position
    let board = Board::parse(SIDE_STEP).unwrap();
    let outcome = replay(&board, &best.directions()).unwrap();
    assert!(outcome.solved);
    assert_eq!(&outcome.metrics, best.metrics());
}

#[test]
fn side_step_is_found_within_the_seed_corridor_alone() {
    init_tracing();

    // the detour's own configurations already contain the direct path, so
    // even a zero vicinity straightens the player's part
    let (mut params, _) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    params.vicinity = vec! [0];

    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    assert_eq!(best.pushes_count(), 3);
}

#[test]
fn moves_pushes_prefers_fewer_moves() {
    init_tracing();

    let (params, seed) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::MovesPushes);
    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    assert!(best.moves_count() < seed.moves_count());
    assert_eq!(best.moves_count(), 4);
}

#[test]
fn interleaved_pushes_lose_box_lines() {
    init_tracing();

    let (mut params, seed) = params_for(
        TWO_BOXES,
        TWO_BOXES_INTERLEAVED,
        OptimizationMethod::BoxLinesMoves
    );
    params.vicinity = vec! [4];

    assert_eq!(seed.metrics().box_lines, 8);

    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    assert!(best.metrics().box_lines <= seed.metrics().box_lines - 2);
    assert_eq!(best.pushes_count(), 8);

    let board = Board::parse(TWO_BOXES).unwrap();
    assert!(replay(&board, &best.directions()).unwrap().solved);
}

#[test]
fn interleaved_pushes_lose_box_changes() {
    init_tracing();

    let (mut params, seed) = params_for(
        TWO_BOXES,
        TWO_BOXES_INTERLEAVED,
        OptimizationMethod::BoxChangesMoves
    );
    params.vicinity = vec! [4];

    assert_eq!(seed.metrics().box_changes, 8);

    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    assert!(best.metrics().box_changes <= seed.metrics().box_changes - 2);
}

#[test]
fn cancellation_returns_the_seed_promptly() {
    init_tracing();

    let (params, seed) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    let optimizer = Optimizer::new();
    let sink = StopOnFirstLog::new(&optimizer);

    let best = optimizer.optimize(&params, &NoDeadlockDetection, &sink).unwrap().unwrap();

    assert_eq!(optimizer.status(), OptimizerStatus::StoppedByUser);

    // the seed comes back unchanged, or verifiably improved
    let comparison = params.method.compare(best.metrics(), seed.metrics());
    assert!(comparison != Ordering::Greater);

    let board = Board::parse(SIDE_STEP).unwrap();
    assert!(replay(&board, &best.directions()).unwrap().solved);
}

#[test]
fn out_of_memory_backs_off_to_seventy_percent_and_recovers() {
    init_tracing();

    let (mut params, _) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    params.max_box_configurations = Some(1000);
    params.induce_allocation_failures = 1;

    let log = LogCapture::new();
    let best = optimize(&params, &NoDeadlockDetection, &log).unwrap().unwrap();

    assert!(log.contains("backing off to 700 box configurations"));
    assert_eq!(best.pushes_count(), 3);
}

#[test]
fn repeated_out_of_memory_surfaces_and_returns_null() {
    init_tracing();

    let (mut params, _) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    params.induce_allocation_failures = 2;

    let log = LogCapture::new();
    let best = optimize(&params, &NoDeadlockDetection, &log).unwrap();

    assert!(best.is_none());
    assert!(log.contains("giving up"));
}

#[test]
fn iterate_mode_reports_intermediate_solutions() {
    init_tracing();

    let (mut params, _) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    params.iterate = true;

    let solutions = SolutionCapture::new();
    let best = optimize(&params, &NoDeadlockDetection, &solutions).unwrap().unwrap();

    assert_eq!(best.pushes_count(), 3);
    assert!(solutions.count() >= 1);
}

#[test]
fn preserve_player_end_keeps_the_final_cell() {
    init_tracing();

    let (mut params, seed) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    params.preserve_player_end = true;

    let board = Board::parse(SIDE_STEP).unwrap();
    let seed_end = replay(&board, &seed.directions()).unwrap().final_player;

    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();
    let best_end = replay(&board, &best.directions()).unwrap().final_player;

    assert_eq!(best_end, seed_end);
    assert!(best.pushes_count() <= seed.pushes_count());
}

#[test]
fn single_thread_runs_both_directions() {
    init_tracing();

    let (mut params, _) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    params.max_cpus = 1;

    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    assert_eq!(best.pushes_count(), 3);
    assert_eq!(best.moves_count(), 4);
}

#[test]
fn moves_highest_pushes_keeps_moves_minimal() {
    init_tracing();

    let (params, _) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::MovesHighestPushes);
    let best = optimize(&params, &NoDeadlockDetection, &NullSink).unwrap().unwrap();

    // minimal moves on this level is the straight solution
    assert_eq!(best.moves_count(), 4);
}

#[test]
fn log_receives_progress_lines() {
    init_tracing();

    let (params, _) = params_for(SIDE_STEP, SIDE_STEP_DETOUR, OptimizationMethod::PushesMoves);
    let log = LogCapture::new();

    optimize(&params, &NoDeadlockDetection, &log).unwrap().unwrap();

    assert!(log.len() >= 2);
    assert!(log.contains("box configurations"));
}
