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

use sk_board::{Axis, Board, Solution};

use crate::options::OptimizationMethod;

/// Context of the surrounding solution when only a segment of it is being
/// optimized. The prefix ends right before the segment's first move, the
/// suffix begins right after its last move; their metrics take part in every
/// solution comparison so that a segment improvement is judged in context.
#[derive(Clone, Copy, Debug, Default)]
pub struct SegmentInfo {
    pub prefix_moves: usize,
    pub prefix_pushes: usize,
    /// Axis of the push immediately before the segment, if any. Lets a
    /// box-line continue across the segment boundary.
    pub prefix_axis: Option<Axis>,
    pub suffix_moves: usize,
    pub suffix_pushes: usize
}

/// Everything one `optimize` call needs. Construct with
/// [`OptimizeParams::new`] and override the public fields as needed.
pub struct OptimizeParams {
    pub board: Board,
    pub seed_solutions: Vec<Solution>,
    pub method: OptimizationMethod,
    /// Per-depth displacement budgets for the vicinity generator: entry `i`
    /// bounds how far the `i + 1`-th relocated box may stray from its cell.
    pub vicinity: Vec<usize>,
    /// Board cells boxes may be relocated onto; `None` allows every valid
    /// box square.
    pub relevant_box_squares: Option<HashSet<usize>>,
    /// Upper bound on the configuration-set capacity; `None` estimates it
    /// from the memory budget.
    pub max_box_configurations: Option<usize>,
    /// Keep re-running with each improvement as the new seed until a fixed
    /// point is reached.
    pub iterate: bool,
    /// In iterating mode, also stop as soon as an accepted solution fails to
    /// improve the primary metric.
    pub stop_when_primary_unchanged: bool,
    /// Require the optimized solution to leave the player on the same cell
    /// as the seed solution.
    pub preserve_player_end: bool,
    /// Worker threads to use; 0 takes the configured default.
    pub max_cpus: usize,
    pub segment: SegmentInfo,
    /// Test hook: the first `n` search rounds fail their storage allocation
    /// as if the machine were out of memory.
    #[doc(hidden)]
    pub induce_allocation_failures: u32
}

impl OptimizeParams {
    pub fn new(board: Board, seed_solutions: Vec<Solution>, method: OptimizationMethod) -> OptimizeParams {
        OptimizeParams {
            board,
            seed_solutions,
            method,
            vicinity: vec! [1],
            relevant_box_squares: None,
            max_box_configurations: None,
            iterate: false,
            stop_when_primary_unchanged: false,
            preserve_player_end: false,
            max_cpus: 0,
            segment: SegmentInfo::default(),
            induce_allocation_failures: 0
        }
    }
}
