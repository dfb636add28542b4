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

use sk_board::Solution;

/// Receiver for everything the optimizer wants to tell a user interface.
/// Implementations must be cheap and non-blocking; the engine calls these
/// from worker threads.
pub trait ProgressSink: Sync {
    /// Replaces the single status line (current depth, best metrics so far).
    ///
    /// # Arguments
    ///
    /// * `text` -
    ///
    fn set_info_text(&self, text: &str) {
        let _ = text;
    }

    /// Appends one line to the human-readable log.
    ///
    /// # Arguments
    ///
    /// * `line` -
    ///
    fn add_log(&self, line: &str) {
        let _ = line;
    }

    /// Called for every intermediate solution adopted while iterating.
    ///
    /// # Arguments
    ///
    /// * `solution` -
    /// * `seeds` - the seed set the next iteration will start from
    ///
    fn new_found_solution(&self, solution: &Solution, seeds: &[Solution]) {
        let _ = (solution, seeds);
    }

    /// Terminal callback with the best solution found, if any.
    ///
    /// # Arguments
    ///
    /// * `best` -
    ///
    fn optimizer_ended(&self, best: Option<&Solution>) {
        let _ = best;
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink { }
