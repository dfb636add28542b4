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

//! Vicinity-search optimizer for sokoban solutions: given known solutions of
//! a level, it searches a bounded universe of "nearby" box configurations
//! with a bidirectional, multi-threaded best-first search for a solution
//! that is better under the chosen metric ordering.

/* -------- Modules -------- */

mod alloc;
pub mod box_configuration;
pub mod bucket_queue;
pub mod configuration_set;
pub mod controller;
pub mod deadlock;
mod error;
pub mod generator;
pub mod meeting;
pub mod options;
pub mod params;
pub mod position_storage;
pub mod progress;
pub mod reachability;
pub mod reconstruction;
pub mod search;
pub mod status;

/* -------- Exports -------- */

pub use self::box_configuration::BoxConfiguration;
pub use self::configuration_set::BoxConfigurationSet;
pub use self::controller::Optimizer;
pub use self::deadlock::{DeadlockOracle, NoDeadlockDetection};
pub use self::error::OptimizerError;
pub use self::options::{MetricKind, OptimizationMethod};
pub use self::params::{OptimizeParams, SegmentInfo};
pub use self::progress::{NullSink, ProgressSink};
pub use self::status::OptimizerStatus;

/* -------- Code -------- */

use sk_board::Solution;

/// Runs one optimization with a fresh [`Optimizer`]. Convenience entry point
/// for callers that do not need to cancel from another thread.
///
/// # Arguments
///
/// * `params` -
/// * `oracle` -
/// * `sink` -
///
pub fn optimize(
    params: &OptimizeParams,
    oracle: &dyn DeadlockOracle,
    sink: &dyn ProgressSink
) -> Result<Option<Solution>, OptimizerError>
{
    Optimizer::new().optimize(params, oracle, sink)
}
