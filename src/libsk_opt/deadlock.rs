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

use crate::box_configuration::BoxConfiguration;

/// Judges whether a box configuration is provably unsolvable. The engine
/// never computes deadlock information itself; the vicinity generator simply
/// skips every configuration the oracle rejects. Implementations must be
/// pure: the same configuration always gets the same verdict.
pub trait DeadlockOracle: Sync {
    /// # Arguments
    ///
    /// * `cfg` -
    ///
    fn is_deadlock(&self, cfg: &BoxConfiguration) -> bool;
}

/// Oracle that never rejects anything. The vicinity universe is then only
/// bounded by the dead-square table of the geometry and the capacity of the
/// configuration set.
#[derive(Clone, Copy, Default)]
pub struct NoDeadlockDetection;

impl DeadlockOracle for NoDeadlockDetection {
    fn is_deadlock(&self, _cfg: &BoxConfiguration) -> bool {
        false
    }
}
