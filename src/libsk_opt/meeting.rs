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

use dashmap::DashSet;

/// A board position both search directions have stored metrics for. The
/// concatenation of the forward path to it and the backward path from it is
/// a solution candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeetingPoint {
    pub cfg: u32,
    pub player: u16,
    /// The axis plane of the slot (always 0 unless the objective keeps two).
    pub plane: u8,
    /// The position of the box last pushed into this board position.
    pub last_box: u16
}

/// Deduplicated set of rendezvous points, shared by all workers.
pub struct MeetingPoints {
    points: DashSet<MeetingPoint>
}

impl MeetingPoints {
    pub fn new() -> MeetingPoints {
        MeetingPoints { points: DashSet::new() }
    }

    /// Records a rendezvous. Returns false if it was already known.
    ///
    /// # Arguments
    ///
    /// * `point` -
    ///
    pub fn insert(&self, point: MeetingPoint) -> bool {
        self.points.insert(point)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Snapshot of all recorded points.
    pub fn to_vec(&self) -> Vec<MeetingPoint> {
        self.points.iter().map(|point| *point).collect()
    }
}

impl Default for MeetingPoints {
    fn default() -> MeetingPoints {
        MeetingPoints::new()
    }
}
