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

#[macro_use] extern crate lazy_static;

/* -------- Modules -------- */

mod board;
mod direction;
mod geometry;
mod solution;

/* -------- Exports -------- */

pub use self::board::{Board, BoardError};
pub use self::direction::{Axis, Direction};
pub use self::geometry::{Geometry, NONE};
pub use self::solution::{replay, Metrics, PushEvent, Replay, Solution, SolutionError};
