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

use sk_board::{Direction, Geometry, NONE};

/// Per-worker scratch buffers for the player-reachability BFS. A stamp
/// counter takes the place of clearing the visited array between runs, so a
/// full expansion step never allocates.
pub struct PlayerReachability {
    stamp: u32,
    visited: Box<[u32]>,
    distance: Box<[u32]>,
    arrived_by: Box<[u8]>,
    order: Vec<u16>
}

impl PlayerReachability {
    pub fn new(player_count: usize) -> PlayerReachability {
        PlayerReachability {
            stamp: 0,
            visited: vec! [0; player_count].into_boxed_slice(),
            distance: vec! [0; player_count].into_boxed_slice(),
            arrived_by: vec! [0; player_count].into_boxed_slice(),
            order: Vec::with_capacity(player_count)
        }
    }

    /// Breadth-first search over the player positions reachable from
    /// `start`, treating every position for which `blocked` returns true as
    /// impassable.
    ///
    /// # Arguments
    ///
    /// * `geometry` -
    /// * `start` -
    /// * `blocked` -
    ///
    pub fn compute<F>(&mut self, geometry: &Geometry, start: u16, blocked: F)
        where F: Fn(u16) -> bool
    {
        if self.stamp == u32::MAX {
            self.visited.fill(0);
            self.stamp = 0;
        }
        self.stamp += 1;
        self.order.clear();

        debug_assert!(!blocked(start));
        self.visited[start as usize] = self.stamp;
        self.distance[start as usize] = 0;
        self.arrived_by[start as usize] = u8::MAX;
        self.order.push(start);

        let mut head = 0;

        while head < self.order.len() {
            let current = self.order[head];
            head += 1;

            for dir in Direction::ALL {
                let next = geometry.player_neighbor(current, dir);

                if next != NONE && self.visited[next as usize] != self.stamp && !blocked(next) {
                    self.visited[next as usize] = self.stamp;
                    self.distance[next as usize] = self.distance[current as usize] + 1;
                    self.arrived_by[next as usize] = dir.as_byte();
                    self.order.push(next);
                }
            }
        }
    }

    pub fn is_reachable(&self, p: u16) -> bool {
        self.visited[p as usize] == self.stamp
    }

    /// Move distance from the start of the last [`compute`], if reachable.
    ///
    /// # Arguments
    ///
    /// * `p` -
    ///
    pub fn distance(&self, p: u16) -> Option<u32> {
        if self.is_reachable(p) {
            Some(self.distance[p as usize])
        } else {
            None
        }
    }

    /// All reached positions in increasing move distance, starting with the
    /// BFS origin itself.
    pub fn order(&self) -> &[u16] {
        &self.order
    }

    /// One shortest move sequence from the BFS origin to `target`. The
    /// target must be reachable.
    ///
    /// # Arguments
    ///
    /// * `geometry` -
    /// * `target` -
    ///
    pub fn path_to(&self, geometry: &Geometry, target: u16) -> Vec<Direction> {
        debug_assert!(self.is_reachable(target));

        let mut path = Vec::with_capacity(self.distance[target as usize] as usize);
        let mut current = target;

        while self.arrived_by[current as usize] != u8::MAX {
            let dir = Direction::from_byte(self.arrived_by[current as usize]).unwrap();

            path.push(dir);
            current = geometry.player_neighbor(current, dir.opposite());
            debug_assert_ne!(current, NONE);
        }

        path.reverse();
        path
    }
}
