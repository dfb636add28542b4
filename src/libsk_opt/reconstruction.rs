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

use std::sync::Mutex;

use crossbeam_utils::thread;
use tracing::debug;

use sk_board::{Axis, Direction, Geometry, NONE};

use crate::box_configuration::BoxConfiguration;
use crate::configuration_set::BoxConfigurationSet;
use crate::meeting::MeetingPoint;
use crate::options::SearchProfile;
use crate::position_storage::{BoardPositionStorage, SearchDirection};
use crate::reachability::PlayerReachability;
use crate::search::{has_adjacent_box, last_pushed_box};

/// One post-push state of the seed solution, with the metrics the seed
/// itself accumulates up to that push. Used to splice a partially searched
/// prefix back onto the seed after a cancellation.
#[derive(Clone, Copy, Debug)]
pub struct SeedState {
    pub cfg: u32,
    pub player: u16,
    pub plane: usize,
    pub primary: u32,
    pub secondary: u32,
    /// Index of the push in the seed's move bytes.
    pub move_index: usize
}

/// Recovers concrete move sequences from the board-position storage by
/// walking chains of exactly-matching metrics. Everything here runs after
/// the search workers have quiesced: at quiescence every stored value
/// satisfies the one-step optimality equation, so following equal metrics
/// backwards always reaches a first-push state.
pub struct Reconstruction<'a> {
    pub geometry: &'a Geometry,
    pub set: &'a BoxConfigurationSet,
    pub storage: &'a BoardPositionStorage,
    pub profile: &'a SearchProfile,
    pub start_cfg: u32,
    pub start_player: u16,
    pub target_cfg: u32,
    pub end_player: Option<u16>,
    pub prefix_axis: Option<Axis>
}

enum BackStep {
    /// Reached the start configuration; the final move bytes are assembled.
    Done(Vec<u8>),
    /// Stepped to a predecessor state; `cfg` already holds its bits.
    Into {
        player: u16,
        plane: usize,
        primary: u32,
        secondary: u32,
        bytes: Vec<u8>
    },
    /// No consistent predecessor through this undo direction.
    Dead
}

impl Reconstruction<'_> {
    /// Reconstructs the best move sequence among the recorded rendezvous
    /// points, trying the most promising `num_threads` candidates in
    /// parallel.
    ///
    /// # Arguments
    ///
    /// * `meetings` -
    /// * `num_threads` -
    ///
    pub fn best_solution(&self, meetings: &[MeetingPoint], num_threads: usize) -> Option<Vec<u8>> {
        let mut scored = meetings.iter()
            .filter_map(|&point| {
                let slot = self.storage.slot(point.cfg, point.player, point.plane as usize);
                let (fp, fs) = self.storage.get(SearchDirection::Forward, slot)?;
                let (bp, bs) = if self.profile.bidirectional {
                    self.storage.get(SearchDirection::Backward, slot)?
                } else {
                    (0, 0)
                };
                let score = ((fp + bp) as u64) << 32 | (fs + bs) as u64;

                Some((score, point))
            })
            .collect::<Vec<_>>();

        scored.sort_by_key(|&(score, _)| score);
        scored.truncate(num_threads.max(1));
        debug!(candidates = scored.len(), "reconstructing rendezvous candidates");

        let best: Mutex<Option<(usize, Vec<u8>)>> = Mutex::new(None);

        thread::scope(|scope| {
            for (rank, &(_, point)) in scored.iter().enumerate() {
                let best = &best;

                scope.spawn(move |_| {
                    if let Some(bytes) = self.reconstruct_from(point) {
                        let mut best = best.lock().expect("could not acquire lock");

                        match best.as_ref() {
                            Some(&(best_rank, _)) if best_rank <= rank => {},
                            _ => *best = Some((rank, bytes))
                        }
                    }
                });
            }
        }).expect("reconstruction worker panicked");

        let result = best.into_inner().expect("could not acquire lock");
        result.map(|(_, bytes)| bytes)
    }

    /// Splices the best partially searched prefix onto the tail of the seed
    /// solution. Used after a cancellation, when no rendezvous was recorded;
    /// returns `None` if nothing stored improves on the seed's own states.
    ///
    /// # Arguments
    ///
    /// * `seed_path` -
    /// * `seed_moves` -
    ///
    pub fn salvage(&self, seed_path: &[SeedState], seed_moves: &[u8]) -> Option<Vec<u8>> {
        for state in seed_path.iter().rev() {
            let slot = self.storage.slot(state.cfg, state.player, state.plane);

            if let Some((primary, secondary)) = self.storage.get(SearchDirection::Forward, slot) {
                if (primary, secondary) < (state.primary, state.secondary) {
                    if let Some(mut bytes) = self.trace_back(
                        state.cfg, state.player, state.plane, primary, secondary
                    ) {
                        bytes.extend_from_slice(&seed_moves[state.move_index + 1..]);

                        return Some(bytes);
                    }
                }
            }
        }

        None
    }

    fn reconstruct_from(&self, point: MeetingPoint) -> Option<Vec<u8>> {
        let slot = self.storage.slot(point.cfg, point.player, point.plane as usize);
        let (fp, fs) = self.storage.get(SearchDirection::Forward, slot)?;
        let mut bytes = self.trace_back(point.cfg, point.player, point.plane as usize, fp, fs)?;

        if self.profile.bidirectional {
            let (bp, bs) = self.storage.get(SearchDirection::Backward, slot)?;

            bytes.extend(self.trace_forward(point.cfg, point.player, bp, bs)?);
        } else if let Some(end) = self.end_player {
            // the forward-only searches still owe the final walk
            let mut cfg = BoxConfiguration::empty(self.geometry.box_count());
            let mut reach = PlayerReachability::new(self.geometry.player_count());

            self.set.copy_into(point.cfg, &mut cfg);
            reach.compute(self.geometry, point.player, |p| {
                let b = self.geometry.box_of_player(p);

                b != NONE && cfg.has(b)
            });

            if !reach.is_reachable(end) {
                return None;
            }
            bytes.extend(reach.path_to(self.geometry, end).iter().map(|dir| dir.as_byte()));
        }

        Some(bytes)
    }

    /// Walks the forward-stored metrics from the given state back to the
    /// start configuration and returns the move bytes from the segment
    /// start up to and including the push producing the state.
    fn trace_back(
        &self,
        cfg_idx: u32,
        player: u16,
        plane: usize,
        primary: u32,
        secondary: u32
    ) -> Option<Vec<u8>>
    {
        let geometry = self.geometry;
        let mut cfg = BoxConfiguration::empty(geometry.box_count());
        let mut reach = PlayerReachability::new(geometry.player_count());
        let mut segments_rev: Vec<Vec<u8>> = vec! [];
        let (mut player, mut plane, mut primary, mut secondary) = (player, plane, primary, secondary);

        self.set.copy_into(cfg_idx, &mut cfg);

        // every step strictly shrinks the order value, which bounds the
        // chain length; running out means the storage is inconsistent
        let order = self.storage.order_value(primary, secondary)?;
        let mut guard = order / self.profile.min_delta + 2;

        'outer: loop {
            guard = guard.checked_sub(1)?;

            for dir in Direction::ALL {
                if self.profile.axis_planes == 2 && dir.axis() != Axis::from_plane(plane) {
                    continue;
                }

                let box_player = geometry.player_neighbor(player, dir);
                if box_player == NONE {
                    continue;
                }
                let b = geometry.box_of_player(box_player);
                if b == NONE || !cfg.has(b) {
                    continue;
                }
                let own_box = geometry.box_of_player(player);
                if own_box == NONE {
                    continue;
                }
                let back = geometry.player_neighbor(player, dir.opposite());
                if back == NONE {
                    continue;
                }
                let back_box = geometry.box_of_player(back);
                if back_box != NONE && cfg.has(back_box) {
                    continue;
                }

                cfg.move_box(b, own_box);

                match self.step_back(&cfg, &mut reach, dir, back, primary, secondary) {
                    BackStep::Done(bytes) => {
                        segments_rev.push(bytes);

                        let mut out = vec! [];
                        for segment in segments_rev.iter().rev() {
                            out.extend_from_slice(segment);
                        }

                        return Some(out);
                    },
                    BackStep::Into { player: q, plane: p, primary: pp, secondary: ps, bytes } => {
                        segments_rev.push(bytes);
                        player = q;
                        plane = p;
                        primary = pp;
                        secondary = ps;

                        continue 'outer;
                    },
                    BackStep::Dead => {
                        cfg.move_box(own_box, b);
                    }
                }
            }

            return None;
        }
    }

    /// Tries to resolve one undo of a push in direction `dir`, with the
    /// pre-push configuration already applied to `cfg`.
    fn step_back(
        &self,
        cfg: &BoxConfiguration,
        reach: &mut PlayerReachability,
        dir: Direction,
        back: u16,
        primary: u32,
        secondary: u32
    ) -> BackStep
    {
        let geometry = self.geometry;
        let pred_idx = match self.set.index_of(cfg) {
            None => return BackStep::Dead,
            Some(pred_idx) => pred_idx
        };

        // terminal: the undo reveals the start configuration and the
        // residual metrics are exactly one push from the segment start
        if pred_idx == self.start_cfg {
            reach.compute(geometry, self.start_player, |p| {
                let blocking = geometry.box_of_player(p);

                blocking != NONE && cfg.has(blocking)
            });

            if let Some(walk) = reach.distance(back) {
                let new_line = !(walk == 0 && self.prefix_axis == Some(dir.axis()));
                let initial_secondary = if self.profile.inverts_secondary() {
                    self.profile.invert_pushes(0)
                } else {
                    0
                };

                if self.profile.advance(0, initial_secondary, walk, new_line, true) == Some((primary, secondary)) {
                    let mut bytes = reach.path_to(geometry, back).iter()
                        .map(|step| step.as_byte())
                        .collect::<Vec<_>>();
                    bytes.push(dir.as_byte());

                    return BackStep::Done(bytes);
                }
            }
        }

        // otherwise a stored predecessor state must account for the
        // residual metrics exactly
        reach.compute(geometry, back, |p| {
            let blocking = geometry.box_of_player(p);

            blocking != NONE && cfg.has(blocking)
        });

        for i in 0..reach.order().len() {
            let q = reach.order()[i];
            let walk = reach.distance(q).expect("unreachable position in BFS order");

            if !has_adjacent_box(geometry, cfg, q) {
                continue;
            }

            for pred_plane in 0..self.profile.axis_planes {
                let slot = self.storage.slot(pred_idx, q, pred_plane);
                let (sp, ss) = match self.storage.get(SearchDirection::Forward, slot) {
                    None => continue,
                    Some(stored) => stored
                };

                let pred_axis = Axis::from_plane(pred_plane);
                let new_line = !(walk == 0 && self.profile.axis_planes == 2 && dir.axis() == pred_axis);
                // the box this step pushes sits one cell past the pre-push
                // player position; compare it against the predecessor's own
                // last-pushed box
                let box_change = self.profile.axis_planes != 2
                    || last_pushed_box(geometry, cfg, q, pred_axis) != pushed_box_of(geometry, cfg, back, dir);

                if self.profile.advance(sp, ss, walk, new_line, box_change) == Some((primary, secondary)) {
                    let mut bytes = reach.path_to(geometry, q).iter()
                        .rev()
                        .map(|step| step.opposite().as_byte())
                        .collect::<Vec<_>>();
                    bytes.push(dir.as_byte());

                    return BackStep::Into {
                        player: q,
                        plane: pred_plane,
                        primary: sp,
                        secondary: ss,
                        bytes
                    };
                }
            }
        }

        BackStep::Dead
    }

    /// Walks the backward-stored metrics from the given state forward to the
    /// target configuration, returning the move bytes after the state.
    fn trace_forward(&self, cfg_idx: u32, player: u16, primary: u32, secondary: u32) -> Option<Vec<u8>> {
        let geometry = self.geometry;
        let mut cfg = BoxConfiguration::empty(geometry.box_count());
        let mut reach = PlayerReachability::new(geometry.player_count());
        let mut out = vec! [];
        let (mut cfg_idx, mut player, mut primary, mut secondary) = (cfg_idx, player, primary, secondary);

        self.set.copy_into(cfg_idx, &mut cfg);

        let order = self.storage.order_value(primary, secondary)?;
        let mut guard = order / self.profile.min_delta + 2;

        'outer: loop {
            guard = guard.checked_sub(1)?;

            reach.compute(geometry, player, |p| {
                let blocking = geometry.box_of_player(p);

                blocking != NONE && cfg.has(blocking)
            });

            // terminal: on the target with nothing but the final walk left
            if cfg_idx == self.target_cfg {
                let done = match self.end_player {
                    None => (primary, secondary) == (0, 0),
                    Some(end) => primary == 0 && reach.distance(end) == Some(secondary)
                };

                if done {
                    if let Some(end) = self.end_player {
                        out.extend(reach.path_to(geometry, end).iter().map(|step| step.as_byte()));
                    }

                    return Some(out);
                }
            }

            for i in 0..reach.order().len() {
                let x = reach.order()[i];
                let walk = reach.distance(x).expect("unreachable position in BFS order");

                for dir in Direction::ALL {
                    let box_player = geometry.player_neighbor(x, dir);
                    if box_player == NONE {
                        continue;
                    }
                    let b = geometry.box_of_player(box_player);
                    if b == NONE || !cfg.has(b) {
                        continue;
                    }
                    let to = geometry.box_neighbor(b, dir);
                    if to == NONE || cfg.has(to) {
                        continue;
                    }

                    cfg.move_box(b, to);

                    if let Some(succ_idx) = self.set.index_of(&cfg) {
                        let slot = self.storage.slot(succ_idx, box_player, 0);

                        if let Some((sp, ss)) = self.storage.get(SearchDirection::Backward, slot) {
                            if self.profile.advance(sp, ss, walk, true, true) == Some((primary, secondary)) {
                                out.extend(reach.path_to(geometry, x).iter().map(|step| step.as_byte()));
                                out.push(dir.as_byte());
                                cfg_idx = succ_idx;
                                player = box_player;
                                primary = sp;
                                secondary = ss;

                                continue 'outer;
                            }
                        }
                    }

                    cfg.move_box(to, b);
                }
            }

            return None;
        }
    }
}

fn pushed_box_of(geometry: &Geometry, pre_cfg: &BoxConfiguration, back: u16, dir: Direction) -> u16 {
    // in the pre-push configuration the pushed box sits one step beyond the
    // pre-push player cell
    let cell = geometry.player_neighbor(back, dir);

    if cell == NONE {
        NONE
    } else {
        let b = geometry.box_of_player(cell);

        if b != NONE && pre_cfg.has(b) { b } else { NONE }
    }
}
