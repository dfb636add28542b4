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

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::thread;
use tracing::debug;

use sk_board::{Axis, Direction, Geometry, NONE};

use crate::box_configuration::BoxConfiguration;
use crate::bucket_queue::BucketPriorityQueue;
use crate::configuration_set::BoxConfigurationSet;
use crate::meeting::{MeetingPoint, MeetingPoints};
use crate::options::SearchProfile;
use crate::position_storage::{AddOutcome, BoardPositionStorage, SearchDirection};
use crate::progress::ProgressSink;
use crate::reachability::PlayerReachability;
use crate::status::StatusFlag;

/// Everything the search workers share. All references outlive the worker
/// scope; the mutable scratch lives on each worker's own stack.
pub struct SearchContext<'a> {
    pub geometry: &'a Geometry,
    pub set: &'a BoxConfigurationSet,
    pub storage: &'a BoardPositionStorage,
    pub profile: &'a SearchProfile,
    pub status: &'a StatusFlag,
    pub meetings: &'a MeetingPoints,
    pub forward_queue: &'a BucketPriorityQueue,
    pub backward_queue: Option<&'a BucketPriorityQueue>,
    /// Dense index of the seed solution's starting configuration.
    pub start_cfg: u32,
    /// Player position before the first move of the segment.
    pub start_player: u16,
    /// Dense index of the configuration every solution must reach.
    pub target_cfg: u32,
    /// Player position the solution must end on, if it is preserved.
    pub end_player: Option<u16>,
    /// Axis of the push right before the segment, for box-line continuity.
    pub prefix_axis: Option<Axis>,
    /// Racy display counter: the deepest primary metric any worker has
    /// started expanding. Only ever grows.
    pub deepest: AtomicU32,
    pub sink: &'a dyn ProgressSink
}

/// How many workers each direction gets. Both directions get at least one;
/// with a single cpu the two workers run back to back instead.
pub fn thread_split(num_threads: usize, bidirectional: bool) -> (usize, usize) {
    let num_threads = num_threads.max(1);

    if bidirectional {
        ((num_threads + 1) / 2, (num_threads / 2).max(1))
    } else {
        (num_threads, 0)
    }
}

/// Seeds both queues and runs the worker pool to quiescence. On return
/// either both queues are drained or the status flag carries a stop reason.
///
/// # Arguments
///
/// * `ctx` -
/// * `num_threads` - total worker budget, split via [`thread_split`]
///
pub fn run_search(ctx: &SearchContext, num_threads: usize) {
    let (forward_threads, backward_threads) = thread_split(num_threads, ctx.profile.bidirectional);
    let mut cfg = BoxConfiguration::empty(ctx.geometry.box_count());
    let mut reach = PlayerReachability::new(ctx.geometry.player_count());

    // backward first: forward seeds then rendezvous against the target
    // states right away on trivially short solutions
    if ctx.profile.bidirectional {
        seed_backward(ctx, &mut cfg, &mut reach);
    }
    seed_forward(ctx, &mut cfg, &mut reach);

    debug!(
        forward = ctx.forward_queue.pending(),
        backward = ctx.backward_queue.map(|queue| queue.pending()).unwrap_or(0),
        "search seeded"
    );

    if ctx.profile.bidirectional && num_threads <= 1 {
        // not enough workers to run both directions side by side
        backward_worker(ctx, 0);
        forward_worker(ctx, 0);
    } else {
        thread::scope(|scope| {
            for t in 0..forward_threads {
                scope.builder()
                    .name(format!("forward_worker_{}", t))
                    .spawn(move |_| forward_worker(ctx, t))
                    .expect("could not spawn forward worker");
            }
            for t in 0..backward_threads {
                scope.builder()
                    .name(format!("backward_worker_{}", t))
                    .spawn(move |_| backward_worker(ctx, t))
                    .expect("could not spawn backward worker");
            }
        }).expect("search worker panicked");
    }

    debug!(meetings = ctx.meetings.len(), "search finished");
}

fn forward_worker(ctx: &SearchContext, thread: usize) {
    let mut cfg = BoxConfiguration::empty(ctx.geometry.box_count());
    let mut reach = PlayerReachability::new(ctx.geometry.player_count());

    while let Some(slot) = ctx.forward_queue.remove_first(thread, |slot| {
        ctx.storage.is_processed(SearchDirection::Forward, slot)
    }) {
        let (primary, secondary) = match ctx.storage.mark_processed(SearchDirection::Forward, slot) {
            None => continue,
            Some(metrics) => metrics
        };
        let (cfg_idx, player, plane) = ctx.storage.unpack_slot(slot);

        publish_depth(ctx, primary);
        ctx.set.copy_into(cfg_idx, &mut cfg);
        expand_forward(ctx, &mut cfg, player, plane, primary, secondary, &mut reach);

        if ctx.status.is_stopped() {
            break;
        }
    }
}

fn backward_worker(ctx: &SearchContext, thread: usize) {
    let queue = ctx.backward_queue.expect("backward worker without a backward queue");
    let mut cfg = BoxConfiguration::empty(ctx.geometry.box_count());
    let mut reach = PlayerReachability::new(ctx.geometry.player_count());

    while let Some(slot) = queue.remove_first(thread, |slot| {
        ctx.storage.is_processed(SearchDirection::Backward, slot)
    }) {
        let (primary, secondary) = match ctx.storage.mark_processed(SearchDirection::Backward, slot) {
            None => continue,
            Some(metrics) => metrics
        };
        let (cfg_idx, player, _) = ctx.storage.unpack_slot(slot);

        ctx.set.copy_into(cfg_idx, &mut cfg);
        expand_backward(ctx, &mut cfg, player, primary, secondary, &mut reach);

        if ctx.status.is_stopped() {
            break;
        }
    }
}

/// Expands a post-push board position: BFS over the player-reachable area,
/// then one successor per pushable box and direction.
fn expand_forward(
    ctx: &SearchContext,
    cfg: &mut BoxConfiguration,
    player: u16,
    plane: usize,
    primary: u32,
    secondary: u32,
    reach: &mut PlayerReachability
) {
    let geometry = ctx.geometry;
    let axis_planes = ctx.profile.axis_planes;
    let current_axis = Axis::from_plane(plane);
    let last_box = if axis_planes == 2 {
        last_pushed_box(geometry, cfg, player, current_axis)
    } else {
        NONE
    };

    reach.compute(geometry, player, |p| {
        let b = geometry.box_of_player(p);

        b != NONE && cfg.has(b)
    });

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

            if let Some(succ_idx) = ctx.set.index_of(cfg) {
                // a push without any walk along the stored axis continues
                // the current box line; everything else breaks it
                let new_line = !(walk == 0 && axis_planes == 2 && dir.axis() == current_axis);
                let box_change = axis_planes != 2 || b != last_box;

                if let Some((next_primary, next_secondary)) =
                    ctx.profile.advance(primary, secondary, walk, new_line, box_change)
                {
                    if let Some(order) = ctx.storage.order_value(next_primary, next_secondary) {
                        let succ_plane = if axis_planes == 2 { dir.axis().as_plane() } else { 0 };

                        deliver_forward(ctx, succ_idx, box_player, succ_plane, order, to);
                    }
                }
            }

            cfg.move_box(to, b);
        }
    }
}

/// Expands a backward state: un-does one candidate last push, then records
/// every box-adjacent position of the resulting player area as a
/// predecessor.
fn expand_backward(
    ctx: &SearchContext,
    cfg: &mut BoxConfiguration,
    player: u16,
    primary: u32,
    secondary: u32,
    reach: &mut PlayerReachability
) {
    let geometry = ctx.geometry;
    let own_box = geometry.box_of_player(player);
    if own_box == NONE {
        return;
    }

    for dir in Direction::ALL {
        // the push being un-done drove the box from the player's cell
        // towards `dir`; the player backs off to the opposite side
        let box_player = geometry.player_neighbor(player, dir);
        if box_player == NONE {
            continue;
        }
        let b = geometry.box_of_player(box_player);
        if b == NONE || !cfg.has(b) {
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

        if let Some(pred_idx) = ctx.set.index_of(cfg) {
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

                if let Some((next_primary, next_secondary)) =
                    ctx.profile.advance(primary, secondary, walk, true, true)
                {
                    if let Some(order) = ctx.storage.order_value(next_primary, next_secondary) {
                        deliver_backward(ctx, pred_idx, q, order);
                    }
                }
            }
        }

        cfg.move_box(own_box, b);
    }
}

/// Enqueues the start states: every first push reachable from the starting
/// player position.
fn seed_forward(ctx: &SearchContext, cfg: &mut BoxConfiguration, reach: &mut PlayerReachability) {
    let geometry = ctx.geometry;
    ctx.set.copy_into(ctx.start_cfg, cfg);

    reach.compute(geometry, ctx.start_player, |p| {
        let b = geometry.box_of_player(p);

        b != NONE && cfg.has(b)
    });

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

            if let Some(succ_idx) = ctx.set.index_of(cfg) {
                // the first push may continue a box line across the segment
                // boundary
                let new_line = !(walk == 0 && ctx.prefix_axis == Some(dir.axis()));
                let initial_secondary = if ctx.profile.inverts_secondary() {
                    ctx.profile.invert_pushes(0)
                } else {
                    0
                };

                if let Some((next_primary, next_secondary)) =
                    ctx.profile.advance(0, initial_secondary, walk, new_line, true)
                {
                    if let Some(order) = ctx.storage.order_value(next_primary, next_secondary) {
                        let succ_plane = if ctx.profile.axis_planes == 2 {
                            dir.axis().as_plane()
                        } else {
                            0
                        };

                        deliver_forward(ctx, succ_idx, box_player, succ_plane, order, to);
                    }
                }
            }

            cfg.move_box(to, b);
        }
    }
}

/// Enqueues the end states: every board position of the target
/// configuration that some final push could have produced.
fn seed_backward(ctx: &SearchContext, cfg: &mut BoxConfiguration, reach: &mut PlayerReachability) {
    let geometry = ctx.geometry;
    ctx.set.copy_into(ctx.target_cfg, cfg);

    if let Some(end_player) = ctx.end_player {
        reach.compute(geometry, end_player, |p| {
            let b = geometry.box_of_player(p);

            b != NONE && cfg.has(b)
        });
    }

    let target_boxes = cfg.boxes().collect::<Vec<_>>();

    for t in target_boxes {
        let box_player = geometry.player_of_box(t);

        for dir in Direction::ALL {
            // a final push towards `dir` left the player right behind the box
            let q = geometry.player_neighbor(box_player, dir.opposite());
            if q == NONE {
                continue;
            }

            // the player's cell held the box before the push
            let q_box = geometry.box_of_player(q);
            if q_box == NONE || cfg.has(q_box) {
                continue;
            }

            // and the player stood one cell further back
            let pre = geometry.player_neighbor(q, dir.opposite());
            if pre == NONE {
                continue;
            }
            let pre_box = geometry.box_of_player(pre);
            if pre_box != NONE && cfg.has(pre_box) && pre_box != t {
                continue;
            }

            let walk_to_end = match ctx.end_player {
                None => 0,
                Some(_) => match reach.distance(q) {
                    None => continue,
                    Some(distance) => distance
                }
            };

            if let Some(order) = ctx.storage.order_value(0, walk_to_end) {
                deliver_backward(ctx, ctx.target_cfg, q, order);
            }
        }
    }
}

fn deliver_forward(
    ctx: &SearchContext,
    cfg_idx: u32,
    player: u16,
    plane: usize,
    order: u32,
    last_box: u16
) {
    let slot = ctx.storage.slot(cfg_idx, player, plane);

    match ctx.storage.add_if_better(SearchDirection::Forward, slot, order) {
        AddOutcome::NotBetter => {},
        AddOutcome::Better(slot) => {
            ctx.forward_queue.add(order, slot);

            // without a backward search, reaching the target configuration
            // is the solution signal
            if !ctx.profile.bidirectional && cfg_idx == ctx.target_cfg {
                ctx.meetings.insert(MeetingPoint {
                    cfg: cfg_idx,
                    player,
                    plane: plane as u8,
                    last_box
                });
            }
        },
        AddOutcome::Rendezvous(slot) => {
            ctx.forward_queue.add(order, slot);
            ctx.meetings.insert(MeetingPoint {
                cfg: cfg_idx,
                player,
                plane: plane as u8,
                last_box
            });
        }
    }
}

fn deliver_backward(ctx: &SearchContext, cfg_idx: u32, player: u16, order: u32) {
    let queue = ctx.backward_queue.expect("backward delivery without a backward queue");
    let slot = ctx.storage.slot(cfg_idx, player, 0);

    match ctx.storage.add_if_better(SearchDirection::Backward, slot, order) {
        AddOutcome::NotBetter => {},
        AddOutcome::Better(slot) => {
            queue.add(order, slot);
        },
        AddOutcome::Rendezvous(slot) => {
            queue.add(order, slot);
            ctx.meetings.insert(MeetingPoint {
                cfg: cfg_idx,
                player,
                plane: 0,
                last_box: NONE
            });
        }
    }
}

/// The box last pushed to produce a post-push state: with an axis-indexed
/// slot it is the unique box next to the player along the stored axis (the
/// opposite cell is the one the player just vacated, so it cannot hold a
/// box).
pub fn last_pushed_box(geometry: &Geometry, cfg: &BoxConfiguration, player: u16, axis: Axis) -> u16 {
    for dir in axis_directions(axis) {
        let neighbor = geometry.player_neighbor(player, dir);

        if neighbor != NONE {
            let b = geometry.box_of_player(neighbor);

            if b != NONE && cfg.has(b) {
                return b;
            }
        }
    }

    NONE
}

pub fn axis_directions(axis: Axis) -> [Direction; 2] {
    match axis {
        Axis::Vertical => [Direction::Up, Direction::Down],
        Axis::Horizontal => [Direction::Left, Direction::Right]
    }
}

pub fn has_adjacent_box(geometry: &Geometry, cfg: &BoxConfiguration, player: u16) -> bool {
    Direction::ALL.iter().any(|&dir| {
        let neighbor = geometry.player_neighbor(player, dir);

        neighbor != NONE && {
            let b = geometry.box_of_player(neighbor);

            b != NONE && cfg.has(b)
        }
    })
}

fn publish_depth(ctx: &SearchContext, primary: u32) {
    let shown = ctx.deepest.fetch_max(primary, Ordering::Relaxed);

    if shown < primary {
        // the counter is intentionally racy; it must only stay a lower
        // bound of the depth some worker has reached
        debug_assert!(ctx.deepest.load(Ordering::Relaxed) >= primary);

        ctx.sink.set_info_text(&format!(
            "depth {} of {}, {} positions pending",
            primary,
            ctx.profile.primary_limit,
            ctx.forward_queue.pending()
        ));
    }
}
