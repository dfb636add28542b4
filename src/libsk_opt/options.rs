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

use sk_board::Metrics;

use crate::error::OptimizerError;
use crate::position_storage::MAX_ORDER_VALUE;

/// What to optimize, and in which priority. The names read
/// `Primary<Secondary>`; the `..All` variants additionally break ties on
/// every remaining metric when two solutions are compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizationMethod {
    MovesPushes,
    PushesMoves,
    MovesPushesAll,
    PushesMovesAll,
    MovesHighestPushes,
    BoxLinesMoves,
    BoxLinesPushes,
    BoxLinesOnly,
    BoxChangesMoves,
    BoxChangesPushes,
    BoxChangesOnly
}

/// One of the countable solution metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Moves,
    Pushes,
    BoxLines,
    BoxChanges,
    PushingSessions
}

impl MetricKind {
    pub fn of(self, metrics: &Metrics) -> usize {
        match self {
            MetricKind::Moves => metrics.moves,
            MetricKind::Pushes => metrics.pushes,
            MetricKind::BoxLines => metrics.box_lines,
            MetricKind::BoxChanges => metrics.box_changes,
            MetricKind::PushingSessions => metrics.pushing_sessions
        }
    }
}

impl OptimizationMethod {
    pub const ALL: [OptimizationMethod; 11] = [
        OptimizationMethod::MovesPushes,
        OptimizationMethod::PushesMoves,
        OptimizationMethod::MovesPushesAll,
        OptimizationMethod::PushesMovesAll,
        OptimizationMethod::MovesHighestPushes,
        OptimizationMethod::BoxLinesMoves,
        OptimizationMethod::BoxLinesPushes,
        OptimizationMethod::BoxLinesOnly,
        OptimizationMethod::BoxChangesMoves,
        OptimizationMethod::BoxChangesPushes,
        OptimizationMethod::BoxChangesOnly
    ];

    pub fn primary(self) -> MetricKind {
        match self {
            OptimizationMethod::MovesPushes
            | OptimizationMethod::MovesPushesAll
            | OptimizationMethod::MovesHighestPushes => MetricKind::Moves,
            OptimizationMethod::PushesMoves
            | OptimizationMethod::PushesMovesAll => MetricKind::Pushes,
            OptimizationMethod::BoxLinesMoves
            | OptimizationMethod::BoxLinesPushes
            | OptimizationMethod::BoxLinesOnly => MetricKind::BoxLines,
            OptimizationMethod::BoxChangesMoves
            | OptimizationMethod::BoxChangesPushes
            | OptimizationMethod::BoxChangesOnly => MetricKind::BoxChanges
        }
    }

    /// The secondary metric of the *comparator*. `None` for the `..Only`
    /// methods, which rank solutions by the primary metric alone.
    pub fn secondary(self) -> Option<MetricKind> {
        match self {
            OptimizationMethod::MovesPushes
            | OptimizationMethod::MovesPushesAll
            | OptimizationMethod::MovesHighestPushes => Some(MetricKind::Pushes),
            OptimizationMethod::PushesMoves
            | OptimizationMethod::PushesMovesAll => Some(MetricKind::Moves),
            OptimizationMethod::BoxLinesMoves
            | OptimizationMethod::BoxChangesMoves => Some(MetricKind::Moves),
            OptimizationMethod::BoxLinesPushes
            | OptimizationMethod::BoxChangesPushes => Some(MetricKind::Pushes),
            OptimizationMethod::BoxLinesOnly
            | OptimizationMethod::BoxChangesOnly => None
        }
    }

    /// The secondary metric packed into order values by the *search*. The
    /// `..Only` methods still pack pushes so that every expansion step
    /// strictly increases the order value.
    pub fn search_secondary(self) -> MetricKind {
        self.secondary().unwrap_or(MetricKind::Pushes)
    }

    /// `MovesHighestPushes` rewards a *larger* secondary metric; the storage
    /// keeps `ceiling - pushes` instead so that smaller stays better.
    pub fn inverts_secondary(self) -> bool {
        self == OptimizationMethod::MovesHighestPushes
    }

    /// Whether both a forward and a backward search run. The axis-sensitive
    /// and inverted objectives are forward-only.
    pub fn is_bidirectional(self) -> bool {
        matches!(
            self,
            OptimizationMethod::MovesPushes
            | OptimizationMethod::PushesMoves
            | OptimizationMethod::MovesPushesAll
            | OptimizationMethod::PushesMovesAll
        )
    }

    /// The number of storage planes per board position: 2 when the slot is
    /// additionally indexed by the axis of the last push.
    pub fn axis_planes(self) -> usize {
        match self.primary() {
            MetricKind::BoxLines | MetricKind::BoxChanges => 2,
            _ => 1
        }
    }

    /// Compares two solutions under this method, `Less` meaning better.
    ///
    /// # Arguments
    ///
    /// * `a` -
    /// * `b` -
    ///
    pub fn compare(self, a: &Metrics, b: &Metrics) -> Ordering {
        let primary = self.primary().of(a).cmp(&self.primary().of(b));
        let secondary = match self.secondary() {
            None => Ordering::Equal,
            Some(kind) => {
                let ordering = kind.of(a).cmp(&kind.of(b));

                if self.inverts_secondary() { ordering.reverse() } else { ordering }
            }
        };

        primary.then(secondary).then_with(|| {
            if self.ranks_all_metrics() {
                let a_rest = (a.box_lines, a.box_changes, a.pushing_sessions, a.moves, a.pushes);
                let b_rest = (b.box_lines, b.box_changes, b.pushing_sessions, b.moves, b.pushes);

                a_rest.cmp(&b_rest)
            } else {
                Ordering::Equal
            }
        })
    }

    pub fn is_improvement(self, candidate: &Metrics, incumbent: &Metrics) -> bool {
        self.compare(candidate, incumbent) == Ordering::Less
    }

    fn ranks_all_metrics(self) -> bool {
        matches!(self, OptimizationMethod::MovesPushesAll | OptimizationMethod::PushesMovesAll)
    }
}

/// Everything the search workers need to turn `(walk, push)` steps into
/// packed order values, fixed once per search from the seed solution.
#[derive(Clone, Copy, Debug)]
pub struct SearchProfile {
    pub method: OptimizationMethod,
    pub bidirectional: bool,
    pub axis_planes: usize,
    /// Exclusive upper bound of the stored secondary metric.
    pub secondary_max: u32,
    /// For the inverted secondary: the stored value is `ceiling - pushes`.
    pub pushes_ceiling: u32,
    /// Inclusive upper bound of the stored primary metric; successors beyond
    /// it cannot beat the seed and are pruned.
    pub primary_limit: u32,
    pub min_delta: u32,
    pub max_delta: u32
}

impl SearchProfile {
    /// Derives the packing parameters for a search seeded with a solution of
    /// the given metrics.
    ///
    /// # Arguments
    ///
    /// * `method` -
    /// * `seed` -
    /// * `player_count` -
    ///
    pub fn build(
        method: OptimizationMethod,
        seed: &Metrics,
        player_count: usize
    ) -> Result<SearchProfile, OptimizerError>
    {
        let p = player_count as u64;
        let seed_primary = method.primary().of(seed) as u64;
        let seed_secondary = method.search_secondary().of(seed) as u64;

        // the secondary of an improved solution may exceed the seed's, but
        // not without first improving the primary; everything past this
        // ceiling is pruned (see DESIGN.md)
        let secondary_max = match method.search_secondary() {
            MetricKind::Pushes => 3 * seed_secondary + 2,
            _ => 3 * seed_secondary + p + 2
        };
        let primary_limit = seed_primary;

        let (min_primary_delta, max_primary_delta) = match method.primary() {
            MetricKind::Moves => (1, p),
            MetricKind::Pushes => (1, 1),
            MetricKind::BoxLines | MetricKind::BoxChanges => (0, 1),
            MetricKind::PushingSessions => (0, 1)
        };
        let (min_secondary_delta, max_secondary_delta) = match method.search_secondary() {
            MetricKind::Pushes => (1, 1),
            _ => (1, p)
        };

        let (min_delta, max_delta) = if method.inverts_secondary() {
            // the stored secondary decreases by one per push
            (min_primary_delta * secondary_max - 1, max_primary_delta * secondary_max - 1)
        } else {
            (
                min_primary_delta * secondary_max + min_secondary_delta,
                max_primary_delta * secondary_max + max_secondary_delta
            )
        };

        let worst_order = primary_limit
            .checked_mul(secondary_max)
            .and_then(|v| v.checked_add(secondary_max - 1));

        match worst_order {
            Some(worst) if worst <= MAX_ORDER_VALUE as u64 && max_delta <= MAX_ORDER_VALUE as u64 => {
                Ok(SearchProfile {
                    method,
                    bidirectional: method.is_bidirectional(),
                    axis_planes: method.axis_planes(),
                    secondary_max: secondary_max as u32,
                    pushes_ceiling: (secondary_max - 1) as u32,
                    primary_limit: primary_limit as u32,
                    min_delta: min_delta.max(1) as u32,
                    max_delta: max_delta as u32
                })
            },
            _ => Err(OptimizerError::InvalidInput(format!(
                "solution of {} {:?} / {} {:?} exceeds the order-value budget on this level",
                seed_primary, method.primary(), seed_secondary, method.search_secondary()
            )))
        }
    }

    /// Advances stored `(primary, secondary)` metrics by one push preceded
    /// by `walk` plain moves. Returns `None` when the successor leaves the
    /// packing budget and must be pruned.
    ///
    /// # Arguments
    ///
    /// * `primary` -
    /// * `secondary` -
    /// * `walk` -
    /// * `new_line` - the push starts a new box line
    /// * `box_change` - the push moves a different box than the previous one
    ///
    pub fn advance(
        &self,
        primary: u32,
        secondary: u32,
        walk: u32,
        new_line: bool,
        box_change: bool
    ) -> Option<(u32, u32)>
    {
        let primary_delta = match self.method.primary() {
            MetricKind::Moves => walk + 1,
            MetricKind::Pushes => 1,
            MetricKind::BoxLines => new_line as u32,
            MetricKind::BoxChanges | MetricKind::PushingSessions => box_change as u32
        };
        let primary = primary + primary_delta;

        if primary > self.primary_limit {
            return None;
        }

        let secondary = if self.inverts_secondary() {
            // one more push, stored as `ceiling - pushes`
            secondary.checked_sub(1)?
        } else {
            let delta = match self.method.search_secondary() {
                MetricKind::Pushes => 1,
                _ => walk + 1
            };
            let secondary = secondary + delta;

            if secondary >= self.secondary_max {
                return None;
            }

            secondary
        };

        Some((primary, secondary))
    }

    pub fn inverts_secondary(&self) -> bool {
        self.method.inverts_secondary()
    }

    /// The stored secondary value representing `pushes` pushes under the
    /// inverted objective.
    ///
    /// # Arguments
    ///
    /// * `pushes` -
    ///
    pub fn invert_pushes(&self, pushes: u32) -> u32 {
        debug_assert!(self.inverts_secondary());

        self.pushes_ceiling - pushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(moves: usize, pushes: usize) -> Metrics {
        Metrics { moves, pushes, box_lines: 3, box_changes: 2, pushing_sessions: 2 }
    }

    #[test]
    fn comparator_priorities() {
        let a = metrics(10, 5);
        let b = metrics(12, 4);

        assert_eq!(OptimizationMethod::MovesPushes.compare(&a, &b), Ordering::Less);
        assert_eq!(OptimizationMethod::PushesMoves.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn highest_pushes_prefers_more_pushes() {
        let a = metrics(10, 8);
        let b = metrics(10, 5);

        assert_eq!(OptimizationMethod::MovesHighestPushes.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn all_variants_break_ties_on_remaining_metrics() {
        let mut a = metrics(10, 5);
        let b = metrics(10, 5);
        a.pushing_sessions = 1;

        assert_eq!(OptimizationMethod::MovesPushes.compare(&a, &b), Ordering::Equal);
        assert_eq!(OptimizationMethod::MovesPushesAll.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn only_methods_rank_primary_alone() {
        let mut a = metrics(10, 9);
        let mut b = metrics(20, 2);
        a.box_lines = 4;
        b.box_lines = 4;

        assert_eq!(OptimizationMethod::BoxLinesOnly.compare(&a, &b), Ordering::Equal);
        b.box_lines = 5;
        assert_eq!(OptimizationMethod::BoxLinesOnly.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn profile_deltas_for_pushes_moves() {
        let profile = SearchProfile::build(OptimizationMethod::PushesMoves, &metrics(40, 10), 50).unwrap();

        // secondary is moves: 3 * 40 + 50 + 2
        assert_eq!(profile.secondary_max, 172);
        assert_eq!(profile.min_delta, 173);
        assert_eq!(profile.max_delta, 222);
        assert_eq!(profile.primary_limit, 10);
        assert!(profile.bidirectional);
        assert_eq!(profile.axis_planes, 1);
    }

    #[test]
    fn profile_deltas_for_box_lines() {
        let profile = SearchProfile::build(OptimizationMethod::BoxLinesMoves, &metrics(40, 10), 50).unwrap();

        // a continuation push advances the order value by just one move
        assert_eq!(profile.min_delta, 1);
        assert_eq!(profile.max_delta, profile.secondary_max + 50);
        assert!(!profile.bidirectional);
        assert_eq!(profile.axis_planes, 2);
    }

    #[test]
    fn advance_counts_walk_and_push() {
        let profile = SearchProfile::build(OptimizationMethod::PushesMoves, &metrics(40, 10), 50).unwrap();

        assert_eq!(profile.advance(1, 5, 3, true, true), Some((2, 9)));
        // beyond the primary limit
        assert_eq!(profile.advance(10, 5, 0, true, true), None);
    }

    #[test]
    fn advance_prunes_at_secondary_ceiling() {
        let profile = SearchProfile::build(OptimizationMethod::PushesMoves, &metrics(2, 1), 4).unwrap();

        // secondary_max = 3 * 2 + 4 + 2 = 12
        assert_eq!(profile.advance(0, 11, 3, true, true), None);
    }

    #[test]
    fn inverted_secondary_decreases() {
        let profile = SearchProfile::build(OptimizationMethod::MovesHighestPushes, &metrics(40, 10), 50).unwrap();

        let stored = profile.invert_pushes(4);
        let (primary, secondary) = profile.advance(3, stored, 2, true, true).unwrap();

        assert_eq!(primary, 6);
        assert_eq!(secondary, profile.invert_pushes(5));
    }
}
