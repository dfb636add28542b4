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

use std::collections::VecDeque;

use crate::board::{Board, BoardError};
use crate::direction::Direction;

/// Sentinel for "no such position" in all dense index tables.
pub const NONE: u16 = u16::MAX;

/// Precomputed per-level lookup tables over two dense index spaces:
///
/// * *player positions* — every floor cell the player can ever occupy
///   (flood-filled from the starting cell, ignoring boxes), and
/// * *box positions* — the subset of those cells from which a box can still
///   be pushed onto some goal. Corner cells and dead wall runs are eliminated
///   here once, so the search never has to consider them.
///
/// All neighbor tables are flat `[direction][position]` arrays padded with
/// [`NONE`].
pub struct Geometry {
    width: usize,
    player_cells: Box<[u16]>,
    cell_to_player: Box<[u16]>,
    box_cells: Box<[u16]>,
    cell_to_box: Box<[u16]>,
    player_neighbor: Box<[u16]>,
    box_neighbor: Box<[u16]>,
    player_to_box: Box<[u16]>,
    box_to_player: Box<[u16]>,
    box_on_goal: Box<[bool]>
}

impl Geometry {
    pub fn new(board: &Board) -> Result<Geometry, BoardError> {
        Geometry::build(board, true)
    }

    /// As [`Geometry::new`], but without dead-square elimination: every
    /// active cell may hold a box. Needed when a *segment* of a larger
    /// solution is optimized and its boxes legitimately rest on squares
    /// from which no goal is reachable anymore.
    pub fn permissive(board: &Board) -> Result<Geometry, BoardError> {
        Geometry::build(board, false)
    }

    fn build(board: &Board, eliminate_dead: bool) -> Result<Geometry, BoardError> {
        let num_cells = board.num_cells();
        let active = flood_fill_player(board);
        let live = if eliminate_dead {
            pull_reachable_from_goals(board, &active)
        } else {
            active.clone()
        };

        let mut player_cells = vec! [];
        let mut cell_to_player = vec! [NONE; num_cells];
        let mut box_cells = vec! [];
        let mut cell_to_box = vec! [NONE; num_cells];

        for cell in 0..num_cells {
            if active[cell] {
                cell_to_player[cell] = player_cells.len() as u16;
                player_cells.push(cell as u16);
            }
            if live[cell] {
                cell_to_box[cell] = box_cells.len() as u16;
                box_cells.push(cell as u16);
            }
        }

        let num_players = player_cells.len();
        let num_boxes = box_cells.len();
        let mut player_neighbor = vec! [NONE; 4 * num_players];
        let mut box_neighbor = vec! [NONE; 4 * num_boxes];
        let mut player_to_box = vec! [NONE; num_players];
        let mut box_to_player = vec! [NONE; num_boxes];
        let mut box_on_goal = vec! [false; num_boxes];

        for (p, &cell) in player_cells.iter().enumerate() {
            for dir in Direction::ALL {
                if let Some(next) = board.neighbor(cell as usize, dir) {
                    player_neighbor[dir.as_byte() as usize * num_players + p] = cell_to_player[next];
                }
            }

            player_to_box[p] = cell_to_box[cell as usize];
        }

        for (b, &cell) in box_cells.iter().enumerate() {
            for dir in Direction::ALL {
                if let Some(next) = board.neighbor(cell as usize, dir) {
                    box_neighbor[dir.as_byte() as usize * num_boxes + b] = cell_to_box[next];
                }
            }

            box_to_player[b] = cell_to_player[cell as usize];
            box_on_goal[b] = board.is_goal(cell as usize);
        }

        Ok(Geometry {
            width: board.width(),
            player_cells: player_cells.into_boxed_slice(),
            cell_to_player: cell_to_player.into_boxed_slice(),
            box_cells: box_cells.into_boxed_slice(),
            cell_to_box: cell_to_box.into_boxed_slice(),
            player_neighbor: player_neighbor.into_boxed_slice(),
            box_neighbor: box_neighbor.into_boxed_slice(),
            player_to_box: player_to_box.into_boxed_slice(),
            box_to_player: box_to_player.into_boxed_slice(),
            box_on_goal: box_on_goal.into_boxed_slice()
        })
    }

    /// The number of distinct player positions, *P*.
    pub fn player_count(&self) -> usize {
        self.player_cells.len()
    }

    /// The number of distinct box positions, *B*.
    pub fn box_count(&self) -> usize {
        self.box_cells.len()
    }

    pub fn player_cell(&self, p: u16) -> usize {
        self.player_cells[p as usize] as usize
    }

    pub fn player_index(&self, cell: usize) -> u16 {
        self.cell_to_player[cell]
    }

    pub fn box_cell(&self, b: u16) -> usize {
        self.box_cells[b as usize] as usize
    }

    pub fn box_index(&self, cell: usize) -> u16 {
        self.cell_to_box[cell]
    }

    /// The neighboring player position in the given direction, or [`NONE`].
    pub fn player_neighbor(&self, p: u16, dir: Direction) -> u16 {
        self.player_neighbor[dir.as_byte() as usize * self.player_cells.len() + p as usize]
    }

    /// The neighboring box position in the given direction, or [`NONE`].
    pub fn box_neighbor(&self, b: u16, dir: Direction) -> u16 {
        self.box_neighbor[dir.as_byte() as usize * self.box_cells.len() + b as usize]
    }

    /// The box position sharing a cell with the given player position, or
    /// [`NONE`] if the cell cannot hold a box.
    pub fn box_of_player(&self, p: u16) -> u16 {
        self.player_to_box[p as usize]
    }

    pub fn player_of_box(&self, b: u16) -> u16 {
        self.box_to_player[b as usize]
    }

    pub fn box_on_goal(&self, b: u16) -> bool {
        self.box_on_goal[b as usize]
    }

    /// Returns `(x, y)` of a player position, for diagnostics.
    pub fn player_xy(&self, p: u16) -> (usize, usize) {
        let cell = self.player_cell(p);

        (cell % self.width, cell / self.width)
    }
}

/// Every non-wall cell reachable by the player from its starting cell,
/// ignoring boxes.
fn flood_fill_player(board: &Board) -> Vec<bool> {
    let mut active = vec! [false; board.num_cells()];
    let mut pending = VecDeque::new();

    active[board.player_start()] = true;
    pending.push_back(board.player_start());

    while let Some(cell) = pending.pop_front() {
        for dir in Direction::ALL {
            if let Some(next) = board.neighbor(cell, dir) {
                if !board.is_wall(next) && !active[next] {
                    active[next] = true;
                    pending.push_back(next);
                }
            }
        }
    }

    active
}

/// Every active cell from which a box can, in principle, still be pushed
/// onto some goal. A push of a box standing on `cell` towards `next`
/// requires the cell behind the box to be free for the player, so the
/// reverse scan walks from the goals and admits `cell` whenever such a
/// pushing lane exists. Cells that fail this test are dead squares.
fn pull_reachable_from_goals(board: &Board, active: &[bool]) -> Vec<bool> {
    let mut live = vec! [false; board.num_cells()];
    let mut pending = VecDeque::new();

    for cell in 0..board.num_cells() {
        if active[cell] && board.is_goal(cell) {
            live[cell] = true;
            pending.push_back(cell);
        }
    }

    while let Some(next) = pending.pop_front() {
        for dir in Direction::ALL {
            // a box on `cell` pushed towards `dir` lands on `next`
            let cell = match board.neighbor(next, dir.opposite()) {
                Some(cell) if active[cell] && !live[cell] => cell,
                _ => continue
            };
            let behind = match board.neighbor(cell, dir.opposite()) {
                Some(behind) if active[behind] => behind,
                _ => continue
            };

            debug_assert!(!board.is_wall(behind));
            live[cell] = true;
            pending.push_back(cell);
        }
    }

    live
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: &str = "\
#######
#     #
# $ . #
#  @  #
#######";

    #[test]
    fn dense_spaces() {
        let board = Board::parse(ROOM).unwrap();
        let geometry = Geometry::new(&board).unwrap();

        // 5x3 open interior
        assert_eq!(geometry.player_count(), 15);
        // the outer ring of the interior is dead except for the goal row;
        // only the 3x1 middle row plus the goal itself survive for boxes
        assert!(geometry.box_count() < geometry.player_count());

        for b in 0..geometry.box_count() as u16 {
            let p = geometry.player_of_box(b);

            assert_ne!(p, NONE);
            assert_eq!(geometry.box_of_player(p), b);
        }
    }

    #[test]
    fn corners_are_dead() {
        let board = Board::parse(ROOM).unwrap();
        let geometry = Geometry::new(&board).unwrap();

        // interior corner cell (1,1)
        let corner = board.width() + 1;

        assert_ne!(geometry.player_index(corner), NONE);
        assert_eq!(geometry.box_index(corner), NONE);
    }

    #[test]
    fn goal_is_live() {
        let board = Board::parse(ROOM).unwrap();
        let geometry = Geometry::new(&board).unwrap();
        let goal = 2 * board.width() + 4;

        let b = geometry.box_index(goal);
        assert_ne!(b, NONE);
        assert!(geometry.box_on_goal(b));
    }

    #[test]
    fn neighbors_agree_with_board() {
        let board = Board::parse(ROOM).unwrap();
        let geometry = Geometry::new(&board).unwrap();

        for p in 0..geometry.player_count() as u16 {
            for dir in Direction::ALL {
                let neighbor = geometry.player_neighbor(p, dir);

                if neighbor != NONE {
                    let expected = board.neighbor(geometry.player_cell(p), dir).unwrap();

                    assert_eq!(geometry.player_cell(neighbor), expected);
                }
            }
        }
    }

    #[test]
    fn walled_off_area_is_inactive() {
        let board = Board::parse("\
########
#@$. # #
########").unwrap();
        let geometry = Geometry::new(&board).unwrap();

        // the pocket behind the inner wall is not part of any index space
        let pocket = board.width() + 6;

        assert_eq!(geometry.player_index(pocket), NONE);
        assert_eq!(geometry.box_index(pocket), NONE);
    }
}
