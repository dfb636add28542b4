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

use regex::Regex;
use thiserror::Error;

use crate::board::Board;
use crate::direction::{Axis, Direction};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolutionError {
    #[error("move {index} is not a legal move byte")]
    BadMoveByte { index: usize },

    #[error("move {index} walks into a wall or off the board")]
    IllegalMove { index: usize },

    #[error("move {index} pushes a box into a blocked cell")]
    BlockedPush { index: usize },

    #[error("unexpected character at offset {offset} in lurd text")]
    BadLurd { offset: usize },

    #[error("run length at offset {offset} is out of range")]
    BadRunLength { offset: usize },
}

/// The five quality metrics of a (partial) solution, in the order they are
/// usually compared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Metrics {
    pub moves: usize,
    pub pushes: usize,
    pub box_lines: usize,
    pub box_changes: usize,
    pub pushing_sessions: usize
}

/// One push that occurred during a replay, with everything in board cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushEvent {
    /// Index into the move-byte sequence.
    pub move_index: usize,
    pub dir: Direction,
    pub box_from: usize,
    pub box_to: usize
}

/// The outcome of replaying a move sequence on a board.
#[derive(Clone, Debug)]
pub struct Replay {
    pub final_player: usize,
    /// Cells occupied by boxes after the last move, ascending.
    pub final_boxes: Vec<usize>,
    pub metrics: Metrics,
    pub pushes: Vec<PushEvent>,
    /// True if every box ended on a goal.
    pub solved: bool
}

/// Replays `moves` from the initial placement of `board`, validating every
/// step and counting all five metrics.
///
/// # Arguments
///
/// * `board` -
/// * `moves` -
///
pub fn replay(board: &Board, moves: &[Direction]) -> Result<Replay, SolutionError> {
    let mut boxes = vec! [false; board.num_cells()];
    for cell in board.initial_boxes() {
        boxes[cell] = true;
    }

    let mut player = board.player_start();
    let mut metrics = Metrics::default();
    let mut pushes = vec! [];
    let mut prev_was_push = false;
    let mut last_box_cell = usize::MAX;
    let mut last_axis: Option<Axis> = None;

    for (index, &dir) in moves.iter().enumerate() {
        let target = match board.neighbor(player, dir) {
            Some(target) if !board.is_wall(target) => target,
            _ => return Err(SolutionError::IllegalMove { index })
        };

        if boxes[target] {
            let dest = match board.neighbor(target, dir) {
                Some(dest) if !board.is_wall(dest) && !boxes[dest] => dest,
                _ => return Err(SolutionError::BlockedPush { index })
            };

            boxes[target] = false;
            boxes[dest] = true;

            let box_change = last_box_cell != target;
            let new_line = box_change || last_axis != Some(dir.axis()) || !prev_was_push;

            metrics.pushes += 1;
            if box_change { metrics.box_changes += 1 }
            if new_line { metrics.box_lines += 1 }
            if !prev_was_push { metrics.pushing_sessions += 1 }

            pushes.push(PushEvent { move_index: index, dir, box_from: target, box_to: dest });
            last_box_cell = dest;
            last_axis = Some(dir.axis());
            prev_was_push = true;
        } else {
            prev_was_push = false;
        }

        player = target;
        metrics.moves += 1;
    }

    let final_boxes = boxes.iter()
        .enumerate()
        .filter(|(_, occupied)| **occupied)
        .map(|(cell, _)| cell)
        .collect::<Vec<_>>();
    let solved = final_boxes.iter().all(|&cell| board.is_goal(cell));

    Ok(Replay { final_player: player, final_boxes, metrics, pushes, solved })
}

/// A validated move sequence together with its metrics. A `Solution` is not
/// necessarily a *complete* solution of its level: when a segment of a longer
/// solution is optimized, the seed only has to reach the segment's final box
/// configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    moves: Vec<u8>,
    metrics: Metrics
}

impl Solution {
    /// Validates the move bytes against the board and computes the metrics.
    ///
    /// # Arguments
    ///
    /// * `move_bytes` - one byte per step, `0..=3` per [`Direction`]
    /// * `board` -
    ///
    pub fn new(move_bytes: Vec<u8>, board: &Board) -> Result<Solution, SolutionError> {
        let directions = decode(&move_bytes)?;
        let outcome = replay(board, &directions)?;

        Ok(Solution { moves: move_bytes, metrics: outcome.metrics })
    }

    /// Parses run-length lurd notation, e.g. `3rUU2lD`.
    ///
    /// # Arguments
    ///
    /// * `text` -
    /// * `board` -
    ///
    pub fn from_lurd(text: &str, board: &Board) -> Result<Solution, SolutionError> {
        lazy_static! {
            static ref TOKEN: Regex = Regex::new(r"([0-9]*)([lurdLURD])").unwrap();
        }

        let compact = text.chars().filter(|ch| !ch.is_whitespace()).collect::<String>();
        let mut moves = vec! [];
        let mut consumed = 0;

        for caps in TOKEN.captures_iter(&compact) {
            let all = caps.get(0).unwrap();
            if all.start() != consumed {
                return Err(SolutionError::BadLurd { offset: consumed });
            }
            consumed = all.end();

            let count = match caps.get(1).unwrap().as_str() {
                "" => 1,
                digits => digits.parse::<usize>()
                    .ok()
                    .filter(|&count| count > 0 && count <= u16::MAX as usize)
                    .ok_or(SolutionError::BadRunLength { offset: all.start() })?
            };
            let dir = Direction::from_char(caps.get(2).unwrap().as_str().chars().next().unwrap())
                .unwrap();

            for _ in 0..count {
                moves.push(dir.as_byte());
            }
        }

        if consumed != compact.len() {
            return Err(SolutionError::BadLurd { offset: consumed });
        }

        Solution::new(moves, board)
    }

    /// Formats the move sequence as lurd text, upper-casing pushes.
    ///
    /// # Arguments
    ///
    /// * `board` -
    ///
    pub fn to_lurd(&self, board: &Board) -> String {
        let directions = self.directions();
        let outcome = replay(board, &directions).expect("solution no longer replays on its board");
        let mut is_push = vec! [false; directions.len()];

        for push in &outcome.pushes {
            is_push[push.move_index] = true;
        }

        directions.iter()
            .zip(is_push)
            .map(|(dir, push)| dir.as_char(push))
            .collect()
    }

    pub fn move_bytes(&self) -> &[u8] {
        &self.moves
    }

    pub fn directions(&self) -> Vec<Direction> {
        decode(&self.moves).expect("solution holds a bad move byte")
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn moves_count(&self) -> usize {
        self.metrics.moves
    }

    pub fn pushes_count(&self) -> usize {
        self.metrics.pushes
    }
}

fn decode(move_bytes: &[u8]) -> Result<Vec<Direction>, SolutionError> {
    move_bytes.iter()
        .enumerate()
        .map(|(index, &byte)| Direction::from_byte(byte).ok_or(SolutionError::BadMoveByte { index }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: &str = "\
######
#    #
# $. #
# @  #
######";

    #[test]
    fn metrics_of_simple_push() {
        let board = Board::parse(ROOM).unwrap();
        // walk left and up, then push the box right once
        let solution = Solution::from_lurd("luR", &board).unwrap();

        assert_eq!(solution.metrics(), &Metrics {
            moves: 3,
            pushes: 1,
            box_lines: 1,
            box_changes: 1,
            pushing_sessions: 1
        });
    }

    #[test]
    fn straight_pushes_share_a_box_line() {
        let board = Board::parse("\
########
#@$  . #
########").unwrap();
        let solution = Solution::from_lurd("RRR", &board).unwrap();
        let metrics = solution.metrics();

        assert_eq!(metrics.pushes, 3);
        assert_eq!(metrics.box_lines, 1);
        assert_eq!(metrics.box_changes, 1);
        assert_eq!(metrics.pushing_sessions, 1);
    }

    #[test]
    fn interrupted_push_starts_a_new_line_and_session() {
        let board = Board::parse("\
#########
#@$   . #
#       #
#########").unwrap();
        // push right twice, walk around and push the same box back once,
        // walk around again and push it onto the goal
        let solution = Solution::from_lurd("RR drru LL dllu RRRR", &board).unwrap();
        let metrics = solution.metrics();

        // RR = line 1; LL after a walk = line 2; RRRR = line 3, all the
        // same box throughout
        assert_eq!(metrics.moves, 16);
        assert_eq!(metrics.pushes, 8);
        assert_eq!(metrics.box_lines, 3);
        assert_eq!(metrics.box_changes, 1);
        assert_eq!(metrics.pushing_sessions, 3);
    }

    #[test]
    fn replay_reports_solved() {
        let board = Board::parse(ROOM).unwrap();
        let solution = Solution::from_lurd("luR", &board).unwrap();
        let outcome = replay(&board, &solution.directions()).unwrap();

        assert!(outcome.solved);
        assert_eq!(outcome.pushes.len(), 1);
        assert_eq!(outcome.final_boxes, vec! [15]);
    }

    #[test]
    fn rejects_illegal_sequences() {
        let board = Board::parse(ROOM).unwrap();

        assert_eq!(
            Solution::from_lurd("d", &board).unwrap_err(),
            SolutionError::IllegalMove { index: 0 }
        );
        // the first push is fine, the second drives the box into the wall
        assert_eq!(
            Solution::from_lurd("uu", &board).unwrap_err(),
            SolutionError::BlockedPush { index: 1 }
        );
    }

    #[test]
    fn lurd_round_trip() {
        let board = Board::parse(ROOM).unwrap();
        let solution = Solution::from_lurd("l u R", &board).unwrap();

        assert_eq!(solution.to_lurd(&board), "luR");
        assert_eq!(
            Solution::from_lurd("6r", &board).unwrap_err(),
            SolutionError::IllegalMove { index: 2 }
        );
    }

    #[test]
    fn bad_lurd_text() {
        let board = Board::parse(ROOM).unwrap();

        assert!(matches!(Solution::from_lurd("lxr", &board), Err(SolutionError::BadLurd { offset: 1 })));
        assert!(matches!(Solution::from_lurd("0r", &board), Err(SolutionError::BadRunLength { .. })));
    }
}
