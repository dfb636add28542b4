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

use std::fmt;

use memchr::memchr_iter;
use thiserror::Error;

use crate::direction::Direction;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("level text is empty")]
    Empty,

    #[error("unknown tile {0:?}")]
    UnknownTile(char),

    #[error("level has no player")]
    NoPlayer,

    #[error("level has more than one player")]
    MultiplePlayers,

    #[error("level has {boxes} boxes but {goals} goals")]
    BoxGoalMismatch { boxes: usize, goals: usize },

    #[error("level of {width}x{height} exceeds the supported size")]
    TooLarge { width: usize, height: usize },
}

/// A static sokoban level in XSB tile notation. The board is immutable; the
/// moving parts (player and boxes) are only the *initial* placement, the
/// engine tracks them separately.
#[derive(Clone, PartialEq, Eq)]
pub struct Board {
    width: usize,
    height: usize,
    walls: Box<[bool]>,
    goals: Box<[bool]>,
    boxes: Box<[bool]>,
    player: usize
}

impl Board {
    /// Parses a level from XSB text, one row per line. Recognized tiles are
    /// `#` (wall), `@` (player), `+` (player on goal), `$` (box), `*` (box on
    /// goal), `.` (goal), and ` ` / `-` / `_` (floor).
    ///
    /// # Arguments
    ///
    /// * `text` -
    ///
    pub fn parse(text: &str) -> Result<Board, BoardError> {
        let bytes = text.as_bytes();
        let mut rows = vec! [];
        let mut start = 0;

        for end in memchr_iter(b'\n', bytes).chain(Some(bytes.len())) {
            if end > start {
                rows.push(&text[start..end]);
            } else {
                rows.push("");
            }

            start = end + 1;
        }

        while rows.last().map(|row| row.trim().is_empty()).unwrap_or(false) {
            rows.pop();
        }
        while rows.first().map(|row| row.trim().is_empty()).unwrap_or(false) {
            rows.remove(0);
        }

        if rows.is_empty() {
            return Err(BoardError::Empty);
        }

        let width = rows.iter().map(|row| row.chars().count()).max().unwrap_or(0);
        let height = rows.len();

        if width * height >= u16::MAX as usize {
            return Err(BoardError::TooLarge { width, height });
        }

        let mut walls = vec! [false; width * height].into_boxed_slice();
        let mut goals = vec! [false; width * height].into_boxed_slice();
        let mut boxes = vec! [false; width * height].into_boxed_slice();
        let mut player = None;

        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                let cell = y * width + x;

                match ch {
                    '#' => walls[cell] = true,
                    '@' => {
                        if player.replace(cell).is_some() {
                            return Err(BoardError::MultiplePlayers);
                        }
                    },
                    '+' => {
                        goals[cell] = true;
                        if player.replace(cell).is_some() {
                            return Err(BoardError::MultiplePlayers);
                        }
                    },
                    '$' => boxes[cell] = true,
                    '*' => {
                        boxes[cell] = true;
                        goals[cell] = true;
                    },
                    '.' => goals[cell] = true,
                    ' ' | '-' | '_' => {},
                    other => return Err(BoardError::UnknownTile(other))
                }
            }
        }

        let num_boxes = boxes.iter().filter(|is_box| **is_box).count();
        let num_goals = goals.iter().filter(|is_goal| **is_goal).count();

        if num_boxes != num_goals || num_boxes == 0 {
            return Err(BoardError::BoxGoalMismatch { boxes: num_boxes, goals: num_goals });
        }

        match player {
            None => Err(BoardError::NoPlayer),
            Some(player) => Ok(Board { width, height, walls, goals, boxes, player })
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// The board cell of the player's initial placement.
    pub fn player_start(&self) -> usize {
        self.player
    }

    pub fn is_wall(&self, cell: usize) -> bool {
        self.walls[cell]
    }

    pub fn is_goal(&self, cell: usize) -> bool {
        self.goals[cell]
    }

    pub fn has_initial_box(&self, cell: usize) -> bool {
        self.boxes[cell]
    }

    /// The cells of the initial box placement, in increasing cell order.
    pub fn initial_boxes(&self) -> impl Iterator<Item = usize> + '_ {
        self.boxes.iter()
            .enumerate()
            .filter(|(_, is_box)| **is_box)
            .map(|(cell, _)| cell)
    }

    pub fn num_cells(&self) -> usize {
        self.width * self.height
    }

    /// Returns the cell adjacent to `cell` in the given direction, or `None`
    /// if that would leave the board.
    ///
    /// # Arguments
    ///
    /// * `cell` -
    /// * `dir` -
    ///
    pub fn neighbor(&self, cell: usize, dir: Direction) -> Option<usize> {
        let (x, y) = (cell % self.width, cell / self.width);

        match dir {
            Direction::Up if y > 0 => Some(cell - self.width),
            Direction::Down if y + 1 < self.height => Some(cell + self.width),
            Direction::Left if x > 0 => Some(cell - 1),
            Direction::Right if x + 1 < self.width => Some(cell + 1),
            _ => None
        }
    }

    /// Renders the board with the given box cells and player cell instead of
    /// the initial placement. Used by log output and tests.
    ///
    /// # Arguments
    ///
    /// * `boxes` - cells currently occupied by a box
    /// * `player` - the current player cell
    ///
    pub fn render(&self, boxes: &[usize], player: usize) -> String {
        let mut out = String::with_capacity((self.width + 1) * self.height);

        for y in 0..self.height {
            for x in 0..self.width {
                let cell = y * self.width + x;
                let has_box = boxes.contains(&cell);

                out.push(if self.walls[cell] {
                    '#'
                } else if has_box && self.goals[cell] {
                    '*'
                } else if has_box {
                    '$'
                } else if cell == player && self.goals[cell] {
                    '+'
                } else if cell == player {
                    '@'
                } else if self.goals[cell] {
                    '.'
                } else {
                    ' '
                });
            }

            out.push('\n');
        }

        out
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let boxes = self.initial_boxes().collect::<Vec<_>>();

        write!(f, "{}", self.render(&boxes, self.player))
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Board({}x{})\n{}", self.width, self.height, self)
    }
}
