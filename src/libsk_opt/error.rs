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

use thiserror::Error;

use sk_board::{BoardError, SolutionError};

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("internal failure: {0}")]
    Fatal(String),
}

impl From<BoardError> for OptimizerError {
    fn from(err: BoardError) -> OptimizerError {
        OptimizerError::InvalidInput(err.to_string())
    }
}

impl From<SolutionError> for OptimizerError {
    fn from(err: SolutionError) -> OptimizerError {
        OptimizerError::InvalidInput(err.to_string())
    }
}
