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

use sk_board::Solution;
use sk_opt::{Optimizer, ProgressSink};

/// Enables `RUST_LOG`-controlled tracing output for a failing test run.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sink that records every log line for later assertions.
#[derive(Default)]
pub struct LogCapture {
    lines: Mutex<Vec<String>>
}

impl LogCapture {
    pub fn new() -> LogCapture {
        LogCapture::default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|line| line.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }
}

impl ProgressSink for LogCapture {
    fn add_log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Sink that cancels the optimizer on the first log line it sees, as a user
/// hammering the stop button would.
pub struct StopOnFirstLog<'a> {
    optimizer: &'a Optimizer
}

impl<'a> StopOnFirstLog<'a> {
    pub fn new(optimizer: &'a Optimizer) -> StopOnFirstLog<'a> {
        StopOnFirstLog { optimizer }
    }
}

impl ProgressSink for StopOnFirstLog<'_> {
    fn add_log(&self, _line: &str) {
        self.optimizer.stop();
    }
}

/// Sink that records intermediate solutions of an iterating run.
#[derive(Default)]
pub struct SolutionCapture {
    solutions: Mutex<Vec<Solution>>
}

impl SolutionCapture {
    pub fn new() -> SolutionCapture {
        SolutionCapture::default()
    }

    pub fn count(&self) -> usize {
        self.solutions.lock().unwrap().len()
    }
}

impl ProgressSink for SolutionCapture {
    fn new_found_solution(&self, solution: &Solution, _seeds: &[Solution]) {
        self.solutions.lock().unwrap().push(solution.clone());
    }
}
