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

use std::env;
use std::str::FromStr;

/// Returns the value of the environment variable `name` parsed as a `T`, or
/// `default` if the variable is unset or does not parse.
///
/// # Arguments
///
/// * `name` -
/// * `default` -
///
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name).ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

lazy_static! {
    /// The number of search (and generator) worker threads to spawn. Defaults
    /// to the number of logical cpus.
    pub static ref NUM_THREADS: usize = {
        let num_threads = env_or("SK_NUM_THREADS", num_cpus::get());

        if num_threads == 0 { 1 } else { num_threads }
    };

    /// The memory budget, in mebibytes, that the automatic capacity
    /// estimation may plan for. This is a planning figure, not a hard rlimit.
    pub static ref MAX_MEMORY_MB: usize = env_or("SK_MAX_MEMORY_MB", 2048);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        assert_eq!(env_or("SK_THIS_VARIABLE_DOES_NOT_EXIST", 42usize), 42);
    }

    #[test]
    fn at_least_one_thread() {
        assert!(*NUM_THREADS >= 1);
    }
}
