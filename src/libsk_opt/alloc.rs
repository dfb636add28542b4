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

use crate::error::OptimizerError;

/// Allocates a boxed slice of `len` elements produced by `init`, reporting
/// allocation failure as a recoverable [`OptimizerError::OutOfMemory`]
/// instead of aborting the process. All bulk storage of the engine goes
/// through here so that the controller can back off and retry.
///
/// # Arguments
///
/// * `len` -
/// * `what` - short description for the error message
/// * `init` -
///
pub fn try_boxed_slice<T, F>(len: usize, what: &str, mut init: F) -> Result<Box<[T]>, OptimizerError>
    where F: FnMut() -> T
{
    let mut out = Vec::new();

    out.try_reserve_exact(len).map_err(|_| {
        OptimizerError::OutOfMemory(format!("could not allocate {} entries for {}", len, what))
    })?;
    out.resize_with(len, &mut init);

    Ok(out.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_allocation_succeeds() {
        let slice = try_boxed_slice(16, "test", || 7u32).unwrap();

        assert_eq!(slice.len(), 16);
        assert!(slice.iter().all(|&x| x == 7));
    }

    #[test]
    fn absurd_allocation_reports_out_of_memory() {
        let result = try_boxed_slice(usize::MAX / 16, "test", || 0u64);

        assert!(matches!(result, Err(OptimizerError::OutOfMemory(_))));
    }
}
