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

use std::sync::atomic::{AtomicU8, Ordering};

/// The lifecycle state of one optimizer run. Workers never propagate errors
/// across thread boundaries; the first failure transitions this flag away
/// from `Running` and everybody else drains out on their next loop
/// iteration.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerStatus {
    Running = 0,
    Ended = 1,
    StoppedByUser = 2,
    StoppedDueToOutOfMemory = 3,
    StoppedDueToFailure = 4
}

impl OptimizerStatus {
    fn from_u8(value: u8) -> OptimizerStatus {
        match value {
            0 => OptimizerStatus::Running,
            1 => OptimizerStatus::Ended,
            2 => OptimizerStatus::StoppedByUser,
            3 => OptimizerStatus::StoppedDueToOutOfMemory,
            _ => OptimizerStatus::StoppedDueToFailure
        }
    }
}

/// Shared atomic cell holding the [`OptimizerStatus`]. The first transition
/// out of `Running` wins; later stop attempts keep the original reason.
pub struct StatusFlag {
    status: AtomicU8
}

impl StatusFlag {
    pub fn new() -> StatusFlag {
        StatusFlag { status: AtomicU8::new(OptimizerStatus::Running as u8) }
    }

    pub fn get(&self) -> OptimizerStatus {
        OptimizerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.status.load(Ordering::Acquire) == OptimizerStatus::Running as u8
    }

    /// True once any stop reason (or the regular end) has been recorded.
    pub fn is_stopped(&self) -> bool {
        !self.is_running()
    }

    /// Records a stop reason. Returns true if this call performed the
    /// transition, false if some other reason was recorded first.
    ///
    /// # Arguments
    ///
    /// * `status` -
    ///
    pub fn stop(&self, status: OptimizerStatus) -> bool {
        debug_assert!(status != OptimizerStatus::Running);

        self.status.compare_exchange(
            OptimizerStatus::Running as u8,
            status as u8,
            Ordering::AcqRel,
            Ordering::Acquire
        ).is_ok()
    }

    /// Re-arms the flag for the next iteration of the controller loop. Only
    /// an `Ended` flag may be re-armed; stop reasons are sticky.
    pub fn rearm(&self) {
        let _ = self.status.compare_exchange(
            OptimizerStatus::Ended as u8,
            OptimizerStatus::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire
        );
    }
}

impl Default for StatusFlag {
    fn default() -> StatusFlag {
        StatusFlag::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stop_reason_wins() {
        let flag = StatusFlag::new();

        assert!(flag.is_running());
        assert!(flag.stop(OptimizerStatus::StoppedByUser));
        assert!(!flag.stop(OptimizerStatus::StoppedDueToOutOfMemory));
        assert_eq!(flag.get(), OptimizerStatus::StoppedByUser);
    }

    #[test]
    fn only_ended_can_be_rearmed() {
        let flag = StatusFlag::new();

        flag.stop(OptimizerStatus::Ended);
        flag.rearm();
        assert!(flag.is_running());

        flag.stop(OptimizerStatus::StoppedByUser);
        flag.rearm();
        assert_eq!(flag.get(), OptimizerStatus::StoppedByUser);
    }
}
