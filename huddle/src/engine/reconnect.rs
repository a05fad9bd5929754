// Copyright 2024 Huddle, Inc.
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

use std::time::Duration;

use crate::options::ReconnectPolicy;

pub const MAX_RECONNECT_RETRIES: u32 = 10;
pub const MAX_RECONNECT_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const MAX_ICE_CONNECT_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Delay applied before attempt `n` (zero-based). The first attempt runs
/// immediately; later attempts back off quadratically, capped at 5s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let delay = 100 + u64::from(attempt) * u64::from(attempt) * 500;
    Duration::from_millis(delay.min(5_000))
}

/// Tracks which flavor the next attempt uses. `DEFAULT` starts soft and
/// degrades to full for the rest of the loop once a soft attempt failed;
/// the forced policies never switch.
#[derive(Debug)]
pub struct AttemptSelector {
    policy: ReconnectPolicy,
    next_is_full: bool,
}

impl AttemptSelector {
    pub fn new(policy: ReconnectPolicy, full_reconnect_first: bool) -> Self {
        Self { policy, next_is_full: full_reconnect_first }
    }

    pub fn is_full(&self) -> bool {
        match self.policy {
            ReconnectPolicy::ForceFullReconnect => true,
            ReconnectPolicy::ForceSoftReconnect => false,
            ReconnectPolicy::Default => self.next_is_full,
        }
    }

    /// Records a failed soft attempt.
    pub fn soft_failed(&mut self) {
        self.next_is_full = true;
    }
}
