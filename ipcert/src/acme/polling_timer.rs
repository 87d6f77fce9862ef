// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

/// Paces status polling at a fixed interval with a bounded number of
/// attempts.
pub struct PollingTimer {
    interval: Duration,
    attempts: u32,
    max_attempts: u32,
}

impl PollingTimer {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        PollingTimer {
            interval,
            attempts: 0,
            max_attempts,
        }
    }
    /// Sleeps one interval and returns `true`, or returns `false` without
    /// sleeping once the budget is spent.
    pub async fn tick(&mut self) -> bool {
        if self.attempts >= self.max_attempts {
            return false;
        }
        self.attempts += 1;
        tracing::trace!(
            attempt = self.attempts,
            max_attempts = self.max_attempts,
            "Waiting {}ms for ACME server processing",
            self.interval.as_millis()
        );
        tokio::time::sleep(self.interval).await;
        true
    }
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[tokio::test(start_paused = true)]
    async fn stops_after_budget() {
        let start = tokio::time::Instant::now();
        let mut timer = PollingTimer::new(Duration::from_secs(2), 3);
        let mut ticks = 0;
        while timer.tick().await {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert!(!timer.tick().await);
    }
}
