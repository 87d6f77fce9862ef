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

use crate::certificate::CertificateManager;
use crate::config::AcmeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs one certificate check per interval until cancelled.
pub struct RenewalScheduler {
    manager: Arc<CertificateManager>,
    renewal_interval: Duration,
    failure_retry_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(manager: Arc<CertificateManager>, config: &AcmeConfig) -> Self {
        RenewalScheduler {
            manager,
            renewal_interval: config.renewal_interval,
            failure_retry_interval: config.failure_retry_interval,
        }
    }
    /// Checks immediately, then after every wait. Errors are logged and the
    /// loop goes on; cancellation interrupts both the wait and an in-flight
    /// check.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            renewal_interval_secs = self.renewal_interval.as_secs(),
            "Starting certificate renewal scheduler"
        );
        loop {
            let wait = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.manager.ensure_fresh() => match result {
                    Ok(certificate) => {
                        tracing::info!(
                            ip = %certificate.record.identifier,
                            "Certificate check complete"
                        );
                        self.renewal_interval
                    }
                    Err(e) => {
                        tracing::error!("Certificate check failed: {:#}", e);
                        self.failure_retry_interval
                    }
                },
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::info!("Certificate renewal scheduler stopped");
    }
}
