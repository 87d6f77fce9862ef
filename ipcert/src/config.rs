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

use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const LETS_ENCRYPT_PRODUCTION_DIRECTORY: &str =
    "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const DEFAULT_CHECK_IP_URL: &str = "https://checkip.amazonaws.com/";

// The user may create a file (like `ipcert.yaml`) to override any of these
// fields; missing fields take their default values.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AcmeConfig {
    pub directory_url: String,
    /// Contact URLs sent on account creation, such as `mailto:ops@example.com`.
    pub contact: Vec<String>,
    /// The issuance profile requested in new orders. Let's Encrypt only
    /// issues IP certificates under the `shortlived` profile.
    pub profile: Option<String>,
    /// The subject common name of the CSR. It is never validated against
    /// the IP identifier.
    pub csr_common_name: String,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    pub authorization_attempts: u32,
    pub order_attempts: u32,
    #[serde(with = "duration_secs")]
    pub renewal_interval: Duration,
    #[serde(with = "duration_secs")]
    pub failure_retry_interval: Duration,
    pub check_ip_url: String,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        AcmeConfig {
            directory_url: LETS_ENCRYPT_PRODUCTION_DIRECTORY.to_string(),
            contact: vec![],
            profile: Some("shortlived".to_string()),
            csr_common_name: "example.com".to_string(),
            poll_interval: Duration::from_secs(2),
            authorization_attempts: 60,
            order_attempts: 30,
            renewal_interval: Duration::from_secs(24 * 60 * 60),
            failure_retry_interval: Duration::from_secs(24 * 60 * 60),
            check_ip_url: DEFAULT_CHECK_IP_URL.to_string(),
        }
    }
}

impl AcmeConfig {
    pub fn from_yaml(input_yaml: &str) -> Result<Self> {
        serde_yaml::from_str(input_yaml)
            .map_err(|e| Error::new(e).context("Failed to parse ACME config"))
    }
}

/// Serializes a [`Duration`] as an integer number of seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
