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

use crate::fetcher::{self, Fetcher};
use anyhow::{anyhow, Error, Result};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// Reports the address this server is reachable at from the internet.
#[async_trait]
pub trait PublicIpResolver: Send + Sync {
    async fn public_ip(&self) -> Result<IpAddr>;
}

/// Asks a check-IP service, which answers with the caller's address as
/// plain text.
pub struct CheckIpResolver {
    url: String,
    fetcher: Arc<dyn Fetcher>,
}

impl CheckIpResolver {
    pub fn new(url: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        CheckIpResolver {
            url: url.into(),
            fetcher,
        }
    }
}

#[async_trait]
impl PublicIpResolver for CheckIpResolver {
    async fn public_ip(&self) -> Result<IpAddr> {
        let body = fetcher::get(self.fetcher.as_ref(), &self.url).await?;
        let text = String::from_utf8(body)
            .map_err(|e| Error::new(e).context("The check-IP answer is not UTF-8"))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("{} returned an empty answer", self.url));
        }
        let ip: IpAddr = text
            .parse()
            .map_err(|e| Error::new(e).context(format!("{:?} is not an IP address", text)))?;
        tracing::debug!(%ip, "Resolved public IP");
        Ok(ip)
    }
}

/// Always reports the same address.
pub struct FixedIpResolver(IpAddr);

impl FixedIpResolver {
    pub fn new(ip: IpAddr) -> Self {
        FixedIpResolver(ip)
    }
}

#[async_trait]
impl PublicIpResolver for FixedIpResolver {
    async fn public_ip(&self) -> Result<IpAddr> {
        Ok(self.0)
    }
}
