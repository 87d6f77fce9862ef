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

use super::error::Problem;
use crate::fetcher::{self, Fetcher};
use anyhow::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// The URLs for each operation on a ACME server.
// https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
}

impl Directory {
    /// Constructs an ACME directory by fetching the given ACME directory URL.
    pub async fn new(url: &str, fetcher: &dyn Fetcher) -> Result<Self> {
        let bytes = fetcher::get(fetcher, url)
            .await
            .map_err(|e| e.context("Failed to fetch from directory URL"))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::new(e).context("Failed to parse ACME directory"))
    }
}

/// Supplies the directory of one ACME server.
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    async fn directory(&self) -> Result<Arc<Directory>>;
}

/// Fetches the directory on first use and keeps it for the lifetime of the
/// process. A failed fetch is not cached.
pub struct CachedDirectory {
    url: String,
    fetcher: Arc<dyn Fetcher>,
    cell: OnceCell<Arc<Directory>>,
}

impl CachedDirectory {
    pub fn new(url: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        CachedDirectory {
            url: url.into(),
            fetcher,
            cell: OnceCell::new(),
        }
    }
}

#[async_trait]
impl DirectoryProvider for CachedDirectory {
    async fn directory(&self) -> Result<Arc<Directory>> {
        let directory = self
            .cell
            .get_or_try_init(|| async {
                tracing::debug!(url = %self.url, "Fetching ACME directory");
                Directory::new(&self.url, self.fetcher.as_ref())
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(directory.clone())
    }
}

// https://datatracker.ietf.org/doc/html/rfc8555#section-7.3
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccountRequestPayload {
    pub contact: Vec<String>,
    pub terms_of_service_agreed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccountResponsePayload {
    pub status: Status,
}

// https://datatracker.ietf.org/doc/html/rfc8555#section-9.7.7
// https://datatracker.ietf.org/doc/html/rfc8738#section-3
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentifierType {
    Ip,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub r#type: IdentifierType,
    pub value: String,
}

impl Identifier {
    /// An `ip` identifier, whose value is the canonical text form of the
    /// address (RFC 5952 for IPv6).
    pub fn ip(ip: IpAddr) -> Self {
        Identifier {
            r#type: IdentifierType::Ip,
            value: ip.to_string(),
        }
    }
}

// https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderRequestPayload<'a> {
    pub identifiers: Vec<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<&'a str>,
}

// https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: Status,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    pub error: Option<Problem>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    pub certificate: Option<String>,
}

// https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub status: Status,
    pub identifier: Option<Identifier>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

// https://datatracker.ietf.org/doc/html/rfc8555#section-8.3
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub r#type: String,
    pub token: String,
    pub url: String,
    pub status: Status,
    pub error: Option<Problem>,
}

// https://datatracker.ietf.org/doc/html/rfc8555#:~:text=it%20should%20send%20a%20POST%20request%20to%20the%20order%20resource%27s%20finalize%20URL
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest<'a> {
    pub csr: &'a str,
}

// https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}
