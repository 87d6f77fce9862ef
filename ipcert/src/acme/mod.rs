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

//! An [ACME](https://datatracker.ietf.org/doc/html/rfc8555) client that
//! obtains certificates for IP address identifiers
//! ([RFC 8738](https://datatracker.ietf.org/doc/html/rfc8738)) through
//! HTTP-01 validation.

pub mod account;
pub mod challenge;
pub mod client;
pub mod directory;
pub mod error;
pub mod jws;
pub mod order;
pub mod polling_timer;

use crate::certificate::{CertificateIssuer, CertificateRecord};
use crate::crypto::EcPublicKey;
use crate::fetcher::Fetcher;
use crate::utils::base64url;
use account::AccountManager;
use anyhow::Result;
use async_trait::async_trait;
use challenge::ChallengeStore;
use directory::DirectoryProvider;
use order::{OrderFlow, OrderOptions};
use std::net::IpAddr;
use std::sync::Arc;

/// The content served for an HTTP-01 challenge.
// https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub fn key_authorization(token: &str, public_key: &EcPublicKey) -> Result<String> {
    Ok(format!(
        "{}.{}",
        token,
        base64url::encode(public_key.get_jwk_thumbprint()?)
    ))
}

/// Issues certificates from an ACME server, one order per call.
pub struct AcmeIssuer {
    directory: Arc<dyn DirectoryProvider>,
    accounts: AccountManager,
    challenges: Arc<dyn ChallengeStore>,
    fetcher: Arc<dyn Fetcher>,
    options: OrderOptions,
}

impl AcmeIssuer {
    pub fn new(
        directory: Arc<dyn DirectoryProvider>,
        accounts: AccountManager,
        challenges: Arc<dyn ChallengeStore>,
        fetcher: Arc<dyn Fetcher>,
        options: OrderOptions,
    ) -> Self {
        AcmeIssuer {
            directory,
            accounts,
            challenges,
            fetcher,
            options,
        }
    }
}

#[async_trait]
impl CertificateIssuer for AcmeIssuer {
    async fn issue(&self, ip: IpAddr) -> Result<CertificateRecord> {
        let directory = self.directory.directory().await?;
        let mut client = self
            .accounts
            .establish(directory, self.fetcher.clone())
            .await
            .map_err(|e| e.context("Failed to establish ACME account"))?;
        OrderFlow::new(&mut client, self.challenges.as_ref(), &self.options, ip)
            .run()
            .await
    }
}
