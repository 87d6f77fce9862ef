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

//! Drives one certificate order from creation to download.
//! https://datatracker.ietf.org/doc/html/rfc8555#section-7.4

use super::challenge::ChallengeStore;
use super::client::{find_header, Client};
use super::directory::{
    Authorization, Challenge, FinalizeRequest, Identifier, NewOrderRequestPayload, Order, Status,
};
use super::error::AcmeError;
use super::polling_timer::PollingTimer;
use crate::certificate::CertificateRecord;
use crate::config::AcmeConfig;
use crate::crypto::CertificateRequest;
use crate::http::HttpResponse;
use crate::utils::base64url;
use anyhow::{Error, Result};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::time::Duration;

const HTTP_01: &str = "http-01";

/// The part of [`AcmeConfig`] that shapes a single order.
#[derive(Clone, Debug)]
pub struct OrderOptions {
    pub profile: Option<String>,
    pub csr_common_name: String,
    pub poll_interval: Duration,
    pub authorization_attempts: u32,
    pub order_attempts: u32,
}

impl From<&AcmeConfig> for OrderOptions {
    fn from(config: &AcmeConfig) -> Self {
        OrderOptions {
            profile: config.profile.clone(),
            csr_common_name: config.csr_common_name.clone(),
            poll_interval: config.poll_interval,
            authorization_attempts: config.authorization_attempts,
            order_attempts: config.order_attempts,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrderState {
    Created,
    Authorizing,
    Validating,
    Valid,
    Finalizing,
    CertificateReady,
    Failed,
}

pub struct OrderFlow<'a> {
    client: &'a mut Client,
    challenges: &'a dyn ChallengeStore,
    options: &'a OrderOptions,
    ip: IpAddr,
    state: OrderState,
}

impl<'a> OrderFlow<'a> {
    pub fn new(
        client: &'a mut Client,
        challenges: &'a dyn ChallengeStore,
        options: &'a OrderOptions,
        ip: IpAddr,
    ) -> Self {
        OrderFlow {
            client,
            challenges,
            options,
            ip,
            state: OrderState::Created,
        }
    }
    pub async fn run(mut self) -> Result<CertificateRecord> {
        match self.run_impl().await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.transition(OrderState::Failed);
                Err(e)
            }
        }
    }
    async fn run_impl(&mut self) -> Result<CertificateRecord> {
        let (order_url, order) = self.place_order().await?;
        self.transition(OrderState::Authorizing);
        for authorization_url in &order.authorizations {
            self.authorize(authorization_url).await?;
        }
        self.transition(OrderState::Valid);
        // The certificate key is generated per order and never reuses the
        // account key.
        let request = CertificateRequest::for_ip(self.ip, &self.options.csr_common_name)?;
        self.transition(OrderState::Finalizing);
        let certificate_url = self.finalize(&order_url, &order, &request).await?;
        let chain_pem = self
            .client
            .download_certificate(&certificate_url)
            .await
            .map_err(|e| e.context("Failed to download certificate"))?;
        let record = CertificateRecord::new(self.ip, chain_pem, request.private_key_pem)?;
        self.transition(OrderState::CertificateReady);
        Ok(record)
    }
    fn transition(&mut self, next: OrderState) {
        tracing::info!(ip = %self.ip, from = ?self.state, to = ?next, "ACME order state changed");
        self.state = next;
    }
    async fn place_order(&mut self) -> Result<(String, Order)> {
        let new_order_url = self.client.directory.new_order.clone();
        let request_payload = NewOrderRequestPayload {
            identifiers: vec![Identifier::ip(self.ip)],
            profile: self.options.profile.as_deref(),
        };
        let response = self
            .client
            .post_with_payload(&new_order_url, &request_payload)
            .await
            .map_err(|e| e.context("Failed to create order"))?;
        let order_url = find_header(&response, "Location")?;
        let order: Order = parse_body(&response, "new order")?;
        tracing::debug!(url = %order_url, status = ?order.status, "Created ACME order");
        Ok((order_url, order))
    }
    async fn authorize(&mut self, url: &str) -> Result<()> {
        let authorization = self.fetch_authorization(url).await?;
        if authorization.status == Status::Valid {
            tracing::debug!(url, "Authorization is already valid");
            return Ok(());
        }
        let challenge = authorization
            .challenges
            .iter()
            .find(|challenge| challenge.r#type == HTTP_01)
            .cloned()
            .ok_or_else(|| AcmeError::MissingHttpChallenge {
                url: url.to_string(),
            })?;
        let key_authorization =
            super::key_authorization(&challenge.token, &self.client.public_key)?;
        let _published =
            PublishedChallenge::publish(self.challenges, &challenge.token, &key_authorization);
        self.validate(url, &challenge).await
    }
    async fn validate(&mut self, url: &str, challenge: &Challenge) -> Result<()> {
        self.transition(OrderState::Validating);
        // https://datatracker.ietf.org/doc/html/rfc8555#section-7.5.1
        // The client indicates to the server that it is ready for the challenge
        // validation by sending an empty JSON body ("{}") carried in a POST
        // request to the challenge URL (not the authorization URL).
        self.client
            .post_with_payload(&challenge.url, &serde_json::Map::new())
            .await
            .map_err(|e| e.context("Failed to trigger challenge validation"))?;
        let mut timer = PollingTimer::new(
            self.options.poll_interval,
            self.options.authorization_attempts,
        );
        while timer.tick().await {
            let authorization = self.fetch_authorization(url).await?;
            match authorization.status {
                Status::Valid => return Ok(()),
                Status::Invalid => {
                    return Err(AcmeError::AuthorizationInvalid {
                        url: url.to_string(),
                        detail: invalid_authorization_detail(&authorization),
                    }
                    .into())
                }
                status => tracing::debug!(url, ?status, "Authorization not final yet"),
            }
        }
        Err(AcmeError::Timeout {
            what: format!("authorization {}", url),
            attempts: timer.max_attempts(),
        }
        .into())
    }
    async fn finalize(
        &mut self,
        order_url: &str,
        order: &Order,
        request: &CertificateRequest,
    ) -> Result<String> {
        let csr = base64url::encode(&request.csr_der);
        let response = self
            .client
            .post_with_payload(&order.finalize, &FinalizeRequest { csr: &csr })
            .await
            .map_err(|e| e.context("Failed to finalize order"))?;
        let mut order: Order = parse_body(&response, "finalize")?;
        let mut timer = PollingTimer::new(self.options.poll_interval, self.options.order_attempts);
        loop {
            if let Some(certificate_url) = order.certificate {
                return Ok(certificate_url);
            }
            if order.status == Status::Invalid {
                return Err(AcmeError::OrderInvalid {
                    url: order_url.to_string(),
                    detail: order
                        .error
                        .map(|problem| problem.to_string())
                        .unwrap_or_else(|| "no error detail".to_string()),
                }
                .into());
            }
            if !timer.tick().await {
                return Err(AcmeError::Timeout {
                    what: format!("order {}", order_url),
                    attempts: timer.max_attempts(),
                }
                .into());
            }
            let response = self.client.post_as_get(order_url).await?;
            order = parse_body(&response, "order")?;
            tracing::debug!(url = order_url, status = ?order.status, "Polled ACME order");
        }
    }
    async fn fetch_authorization(&mut self, url: &str) -> Result<Authorization> {
        let response = self.client.post_as_get(url).await?;
        parse_body(&response, "authorization")
    }
}

/// Withdraws a published challenge when dropped, which covers errors and a
/// flow dropped mid-validation alike.
struct PublishedChallenge<'a> {
    challenges: &'a dyn ChallengeStore,
    token: String,
}

impl<'a> PublishedChallenge<'a> {
    fn publish(challenges: &'a dyn ChallengeStore, token: &str, key_authorization: &str) -> Self {
        challenges.publish(token, key_authorization);
        PublishedChallenge {
            challenges,
            token: token.to_string(),
        }
    }
}

impl Drop for PublishedChallenge<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.challenges.remove(&self.token) {
            tracing::warn!(token = %self.token, "Failed to remove challenge: {:#}", e);
        }
    }
}

fn parse_body<T: DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T> {
    serde_json::from_slice(&response.body)
        .map_err(|e| Error::new(e).context(format!("Failed to parse {} response", what)))
}

fn invalid_authorization_detail(authorization: &Authorization) -> String {
    authorization
        .challenges
        .iter()
        .filter(|challenge| challenge.r#type == HTTP_01)
        .find_map(|challenge| challenge.error.as_ref())
        .map(|problem| problem.to_string())
        .unwrap_or_else(|| "no error detail".to_string())
}
