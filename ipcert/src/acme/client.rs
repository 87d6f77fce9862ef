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

//! One ACME session: the account key, its key ID once known, and the nonce
//! to spend on the next signed request.

use super::directory::Directory;
use super::error::{is_bad_nonce, AcmeError, Problem};
use crate::crypto::EcPublicKey;
use crate::fetcher::Fetcher;
use crate::http::{HttpRequest, HttpResponse, Method};
use crate::signature::Signer;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;

const REPLAY_NONCE: &str = "Replay-Nonce";

pub struct Client {
    pub public_key: EcPublicKey,
    pub directory: Arc<Directory>,
    key_id: Option<String>,
    nonce: Option<String>,
    fetcher: Arc<dyn Fetcher>,
    signer: Arc<dyn Signer>,
}

/// How a signed request identifies the account key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod<'a> {
    /// Embeds the public key; only used to create the account.
    JsonWebKey,
    /// Refers to the account URL returned at creation.
    KeyId(&'a str),
}

#[derive(Clone, Copy)]
enum Addressing {
    JsonWebKey,
    KeyId,
}

impl Client {
    pub fn new(
        directory: Arc<Directory>,
        public_key: EcPublicKey,
        fetcher: Arc<dyn Fetcher>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Client {
            public_key,
            directory,
            key_id: None,
            nonce: None,
            fetcher,
            signer,
        }
    }
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }
    /// Binds the session to an account. The key ID never changes once set.
    pub fn set_key_id(&mut self, key_id: String) -> Result<()> {
        match &self.key_id {
            Some(existing) if *existing != key_id => Err(anyhow!(
                "The session is already bound to account {}",
                existing
            )),
            _ => {
                self.key_id = Some(key_id);
                Ok(())
            }
        }
    }
    /// Sends a request signed with the embedded public key, used for
    /// `newAccount`.
    pub async fn post_with_jwk<P: Serialize>(
        &mut self,
        url: &str,
        payload: &P,
    ) -> Result<HttpResponse> {
        self.post_impl(Addressing::JsonWebKey, url, Some(payload), None)
            .await
    }
    pub async fn post_with_payload<P: Serialize>(
        &mut self,
        url: &str,
        payload: &P,
    ) -> Result<HttpResponse> {
        self.post_impl(Addressing::KeyId, url, Some(payload), None)
            .await
    }
    // https://datatracker.ietf.org/doc/html/rfc8555#section-6.3
    pub async fn post_as_get(&mut self, url: &str) -> Result<HttpResponse> {
        self.post_impl::<()>(Addressing::KeyId, url, None, None)
            .await
    }
    /// Downloads the PEM certificate chain of a finalized order.
    pub async fn download_certificate(&mut self, url: &str) -> Result<String> {
        let response = self
            .post_impl::<()>(
                Addressing::KeyId,
                url,
                None,
                Some("application/pem-certificate-chain"),
            )
            .await?;
        String::from_utf8(response.body)
            .map_err(|e| anyhow::Error::new(e).context("The certificate chain is not UTF-8"))
    }
    async fn post_impl<P: Serialize>(
        &mut self,
        addressing: Addressing,
        url: &str,
        payload: Option<&P>,
        accept: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut retried = false;
        loop {
            match self.post_once(addressing, url, payload, accept).await {
                Err(e) if !retried && is_bad_nonce(&e) => {
                    tracing::warn!(url, "Nonce rejected, retrying once with a fresh nonce");
                    // Forces a HEAD to newNonce instead of the nonce that came
                    // with the rejection.
                    self.nonce = None;
                    retried = true;
                }
                result => return result,
            }
        }
    }
    async fn post_once<P: Serialize>(
        &mut self,
        addressing: Addressing,
        url: &str,
        payload: Option<&P>,
        accept: Option<&str>,
    ) -> Result<HttpResponse> {
        let nonce = self.take_nonce().await?;
        let auth_method = match addressing {
            Addressing::JsonWebKey => AuthMethod::JsonWebKey,
            Addressing::KeyId => AuthMethod::KeyId(
                self.key_id
                    .as_deref()
                    .ok_or_else(|| anyhow!("No account is bound to the session"))?,
            ),
        };
        let request_body = super::jws::create_acme_request_body(
            auth_method,
            &self.public_key,
            nonce,
            url,
            payload,
            self.signer.as_ref(),
        )
        .await?;
        let mut headers = vec![(
            "content-type".to_string(),
            "application/jose+json".to_string(),
        )];
        if let Some(accept) = accept {
            headers.push(("accept".to_string(), accept.to_string()));
        }
        let request = HttpRequest {
            url: url.to_string(),
            method: Method::Post,
            headers,
            body: request_body,
        };
        tracing::debug!(url, "Sending signed ACME request");
        let response = self.fetcher.fetch(request).await?;
        if let Ok(nonce) = find_header(&response, REPLAY_NONCE) {
            self.nonce = Some(nonce);
        }
        check_status(url, response)
    }
    async fn take_nonce(&mut self) -> Result<String> {
        match self.nonce.take() {
            Some(nonce) => Ok(nonce),
            None => self.fetch_new_nonce().await,
        }
    }
    // https://datatracker.ietf.org/doc/html/rfc8555#section-7.2
    async fn fetch_new_nonce(&self) -> Result<String> {
        let request = HttpRequest {
            method: Method::Head,
            headers: vec![],
            url: self.directory.new_nonce.clone(),
            body: vec![],
        };
        let response = self.fetcher.fetch(request).await?;
        let response = check_status(&self.directory.new_nonce, response)?;
        find_header(&response, REPLAY_NONCE)
            .map_err(|e| e.context("Failed to get a new nonce"))
    }
}

fn check_status(url: &str, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    let body = String::from_utf8_lossy(&response.body).into_owned();
    tracing::error!(url, status = response.status, %body, "ACME request failed");
    let error = match serde_json::from_slice::<Problem>(&response.body) {
        Ok(problem) if !problem.r#type.is_empty() => AcmeError::Problem {
            url: url.to_string(),
            status: response.status,
            problem,
        },
        _ => AcmeError::UnexpectedStatus {
            url: url.to_string(),
            status: response.status,
            body,
        },
    };
    Err(error.into())
}

pub fn find_header(response: &HttpResponse, header_name: &str) -> Result<String> {
    response
        .header(header_name)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("The response header does not contain {}", header_name))
}
