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
use async_trait::async_trait;
use hyper::{client::HttpConnector, Client};
use hyper_rustls::HttpsConnector;
use ipcert::fetcher::Fetcher;
use ipcert::http::{HttpRequest, HttpResponse};
use std::convert::TryInto;
use std::time::Duration;

/// A [`Fetcher`] implemented by the external `hyper` crate.
pub struct HyperFetcher {
    client: Client<HttpsConnector<HttpConnector>>,
    timeout: Duration,
}

impl HyperFetcher {
    pub fn new(timeout: Duration) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        HyperFetcher {
            client: Client::builder().build(https),
            timeout,
        }
    }
}

#[async_trait]
impl Fetcher for HyperFetcher {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let request: http::Request<Vec<u8>> = request
            .try_into()
            .map_err(|e: Error| e.context("Failed to convert HttpRequest to http::Request"))?;
        let request: http::Request<hyper::body::Body> = request.map(|body| body.into());
        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| Error::new(e).context("Failed to request by Hyper client"))?;
            let (response_parts, response_body) = response.into_parts();
            let response_body = hyper::body::to_bytes(response_body)
                .await
                .map_err(|e| Error::new(e).context("Failed to convert response body to bytes"))?;
            let response = http::Response::from_parts(response_parts, response_body.to_vec());
            response.try_into()
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow::anyhow!("Request to {} timed out after {:?}", url, self.timeout))?
    }
}
