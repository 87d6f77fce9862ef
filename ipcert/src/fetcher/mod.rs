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

#[cfg(test)]
pub mod mock_fetcher;

use crate::http::{HttpRequest, HttpResponse, Method};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// An interface for fetching resources from network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Sends a `GET` request and returns the body of a successful response.
pub async fn get(fetcher: &dyn Fetcher, url: &str) -> Result<Vec<u8>> {
    let request = HttpRequest {
        body: vec![],
        headers: vec![],
        method: Method::Get,
        url: url.to_string(),
    };
    let response = fetcher.fetch(request).await?;
    if response.is_success() {
        return Ok(response.body);
    }
    let body = String::from_utf8_lossy(&response.body);
    tracing::error!(url, status = response.status, %body, "GET request failed");
    Err(anyhow!(
        "GET {} returned status {}: {}",
        url,
        response.status,
        body
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;

    const URL: &str = "https://acme.test/directory";

    fn response(status: u16, body: &[u8]) -> HttpResponse {
        HttpResponse {
            body: body.to_vec(),
            headers: vec![],
            status,
        }
    }

    #[tokio::test]
    async fn get_returns_body() {
        let (fetcher, mut server) = mock_fetcher::create();
        let server_thread = async {
            server.expect(Method::Get, URL).await.unwrap();
            server.respond(response(200, b"{}")).await.unwrap();
        };
        let (_, body) = tokio::join!(server_thread, get(&fetcher, URL));
        assert_eq!(body.unwrap(), b"{}".to_vec());
    }
    #[tokio::test]
    async fn get_error_carries_status_and_body() {
        let (fetcher, mut server) = mock_fetcher::create();
        let server_thread = async {
            server.expect(Method::Get, URL).await.unwrap();
            server
                .respond(response(503, b"down for maintenance"))
                .await
                .unwrap();
        };
        let (_, body) = tokio::join!(server_thread, get(&fetcher, URL));
        let message = body.unwrap_err().to_string();
        assert!(message.contains("503"));
        assert!(message.contains("down for maintenance"));
    }
}
