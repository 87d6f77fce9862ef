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

//! A [`Fetcher`] whose responses are scripted by a [`MockServer`] running in
//! the same test, used to play the ACME server in unit tests.

use super::Fetcher;
use crate::http::{HttpRequest, HttpResponse, Method};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::{mpsc, Mutex},
    time::timeout,
};

pub struct MockFetcher {
    request_sender: mpsc::Sender<HttpRequest>,
    response_receiver: Arc<Mutex<mpsc::Receiver<HttpResponse>>>,
    time_limit: Duration,
}

pub struct MockServer {
    request_receiver: mpsc::Receiver<HttpRequest>,
    response_sender: mpsc::Sender<HttpResponse>,
    time_limit: Duration,
}

pub fn create() -> (MockFetcher, MockServer) {
    let (request_sender, request_receiver) = mpsc::channel(1);
    let (response_sender, response_receiver) = mpsc::channel(1);
    let mock_fetcher = MockFetcher {
        request_sender,
        response_receiver: Arc::new(Mutex::new(response_receiver)),
        time_limit: Duration::from_secs(1),
    };
    let mock_server = MockServer {
        request_receiver,
        response_sender,
        time_limit: Duration::from_secs(1),
    };
    (mock_fetcher, mock_server)
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request_url = request.url.clone();
        // Holding the lock across send and receive keeps each response paired
        // with its own request when several tasks share the fetcher.
        let mut response_receiver = self.response_receiver.lock().await;
        self.request_sender.send(request).await?;
        timeout(self.time_limit, response_receiver.recv())
            .await
            .map_err(|_e| {
                anyhow!(
                    "Failed to get response for URL \"{}\" within time limit, \
                    did you set up \"handle_next_request\" on the MockServer side?",
                    request_url,
                )
            })?
            .ok_or_else(|| anyhow!("No more message"))
    }
}

impl MockServer {
    pub async fn handle_next_request(
        &mut self,
        expected_request: HttpRequest,
        response: HttpResponse,
    ) -> Result<()> {
        let actual_request = self.next_request().await?;
        if actual_request != expected_request {
            return Err(anyhow!(
                "Actual {:?}\n Expected {:?}",
                actual_request,
                expected_request
            ));
        }
        self.respond(response).await
    }
    /// Receives the next request without answering it, for requests whose
    /// body is not known in advance (such as signed JWS bodies).
    pub async fn next_request(&mut self) -> Result<HttpRequest> {
        timeout(self.time_limit, self.request_receiver.recv())
            .await
            .map_err(|_e| {
                anyhow!(
                    "Failed to get request within time limit, \
                    did you call \"fetch\" on the MockFetcher side?"
                )
            })?
            .ok_or_else(|| anyhow!("The MockFetcher has been dropped"))
    }
    /// Receives the next request and checks its method and URL.
    pub async fn expect(&mut self, method: Method, url: &str) -> Result<HttpRequest> {
        let request = self.next_request().await?;
        if request.method != method || request.url != url {
            return Err(anyhow!(
                "Expected {:?} {}, got {:?} {}",
                method,
                url,
                request.method,
                request.url
            ));
        }
        Ok(request)
    }
    pub async fn respond(&mut self, response: HttpResponse) -> Result<()> {
        self.response_sender.send(response).await?;
        Ok(())
    }
    /// Returns a request if one arrives within a short grace period.
    pub async fn try_next_request(&mut self) -> Option<HttpRequest> {
        timeout(Duration::from_millis(50), self.request_receiver.recv())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::super::get;
    use super::*;
    fn get_request(url: &str) -> HttpRequest {
        HttpRequest {
            body: vec![],
            method: Method::Get,
            headers: vec![],
            url: url.to_string(),
        }
    }
    fn ok_response(body: Vec<u8>) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![],
            body,
        }
    }
    // The server side calls `handle_next_request` for each `fetch` at client
    // side.
    #[tokio::test]
    async fn it_works() {
        let (fetcher, mut server) = create();
        let server_thread = async {
            server
                .handle_next_request(get_request("https://foo.com/1"), ok_response(vec![1, 2, 3]))
                .await
                .unwrap();
            let request = server.expect(Method::Get, "https://foo.com/2").await.unwrap();
            assert!(request.body.is_empty());
            server.respond(ok_response(vec![7, 8, 9])).await.unwrap();
            assert!(server.try_next_request().await.is_none());
        };
        let client_thread = async {
            assert_eq!(
                get(&fetcher, "https://foo.com/1").await.unwrap(),
                vec![1, 2, 3]
            );
            assert_eq!(
                get(&fetcher, "https://foo.com/2").await.unwrap(),
                vec![7, 8, 9]
            );
        };
        tokio::join!(server_thread, client_thread);
    }
    // In the case client side actual request does not match against server
    // side expected request, both server and client will get an error.
    #[tokio::test]
    async fn req_mismatch() {
        let (fetcher, mut server) = create();
        let server_thread = async {
            assert!(server
                .handle_next_request(get_request("https://foo.com"), ok_response(vec![1, 2, 3]))
                .await
                .is_err());
        };
        let client_thread = async { assert!(get(&fetcher, "https://bar.com").await.is_err()) };
        tokio::join!(server_thread, client_thread);
    }
}
