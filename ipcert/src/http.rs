// Copyright 2021 Google LLC
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
use std::convert::TryFrom;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub body: Vec<u8>,
    pub headers: HeaderFields,
    pub method: Method,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct HttpResponse {
    pub body: Vec<u8>,
    pub headers: HeaderFields,
    pub status: u16,
}

pub type HeaderFields = Vec<(String, String)>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
    /// Returns the value of the first header named `name`, compared
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                Some(v.as_str())
            } else {
                None
            }
        })
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Head => http::Method::HEAD,
            Method::Post => http::Method::POST,
        }
    }
}

impl TryFrom<HttpRequest> for http::Request<Vec<u8>> {
    type Error = Error;
    fn try_from(request: HttpRequest) -> Result<Self> {
        let mut builder = http::Request::builder()
            .method(http::Method::from(request.method))
            .uri(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder
            .body(request.body)
            .map_err(|e| Error::new(e).context("Failed to build http::Request"))
    }
}

impl TryFrom<http::Response<Vec<u8>>> for HttpResponse {
    type Error = Error;
    fn try_from(response: http::Response<Vec<u8>>) -> Result<Self> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = value
                    .to_str()
                    .map_err(|e| Error::new(e).context("Header value is not visible ASCII"))?;
                Ok((name.to_string(), value.to_string()))
            })
            .collect::<Result<HeaderFields>>()?;
        Ok(HttpResponse {
            body: response.into_body(),
            headers,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    #[test]
    fn converts_request() {
        let request = HttpRequest {
            body: b"{}".to_vec(),
            headers: vec![(
                "content-type".to_string(),
                "application/jose+json".to_string(),
            )],
            method: Method::Post,
            url: "https://acme.test/new-order".to_string(),
        };
        let request: http::Request<Vec<u8>> = request.try_into().unwrap();
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri(), "https://acme.test/new-order");
        assert_eq!(
            request.headers()["content-type"],
            "application/jose+json"
        );
        assert_eq!(request.body(), b"{}");
    }
    #[test]
    fn converts_response() {
        let response = http::Response::builder()
            .status(201)
            .header("Replay-Nonce", "abc")
            .body(vec![1, 2])
            .unwrap();
        let response: HttpResponse = response.try_into().unwrap();
        assert!(response.is_success());
        assert_eq!(response.header("replay-nonce"), Some("abc"));
        assert_eq!(response.header("location"), None);
        assert_eq!(response.body, vec![1, 2]);
    }
}
