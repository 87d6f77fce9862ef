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

use ipcert::acme::challenge::ChallengeStore;
use ipcert::ip::PublicIpResolver;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Plain HTTP endpoints: HTTP-01 key authorizations under
/// `/.well-known/acme-challenge/{token}` and the detected address at `/ip`.
pub fn routes(
    challenges: Arc<dyn ChallengeStore>,
    ip_resolver: Arc<dyn PublicIpResolver>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let challenge = warp::get()
        .and(warp::path!(".well-known" / "acme-challenge" / String))
        .map(move |token: String| match challenges.lookup(&token) {
            Some(key_authorization) => {
                tracing::debug!(%token, "Answering HTTP-01 challenge");
                warp::reply::with_header(key_authorization, "content-type", "text/plain")
                    .into_response()
            }
            None => {
                tracing::debug!(%token, "Unknown HTTP-01 token");
                StatusCode::NOT_FOUND.into_response()
            }
        });
    let ip = warp::get().and(warp::path!("ip")).and_then(move || {
        let ip_resolver = ip_resolver.clone();
        async move {
            let response = match ip_resolver.public_ip().await {
                Ok(ip) => format!("{}\n", ip).into_response(),
                Err(e) => {
                    tracing::warn!("Public IP lookup failed: {:#}", e);
                    StatusCode::BAD_GATEWAY.into_response()
                }
            };
            Ok::<_, Infallible>(response)
        }
    });
    challenge.or(ip).unify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use ipcert::acme::challenge::ChallengeResponder;
    use ipcert::ip::FixedIpResolver;
    use std::net::IpAddr;

    struct FailingResolver;

    #[async_trait]
    impl PublicIpResolver for FailingResolver {
        async fn public_ip(&self) -> Result<IpAddr> {
            Err(anyhow!("lookup service unreachable"))
        }
    }

    fn filter_with(
        challenges: ChallengeResponder,
        resolver: Arc<dyn PublicIpResolver>,
    ) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
        routes(Arc::new(challenges), resolver)
    }

    fn fixed_ip() -> Arc<dyn PublicIpResolver> {
        Arc::new(FixedIpResolver::new("198.51.100.4".parse().unwrap()))
    }

    #[tokio::test]
    async fn serves_published_key_authorization() {
        let challenges = ChallengeResponder::new();
        challenges.publish("tok", "tok.thumb");
        let filter = filter_with(challenges, fixed_ip());
        let response = warp::test::request()
            .method("GET")
            .path("/.well-known/acme-challenge/tok")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.body().as_ref(), b"tok.thumb");
    }
    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let filter = filter_with(ChallengeResponder::new(), fixed_ip());
        let response = warp::test::request()
            .method("GET")
            .path("/.well-known/acme-challenge/missing")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    #[tokio::test]
    async fn removed_token_is_not_found() {
        let challenges = ChallengeResponder::new();
        challenges.publish("tok", "tok.thumb");
        challenges.remove("tok").unwrap();
        let filter = filter_with(challenges, fixed_ip());
        let response = warp::test::request()
            .method("GET")
            .path("/.well-known/acme-challenge/tok")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    #[tokio::test]
    async fn reports_public_ip() {
        let filter = filter_with(ChallengeResponder::new(), fixed_ip());
        let response = warp::test::request()
            .method("GET")
            .path("/ip")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"198.51.100.4\n");
    }
    #[tokio::test]
    async fn lookup_failure_is_bad_gateway() {
        let filter = filter_with(ChallengeResponder::new(), Arc::new(FailingResolver));
        let response = warp::test::request()
            .method("GET")
            .path("/ip")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
