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

//! Answers for pending [HTTP-01](https://datatracker.ietf.org/doc/html/rfc8555#section-8.3)
//! challenges, served under `/.well-known/acme-challenge/<token>`.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Where the order flow publishes key authorizations for the HTTP-01
/// endpoint to serve.
pub trait ChallengeStore: Send + Sync {
    fn publish(&self, token: &str, key_authorization: &str);
    fn lookup(&self, token: &str) -> Option<String>;
    fn remove(&self, token: &str) -> Result<()>;
}

/// A concurrent token to key-authorization map, shared between the renewal
/// task (writer) and the HTTP-01 endpoint (readers). Clones share state.
#[derive(Clone, Debug, Default)]
pub struct ChallengeResponder {
    challenges: Arc<DashMap<String, String>>,
}

impl ChallengeResponder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }
}

impl ChallengeStore for ChallengeResponder {
    fn publish(&self, token: &str, key_authorization: &str) {
        tracing::debug!(%token, "Publishing HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }
    fn lookup(&self, token: &str) -> Option<String> {
        let found = self.challenges.get(token).map(|v| v.value().clone());
        tracing::trace!(%token, found = found.is_some(), "HTTP-01 challenge lookup");
        found
    }
    fn remove(&self, token: &str) -> Result<()> {
        if self.challenges.remove(token).is_some() {
            tracing::debug!(%token, "Removed HTTP-01 challenge");
        }
        Ok(())
    }
}
