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

//! Failures reported by an ACME server, and the typed errors the protocol
//! client raises so that callers can branch on them.

use serde::{Deserialize, Serialize};
use std::fmt;

const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// A [problem document](https://datatracker.ietf.org/doc/html/rfc7807),
/// as returned by ACME servers
/// [on errors](https://datatracker.ietf.org/doc/html/rfc8555#section-6.7).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Problem {
    #[serde(default)]
    pub r#type: String,
    pub detail: Option<String>,
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Problem>,
}

/// The ACME error types this client reacts to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProblemKind {
    BadNonce,
    Unauthorized,
    Other,
}

impl Problem {
    pub fn kind(&self) -> ProblemKind {
        match self.r#type.strip_prefix(ACME_ERROR_PREFIX) {
            Some("badNonce") => ProblemKind::BadNonce,
            Some("unauthorized") => ProblemKind::Unauthorized,
            _ => ProblemKind::Other,
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.r#type)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcmeError {
    #[error("ACME server rejected {url} with status {status}: {problem}")]
    Problem {
        url: String,
        status: u16,
        problem: Problem,
    },
    #[error("ACME server responded {url} with status {status}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("authorization {url} is invalid: {detail}")]
    AuthorizationInvalid { url: String, detail: String },
    #[error("order {url} is invalid: {detail}")]
    OrderInvalid { url: String, detail: String },
    #[error("authorization {url} does not offer an http-01 challenge")]
    MissingHttpChallenge { url: String },
    #[error("{what} did not complete after {attempts} polling attempts")]
    Timeout { what: String, attempts: u32 },
}

impl AcmeError {
    pub fn problem_kind(&self) -> Option<ProblemKind> {
        match self {
            AcmeError::Problem { problem, .. } => Some(problem.kind()),
            _ => None,
        }
    }
}

/// Whether `error` is a `badNonce` rejection, the only failure worth an
/// immediate retry.
pub fn is_bad_nonce(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<AcmeError>()
        .and_then(AcmeError::problem_kind)
        == Some(ProblemKind::BadNonce)
}
