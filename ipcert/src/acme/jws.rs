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

//! This module implements
//! [JSON Web Signature (JWS)](https://datatracker.ietf.org/doc/html/rfc7515).
//! [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555#:~:text=payload%20in%20a%20JSON%20Web%20Signature)
//! requires the request body to be encapsulated in JWS format for authentication.

use super::client::AuthMethod;
use crate::crypto::EcPublicKey;
use crate::signature::Signer;
use crate::utils::base64url;
use anyhow::{Error, Result};
use serde::{Deserialize, Serialize, Serializer};

pub async fn create_acme_request_body<P: Serialize>(
    auth_method: AuthMethod<'_>,
    public_key: &EcPublicKey,
    nonce: String,
    url: &str,
    payload: Option<&P>,
    signer: &dyn Signer,
) -> Result<Vec<u8>> {
    let (jwk, kid) = match auth_method {
        AuthMethod::JsonWebKey => (Some(public_key), None),
        AuthMethod::KeyId(key_id) => (None, Some(key_id)),
    };
    let protected_header = AcmeProtectedHeader {
        alg: Algorithm::ES256,
        nonce,
        url,
        jwk,
        kid,
    };
    let jws = JsonWebSignature::new(protected_header, payload, signer).await?;
    serde_json::to_vec(&jws).map_err(|e| Error::new(e).context("Failed to serialize JWS"))
}

/// Cryptographic signing algorithms allowed in JWS, as defined in
/// [RFC-7518](https://datatracker.ietf.org/doc/html/rfc7518#section-3.1).
#[derive(Clone, Copy)]
pub enum Algorithm {
    /// ECDSA using P-256 and SHA-256
    ES256,
}

impl Serialize for Algorithm {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Algorithm::ES256 => serializer.serialize_str("ES256"),
        }
    }
}

/// The protected headers which is used authentication ACME request
/// [(RFC 8555)](https://datatracker.ietf.org/doc/html/rfc8555#:~:text=The%20JWS%20Protected%20Header%20MUST%20include%20the%20following%20fields).
/// Exactly one of `jwk` and `kid` is present.
#[derive(Serialize)]
struct AcmeProtectedHeader<'a> {
    alg: Algorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<&'a EcPublicKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    nonce: String,
    url: &'a str,
}

/// [JSON Web Signature](https://datatracker.ietf.org/doc/html/rfc7515)
/// in flattened JSON serialization.
#[derive(Debug, Deserialize, Serialize)]
pub struct JsonWebSignature {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

impl JsonWebSignature {
    /// Constructs a signature from serialiable header and payload.
    /// If the given `payload` is `None`, it will be serialized into an empty
    /// string, which is how ACME encodes POST-as-GET.
    pub async fn new<H: Serialize, P: Serialize>(
        protected_header: H,
        payload: Option<&P>,
        signer: &dyn Signer,
    ) -> Result<Self> {
        let protected_header = serde_json::to_string(&protected_header)
            .map_err(|e| Error::new(e).context("Failed to serialize protected header."))?;
        let payload = if let Some(payload) = payload {
            serde_json::to_string(payload)
                .map_err(|e| Error::new(e).context("Failed to serialize payload."))?
        } else {
            "".to_string()
        };
        Self::new_from_serialized(&protected_header, &payload, signer).await
    }
    /// Constructs a signature from strings of serialized header and payload.
    pub async fn new_from_serialized(
        protected_header: &str,
        payload: &str,
        signer: &dyn Signer,
    ) -> Result<Self> {
        let protected_header = base64url::encode(protected_header);
        let payload = base64url::encode(payload);
        // https://datatracker.ietf.org/doc/html/rfc7515#:~:text=The%20input%20to%20the%20digital%20signature
        let message = format!("{}.{}", protected_header, payload);
        let signature = signer
            .sign(message.as_bytes())
            .await
            .map_err(|e| e.context("Failed to sign message"))?;
        Ok(JsonWebSignature {
            protected: protected_header,
            payload,
            signature: base64url::encode(&signature),
        })
    }
}
