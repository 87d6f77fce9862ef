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

use crate::signature::rust_signer::RustSigner;
use crate::utils::{base64url, get_sha};
use anyhow::{anyhow, Error, Result};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::LineEnding;
use p256::SecretKey;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn get_der_from_pem(pem_text: &str, expected_tag: &str) -> Result<Vec<u8>> {
    for pem in ::pem::parse_many(pem_text).map_err(Error::new)? {
        if pem.tag == expected_tag {
            return Ok(pem.contents);
        }
    }
    Err(anyhow!(
        r#"The PEM file does not contains "{}" block"#,
        expected_tag
    ))
}

/// A P-256 public key in [JWK](https://datatracker.ietf.org/doc/html/rfc7517) form.
// The fields are declared in lexicographic order, because RFC 7638 computes
// the thumbprint over exactly this serialization.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct EcPublicKey {
    pub crv: String,
    pub kty: String,
    #[serde(with = "base64url")]
    pub x: Vec<u8>,
    #[serde(with = "base64url")]
    pub y: Vec<u8>,
}

impl EcPublicKey {
    pub fn from_verifying_key(key: &VerifyingKey) -> Result<Self> {
        let point = key.to_encoded_point(/*compress=*/ false);
        let x = point
            .x()
            .ok_or_else(|| Error::msg("The public key is the identity point"))?;
        let y = point
            .y()
            .ok_or_else(|| Error::msg("The public key is in compressed form"))?;
        Ok(EcPublicKey {
            crv: "P-256".to_string(),
            kty: "EC".to_string(),
            x: x.to_vec(),
            y: y.to_vec(),
        })
    }
    /// Calculates the JWK thumbprint defined by
    /// [RFC7638](https://datatracker.ietf.org/doc/html/rfc7638#section-3).
    pub fn get_jwk_thumbprint(&self) -> Result<Vec<u8>> {
        let message = serde_json::to_string(&self)?;
        Ok(get_sha(message.as_bytes()))
    }
}

/// The ACME account key. It is generated once, persisted as a SEC1 PEM,
/// and reloaded unchanged on every later start.
#[derive(Clone)]
pub struct AccountKey {
    secret_key: SecretKey,
}

impl AccountKey {
    pub fn generate() -> Self {
        AccountKey {
            secret_key: SecretKey::random(&mut rand_core::OsRng),
        }
    }
    pub fn from_sec1_pem(pem: &str) -> Result<Self> {
        let secret_key = SecretKey::from_sec1_pem(pem)
            .map_err(|e| Error::msg(e.to_string()).context("Failed to parse EC PRIVATE KEY"))?;
        Ok(AccountKey { secret_key })
    }
    pub fn from_bytes(d: &[u8]) -> Result<Self> {
        let secret_key = SecretKey::from_slice(d)
            .map_err(|e| Error::msg(e.to_string()).context("Invalid P-256 private key"))?;
        Ok(AccountKey { secret_key })
    }
    pub fn to_sec1_pem(&self) -> Result<String> {
        let pem = self
            .secret_key
            .to_sec1_pem(LineEnding::LF)
            .map_err(|e| Error::msg(e.to_string()).context("Failed to encode EC PRIVATE KEY"))?;
        Ok(pem.to_string())
    }
    pub fn public_key(&self) -> Result<EcPublicKey> {
        let signing_key = SigningKey::from(&self.secret_key);
        EcPublicKey::from_verifying_key(signing_key.verifying_key())
    }
    pub fn create_signer(&self) -> RustSigner {
        RustSigner::from_signing_key(SigningKey::from(&self.secret_key))
    }
}

/// A certificate signing request for a single IP address, together with the
/// freshly generated key it binds.
pub struct CertificateRequest {
    pub csr_der: Vec<u8>,
    /// PKCS#8 PEM of the certificate key.
    pub private_key_pem: String,
}

impl CertificateRequest {
    /// Generates a new P-256 key and a CSR carrying `ip` as its only subject
    /// alternative name. `common_name` only has to be syntactically valid;
    /// CAs issuing IP certificates take the identity from the SAN.
    pub fn for_ip(ip: IpAddr, common_name: &str) -> Result<Self> {
        use rcgen::{
            CertificateParams, DistinguishedName, DnType, KeyPair, SanType,
            PKCS_ECDSA_P256_SHA256,
        };
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::new(e).context("Failed to generate certificate key"))?;
        let mut params = CertificateParams::default();
        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name);
        params.distinguished_name = distinguished_name;
        params.subject_alt_names = vec![SanType::IpAddress(ip)];
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| Error::new(e).context("Failed to build CSR"))?;
        Ok(CertificateRequest {
            csr_der: csr.der().to_vec(),
            private_key_pem: key_pair.serialize_pem(),
        })
    }
}

/// DER certificates parsed from a PEM chain, leaf first.
#[derive(Clone, Debug)]
pub struct CertificateChain {
    pub end_entity: Vec<u8>,
    /// `issuers` are sorted as Secion 7.4.2 in RFC-4346.
    /// For example, the root certificate is the last one.
    pub issuers: Vec<Vec<u8>>,
}

impl CertificateChain {
    const TAG: &'static str = "CERTIFICATE";
    /// Parse `CertificateChain` from multiple PEM files.
    /// Each input file may contain multiple PEM certificates.
    /// Input files must be sorted like `[cert_pem, issuer_pem, root_pem]`.
    pub fn from_pem_files(pem_files: &[&str]) -> Result<Self> {
        let mut der_items = vec![];
        for current_file in pem_files {
            for pem_item in ::pem::parse_many(current_file).map_err(Error::new)? {
                if pem_item.tag != Self::TAG {
                    return Err(anyhow!("Expecting {}, found {}", Self::TAG, pem_item.tag));
                }
                der_items.push(pem_item.contents);
            }
        }
        let mut der_items = der_items.into_iter();
        let end_entity = der_items
            .next()
            .ok_or_else(|| Error::msg("Expecting PEM files to contain at least one certificate"))?;
        Ok(CertificateChain {
            end_entity,
            issuers: der_items.collect(),
        })
    }
    /// All certificates, leaf first.
    pub fn to_der_list(&self) -> Vec<Vec<u8>> {
        std::iter::once(self.end_entity.clone())
            .chain(self.issuers.iter().cloned())
            .collect()
    }
    /// Reads the `notBefore` and `notAfter` of the leaf certificate.
    pub fn validity(&self) -> Result<(SystemTime, SystemTime)> {
        let (_, certificate) = x509_parser::parse_x509_certificate(&self.end_entity)
            .map_err(|e| Error::msg(e.to_string()).context("Failed to parse leaf certificate"))?;
        let validity = certificate.validity();
        Ok((
            timestamp_to_system_time(validity.not_before.timestamp()),
            timestamp_to_system_time(validity.not_after.timestamp()),
        ))
    }
}

fn timestamp_to_system_time(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}
