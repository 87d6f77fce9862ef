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

pub fn get_sha(bytes: &[u8]) -> Vec<u8> {
    use ::sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

/// Base64 with the URL-safe character set and no padding, the encoding
/// used by every JOSE member and by the CSR field of ACME finalize requests.
pub mod base64url {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
    }

    pub fn decode(text: impl AsRef<[u8]>) -> anyhow::Result<Vec<u8>> {
        base64::decode_config(text, base64::URL_SAFE_NO_PAD)
            .map_err(|e| anyhow::Error::new(e).context("Invalid base64url string"))
    }

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::decode_config(s, base64::URL_SAFE_NO_PAD)
            .map_err(|_| D::Error::custom("Invalid base64 string"))
    }
}
