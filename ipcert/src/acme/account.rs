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

use super::client::{find_header, Client};
use super::directory::{Directory, NewAccountRequestPayload, NewAccountResponsePayload, Status};
use crate::crypto::AccountKey;
use crate::fetcher::Fetcher;
use crate::storage::Storage;
use anyhow::{anyhow, Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

const ACCOUNT_KEY_FILE: &str = "acme-account-key.pem";
const ACCOUNT_KID_FILE: &str = "acme-account-kid.txt";

/// The ACME account: its key and the key ID (account URL) the server
/// assigned at creation.
#[derive(Clone)]
pub struct Account {
    pub key: AccountKey,
    pub key_id: String,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Returns `None` unless both the key and the key ID are stored.
    async fn load(&self) -> Result<Option<Account>>;
    async fn save(&self, account: &Account) -> Result<()>;
}

/// Keeps the account as two entries of a [`Storage`]: the SEC1 PEM key and
/// the key ID as text.
pub struct StorageAccountStore {
    storage: Arc<dyn Storage>,
}

impl StorageAccountStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        StorageAccountStore { storage }
    }
}

#[async_trait]
impl AccountStore for StorageAccountStore {
    async fn load(&self) -> Result<Option<Account>> {
        let key_pem = self.storage.read(ACCOUNT_KEY_FILE).await?;
        let key_id = self.storage.read(ACCOUNT_KID_FILE).await?;
        let (key_pem, key_id) = match (key_pem, key_id) {
            (Some(key_pem), Some(key_id)) => (key_pem, key_id),
            _ => return Ok(None),
        };
        let key_id = key_id.trim();
        if key_id.is_empty() {
            return Ok(None);
        }
        let key = AccountKey::from_sec1_pem(&key_pem)
            .map_err(|e| e.context(format!("Failed to load {}", ACCOUNT_KEY_FILE)))?;
        Ok(Some(Account {
            key,
            key_id: key_id.to_string(),
        }))
    }
    async fn save(&self, account: &Account) -> Result<()> {
        self.storage
            .write(ACCOUNT_KEY_FILE, &account.key.to_sec1_pem()?)
            .await?;
        self.storage.write(ACCOUNT_KID_FILE, &account.key_id).await
    }
}

/// Creates the ACME account on first use and binds later sessions to it.
pub struct AccountManager {
    store: Arc<dyn AccountStore>,
    contact: Vec<String>,
}

impl AccountManager {
    pub fn new(store: Arc<dyn AccountStore>, contact: Vec<String>) -> Self {
        AccountManager { store, contact }
    }
    /// Returns a session bound to the stored account, creating and
    /// persisting the account first if there is none.
    pub async fn establish(
        &self,
        directory: Arc<Directory>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Client> {
        if let Some(account) = self.store.load().await? {
            tracing::debug!(kid = %account.key_id, "Loaded ACME account");
            let mut client = Client::new(
                directory,
                account.key.public_key()?,
                fetcher,
                Arc::new(account.key.create_signer()),
            );
            client.set_key_id(account.key_id)?;
            return Ok(client);
        }
        let key = AccountKey::generate();
        let mut client = Client::new(
            directory.clone(),
            key.public_key()?,
            fetcher,
            Arc::new(key.create_signer()),
        );
        // https://datatracker.ietf.org/doc/html/rfc8555#section-7.3
        let request_payload = NewAccountRequestPayload {
            contact: self.contact.clone(),
            terms_of_service_agreed: true,
        };
        let response = client
            .post_with_jwk(&directory.new_account, &request_payload)
            .await
            .map_err(|e| e.context("Failed to create ACME account"))?;
        let rsp_payload: NewAccountResponsePayload = serde_json::from_slice(&response.body)
            .map_err(|e| Error::new(e).context("Failed to parse new account response"))?;
        if rsp_payload.status != Status::Valid {
            return Err(anyhow!(
                "The account status is {:?} instead of valid",
                rsp_payload.status
            ));
        }
        let key_id = find_header(&response, "Location")?;
        self.store
            .save(&Account {
                key,
                key_id: key_id.clone(),
            })
            .await
            .map_err(|e| e.context("Failed to persist ACME account"))?;
        tracing::info!(kid = %key_id, "Created ACME account");
        client.set_key_id(key_id)?;
        Ok(client)
    }
}
