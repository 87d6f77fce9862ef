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

//! Issued certificates: the stored record, the renewal policy, and the
//! hand-off of the active certificate to the TLS layer.

use crate::crypto::{get_der_from_pem, CertificateChain};
use crate::ip::PublicIpResolver;
use crate::storage::Storage;
use anyhow::{anyhow, Error, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Renew once the certificate has been valid for longer than this.
pub const MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
/// Renew once less than this remains before expiry.
pub const MIN_REMAINING: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    /// The canonical text form of the IP address.
    pub identifier: String,
    /// PEM certificates, leaf first.
    pub certificate_chain_pem: String,
    /// PKCS#8 PEM of the certificate key.
    pub private_key_pem: String,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

impl CertificateRecord {
    /// Builds a record from a freshly issued chain, reading the validity
    /// window from the leaf.
    pub fn new(ip: IpAddr, certificate_chain_pem: String, private_key_pem: String) -> Result<Self> {
        let chain = CertificateChain::from_pem_files(&[&certificate_chain_pem])
            .map_err(|e| e.context("Failed to parse issued certificate chain"))?;
        let (not_before, not_after) = chain.validity()?;
        Ok(CertificateRecord {
            identifier: ip.to_string(),
            certificate_chain_pem,
            private_key_pem,
            not_before,
            not_after,
        })
    }
    /// Renew when more than [`MAX_AGE`] has elapsed since `not_before`, or
    /// less than [`MIN_REMAINING`] is left before `not_after`.
    pub fn needs_renewal(&self, now: SystemTime) -> bool {
        let age = now.duration_since(self.not_before).unwrap_or_default();
        let remaining = self.not_after.duration_since(now).unwrap_or_default();
        age > MAX_AGE || remaining < MIN_REMAINING
    }
    /// Converts the record into the key rustls serves, with the full chain.
    pub fn certified_key(&self) -> Result<CertifiedKey> {
        let chain = CertificateChain::from_pem_files(&[&self.certificate_chain_pem])?
            .to_der_list()
            .into_iter()
            .map(rustls::Certificate)
            .collect();
        let private_key =
            rustls::PrivateKey(get_der_from_pem(&self.private_key_pem, "PRIVATE KEY")?);
        let signing_key = rustls::sign::any_supported_type(&private_key)
            .map_err(|_| anyhow!("The certificate key is not supported by rustls"))?;
        Ok(CertifiedKey::new(chain, signing_key))
    }
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn load(&self, ip: IpAddr) -> Result<Option<CertificateRecord>>;
    /// Replaces the record stored for `record.identifier`.
    async fn save(&self, record: &CertificateRecord) -> Result<()>;
}

/// Stores one JSON record per IP address in a [`Storage`].
pub struct StorageCertificateStore {
    storage: Arc<dyn Storage>,
}

impl StorageCertificateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        StorageCertificateStore { storage }
    }
}

fn storage_key(identifier: &str) -> String {
    format!("{}.json", identifier.replace([':', '/'], "_"))
}

#[async_trait]
impl CertificateStore for StorageCertificateStore {
    async fn load(&self, ip: IpAddr) -> Result<Option<CertificateRecord>> {
        let key = storage_key(&ip.to_string());
        let text = match self.storage.read(&key).await? {
            Some(text) => text,
            None => return Ok(None),
        };
        match serde_json::from_str(&text) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(%key, "Ignoring unreadable certificate record: {}", e);
                Ok(None)
            }
        }
    }
    async fn save(&self, record: &CertificateRecord) -> Result<()> {
        let text = serde_json::to_string_pretty(record)
            .map_err(|e| Error::new(e).context("Failed to serialize certificate record"))?;
        self.storage
            .write(&storage_key(&record.identifier), &text)
            .await
    }
}

/// Obtains a new certificate for an IP address.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn issue(&self, ip: IpAddr) -> Result<CertificateRecord>;
}

/// A record together with its ready-to-serve TLS key.
pub struct ActiveCertificate {
    pub record: CertificateRecord,
    pub certified_key: Arc<CertifiedKey>,
}

impl ActiveCertificate {
    pub fn new(record: CertificateRecord) -> Result<Self> {
        let certified_key = Arc::new(record.certified_key()?);
        Ok(ActiveCertificate {
            record,
            certified_key,
        })
    }
}

pub trait CertificateProvider: Send + Sync {
    fn current(&self) -> Option<Arc<ActiveCertificate>>;
    fn publish(&self, certificate: Arc<ActiveCertificate>);
}

/// The process-wide active certificate. Readers never block and always see
/// a complete value.
#[derive(Default)]
pub struct CurrentCertificate(ArcSwapOption<ActiveCertificate>);

impl CurrentCertificate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateProvider for CurrentCertificate {
    fn current(&self) -> Option<Arc<ActiveCertificate>> {
        self.0.load_full()
    }
    fn publish(&self, certificate: Arc<ActiveCertificate>) {
        self.0.store(Some(certificate));
    }
}

/// Selects the published certificate for every TLS handshake.
pub struct CertificateResolver {
    provider: Arc<dyn CertificateProvider>,
}

impl CertificateResolver {
    pub fn new(provider: Arc<dyn CertificateProvider>) -> Self {
        CertificateResolver { provider }
    }
}

impl ResolvesServerCert for CertificateResolver {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        self.provider
            .current()
            .map(|certificate| certificate.certified_key.clone())
    }
}

/// Keeps the certificate for the current public IP fresh.
pub struct CertificateManager {
    ip_resolver: Arc<dyn PublicIpResolver>,
    issuer: Arc<dyn CertificateIssuer>,
    store: Arc<dyn CertificateStore>,
    current: Arc<dyn CertificateProvider>,
    // At most one check-and-issue cycle at a time.
    cycle: tokio::sync::Mutex<()>,
}

impl CertificateManager {
    pub fn new(
        ip_resolver: Arc<dyn PublicIpResolver>,
        issuer: Arc<dyn CertificateIssuer>,
        store: Arc<dyn CertificateStore>,
        current: Arc<dyn CertificateProvider>,
    ) -> Self {
        CertificateManager {
            ip_resolver,
            issuer,
            store,
            current,
            cycle: tokio::sync::Mutex::new(()),
        }
    }
    pub async fn ensure_fresh(&self) -> Result<Arc<ActiveCertificate>> {
        self.ensure_fresh_at(SystemTime::now()).await
    }
    /// Publishes the stored certificate when it is still fresh at `now`,
    /// otherwise issues, stores and publishes a new one. On error the
    /// previously published certificate stays active.
    pub async fn ensure_fresh_at(&self, now: SystemTime) -> Result<Arc<ActiveCertificate>> {
        let _cycle = self.cycle.lock().await;
        let ip = self
            .ip_resolver
            .public_ip()
            .await
            .map_err(|e| e.context("Failed to resolve public IP"))?;
        if let Some(record) = self.store.load(ip).await? {
            if let Some(active) = self.reusable(ip, record, now) {
                tracing::info!(
                    %ip,
                    not_after = ?active.record.not_after,
                    "Stored certificate is fresh"
                );
                return Ok(self.publish(active));
            }
        } else {
            tracing::info!(%ip, "No stored certificate");
        }
        tracing::info!(%ip, "Issuing certificate");
        let record = self
            .issuer
            .issue(ip)
            .await
            .map_err(|e| e.context(format!("Failed to issue certificate for {}", ip)))?;
        let active = ActiveCertificate::new(record)?;
        self.store
            .save(&active.record)
            .await
            .map_err(|e| e.context("Failed to store certificate"))?;
        tracing::info!(%ip, not_after = ?active.record.not_after, "Issued certificate");
        Ok(self.publish(active))
    }
    fn reusable(
        &self,
        ip: IpAddr,
        record: CertificateRecord,
        now: SystemTime,
    ) -> Option<ActiveCertificate> {
        if record.identifier != ip.to_string() {
            tracing::warn!(
                %ip,
                stored = %record.identifier,
                "Stored certificate names another address"
            );
            return None;
        }
        if record.needs_renewal(now) {
            tracing::info!(%ip, "Stored certificate is due for renewal");
            return None;
        }
        match ActiveCertificate::new(record) {
            Ok(active) => Some(active),
            Err(e) => {
                tracing::warn!(%ip, "Stored certificate is unusable: {:#}", e);
                None
            }
        }
    }
    fn publish(&self, active: ActiveCertificate) -> Arc<ActiveCertificate> {
        let active = Arc::new(active);
        self.current.publish(active.clone());
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::tests::TestCa;
    use crate::ip::FixedIpResolver;
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const HOUR: Duration = Duration::from_secs(60 * 60);
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn ip() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    fn record_with(not_before: SystemTime, not_after: SystemTime) -> CertificateRecord {
        CertificateRecord {
            identifier: ip().to_string(),
            certificate_chain_pem: String::new(),
            private_key_pem: String::new(),
            not_before,
            not_after,
        }
    }

    #[test]
    fn renewal_policy() {
        let now = SystemTime::now();
        // Issued 25 hours ago.
        assert!(record_with(now - 25 * HOUR, now + 5 * DAY).needs_renewal(now));
        // Issued an hour ago, two days left.
        assert!(!record_with(now - HOUR, now + 2 * DAY).needs_renewal(now));
        // Twelve hours left.
        assert!(record_with(now - HOUR, now + 12 * HOUR).needs_renewal(now));
        // Already expired.
        assert!(record_with(now - 2 * HOUR, now - HOUR).needs_renewal(now));
    }

    #[test]
    fn storage_keys_are_sanitized() {
        assert_eq!(storage_key("203.0.113.7"), "203.0.113.7.json");
        assert_eq!(storage_key("2001:db8::1"), "2001_db8__1.json");
        assert_eq!(storage_key("a/b"), "a_b.json");
    }

    #[tokio::test]
    async fn store_replaces_record() {
        let ca = TestCa::new();
        let storage = Arc::new(InMemoryStorage::new());
        let store = StorageCertificateStore::new(storage.clone());
        assert_eq!(store.load(ip()).await.unwrap(), None);
        let first = ca.issue_record(ip());
        let second = ca.issue_record(ip());
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        assert_eq!(store.load(ip()).await.unwrap(), Some(second));
        storage.write("203.0.113.7.json", "not json").await.unwrap();
        assert_eq!(store.load(ip()).await.unwrap(), None);
    }

    #[test]
    fn issued_record_converts_to_tls_key() {
        let ca = TestCa::new();
        let record = ca.issue_record(ip());
        let certified_key = record.certified_key().unwrap();
        // Leaf and issuer.
        assert_eq!(certified_key.cert.len(), 2);
        let broken = CertificateRecord {
            private_key_pem: "garbage".to_string(),
            ..record
        };
        assert!(broken.certified_key().is_err());
    }

    #[test]
    fn resolver_reads_published_certificate() {
        let current = Arc::new(CurrentCertificate::new());
        assert!(current.current().is_none());
        let ca = TestCa::new();
        let active = Arc::new(ActiveCertificate::new(ca.issue_record(ip())).unwrap());
        current.publish(active.clone());
        let published = current.current().unwrap();
        assert!(Arc::ptr_eq(&published.certified_key, &active.certified_key));
    }

    #[test]
    fn readers_never_observe_absence_after_publish() {
        let ca = TestCa::new();
        let certificates: Vec<_> = (0..3)
            .map(|_| Arc::new(ActiveCertificate::new(ca.issue_record(ip())).unwrap()))
            .collect();
        let current = Arc::new(CurrentCertificate::new());
        current.publish(certificates[0].clone());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let current = current.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        assert!(current.current().is_some());
                    }
                })
            })
            .collect();
        for i in 0..1_000 {
            current.publish(certificates[i % certificates.len()].clone());
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    /// Hands out pre-made records and counts calls.
    struct ScriptedIssuer {
        records: Mutex<Vec<Result<CertificateRecord>>>,
        calls: AtomicUsize,
    }

    impl ScriptedIssuer {
        fn new(records: Vec<Result<CertificateRecord>>) -> Self {
            ScriptedIssuer {
                records: Mutex::new(records),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CertificateIssuer for ScriptedIssuer {
        async fn issue(&self, _ip: IpAddr) -> Result<CertificateRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.records.lock().unwrap().remove(0);
            next
        }
    }

    struct Fixture {
        issuer: Arc<ScriptedIssuer>,
        store: Arc<StorageCertificateStore>,
        current: Arc<CurrentCertificate>,
        manager: CertificateManager,
    }

    fn fixture(records: Vec<Result<CertificateRecord>>) -> Fixture {
        let issuer = Arc::new(ScriptedIssuer::new(records));
        let store = Arc::new(StorageCertificateStore::new(Arc::new(InMemoryStorage::new())));
        let current = Arc::new(CurrentCertificate::new());
        let manager = CertificateManager::new(
            Arc::new(FixedIpResolver::new(ip())),
            issuer.clone(),
            store.clone(),
            current.clone(),
        );
        Fixture {
            issuer,
            store,
            current,
            manager,
        }
    }

    #[tokio::test]
    async fn fresh_certificate_is_kept_without_issuing() {
        let ca = TestCa::new();
        let stored = ca.issue_record(ip());
        let f = fixture(vec![]);
        f.store.save(&stored).await.unwrap();
        let now = stored.not_before + HOUR;
        let active = f.manager.ensure_fresh_at(now).await.unwrap();
        assert_eq!(active.record, stored);
        assert_eq!(f.issuer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.current.current().unwrap().record, stored);
    }

    #[tokio::test]
    async fn missing_certificate_is_issued_stored_and_published() {
        let ca = TestCa::new();
        let issued = ca.issue_record(ip());
        let f = fixture(vec![Ok(issued.clone())]);
        let active = f.manager.ensure_fresh_at(issued.not_before).await.unwrap();
        assert_eq!(active.record, issued);
        assert_eq!(f.issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.load(ip()).await.unwrap(), Some(issued.clone()));
        assert_eq!(f.current.current().unwrap().record, issued);
    }

    #[tokio::test]
    async fn old_certificate_is_renewed() {
        let ca = TestCa::new();
        let stored = ca.issue_record(ip());
        let renewed = ca.issue_record(ip());
        let f = fixture(vec![Ok(renewed.clone())]);
        f.store.save(&stored).await.unwrap();
        let now = stored.not_before + 25 * HOUR;
        let active = f.manager.ensure_fresh_at(now).await.unwrap();
        assert_eq!(active.record, renewed);
        assert_eq!(f.store.load(ip()).await.unwrap(), Some(renewed));
    }

    #[tokio::test]
    async fn failed_renewal_keeps_published_certificate() {
        let ca = TestCa::new();
        let stored = ca.issue_record(ip());
        let f = fixture(vec![Err(anyhow!("CA unavailable"))]);
        f.store.save(&stored).await.unwrap();
        f.manager
            .ensure_fresh_at(stored.not_before + HOUR)
            .await
            .unwrap();
        let error = f
            .manager
            .ensure_fresh_at(stored.not_before + 25 * HOUR)
            .await
            .err()
            .expect("renewal should fail");
        assert!(format!("{:#}", error).contains("CA unavailable"));
        assert_eq!(f.current.current().unwrap().record, stored);
        assert_eq!(f.store.load(ip()).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn record_for_another_address_is_not_served() {
        let ca = TestCa::new();
        let misfiled = ca.issue_record("198.51.100.1".parse().unwrap());
        let issued = ca.issue_record(ip());
        let f = fixture(vec![Ok(issued.clone())]);
        // Stored under the current address but naming another one.
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .write("203.0.113.7.json", &serde_json::to_string(&misfiled).unwrap())
            .await
            .unwrap();
        let manager = CertificateManager::new(
            Arc::new(FixedIpResolver::new(ip())),
            f.issuer.clone(),
            Arc::new(StorageCertificateStore::new(storage)),
            f.current.clone(),
        );
        let active = manager
            .ensure_fresh_at(issued.not_before + HOUR)
            .await
            .unwrap();
        assert_eq!(active.record, issued);
        assert_eq!(f.issuer.calls.load(Ordering::SeqCst), 1);
    }
}
