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

mod hyper_fetcher;
mod routes;
mod tls;

use anyhow::{Error, Result};
use clap::Parser;
use hyper_fetcher::HyperFetcher;
use ipcert::acme::account::{AccountManager, StorageAccountStore};
use ipcert::acme::challenge::ChallengeResponder;
use ipcert::acme::directory::CachedDirectory;
use ipcert::acme::order::OrderOptions;
use ipcert::acme::AcmeIssuer;
use ipcert::certificate::{
    CertificateManager, CertificateResolver, CurrentCertificate, StorageCertificateStore,
};
use ipcert::config::{AcmeConfig, LETS_ENCRYPT_STAGING_DIRECTORY};
use ipcert::fetcher::Fetcher;
use ipcert::ip::{CheckIpResolver, FixedIpResolver, PublicIpResolver};
use ipcert::scheduler::RenewalScheduler;
use ipcert::storage::FileStorage;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Obtains and renews a short-lived certificate for this host's public IP
/// address, answering HTTP-01 challenges and serving TLS with it.
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    /// A YAML file overriding the ACME defaults.
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Where the account key and issued certificates are kept.
    #[clap(short, long, default_value = "/var/lib/ipcert")]
    data_dir: PathBuf,
    #[clap(long, default_value = "0.0.0.0:80")]
    http_bind_addr: SocketAddr,
    #[clap(long, default_value = "0.0.0.0:443")]
    https_bind_addr: SocketAddr,
    /// Skip detection and certify this address.
    #[clap(long)]
    public_ip: Option<IpAddr>,
    /// Use the Let's Encrypt staging directory.
    #[clap(long)]
    staging: bool,
}

fn load_config(args: &Args) -> Result<AcmeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let yaml = std::fs::read_to_string(path).map_err(|e| {
                Error::new(e).context(format!("Failed to read {}", path.display()))
            })?;
            AcmeConfig::from_yaml(&yaml)?
        }
        None => AcmeConfig::default(),
    };
    if args.staging {
        config.directory_url = LETS_ENCRYPT_STAGING_DIRECTORY.to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let config = load_config(&args)?;
    tracing::info!(directory = %config.directory_url, "Loaded ACME configuration");

    let fetcher: Arc<dyn Fetcher> = Arc::new(HyperFetcher::new(FETCH_TIMEOUT));
    let ip_resolver: Arc<dyn PublicIpResolver> = match args.public_ip {
        Some(ip) => Arc::new(FixedIpResolver::new(ip)),
        None => Arc::new(CheckIpResolver::new(
            config.check_ip_url.clone(),
            fetcher.clone(),
        )),
    };
    let challenges = Arc::new(ChallengeResponder::new());
    let current = Arc::new(CurrentCertificate::new());

    let accounts = AccountManager::new(
        Arc::new(StorageAccountStore::new(Arc::new(FileStorage::new(
            args.data_dir.join("acme"),
        )))),
        config.contact.clone(),
    );
    let issuer = AcmeIssuer::new(
        Arc::new(CachedDirectory::new(&config.directory_url, fetcher.clone())),
        accounts,
        challenges.clone(),
        fetcher,
        OrderOptions::from(&config),
    );
    let manager = Arc::new(CertificateManager::new(
        ip_resolver.clone(),
        Arc::new(issuer),
        Arc::new(StorageCertificateStore::new(Arc::new(FileStorage::new(
            args.data_dir.join("certs"),
        )))),
        current.clone(),
    ));

    let shutdown = CancellationToken::new();

    // Challenges must be reachable before the first order is placed.
    let http_shutdown = shutdown.clone();
    let (http_addr, http_server) = warp::serve(routes::routes(challenges, ip_resolver))
        .try_bind_with_graceful_shutdown(args.http_bind_addr, async move {
            http_shutdown.cancelled().await
        })
        .map_err(|e| Error::new(e).context(format!("Failed to bind {}", args.http_bind_addr)))?;
    tracing::info!(%http_addr, "Serving HTTP-01 challenges");
    let http_task = tokio::spawn(http_server);

    let listener = TcpListener::bind(args.https_bind_addr)
        .await
        .map_err(|e| Error::new(e).context(format!("Failed to bind {}", args.https_bind_addr)))?;
    tracing::info!(https_addr = %args.https_bind_addr, "Serving TLS");
    let tls_task = tokio::spawn(tls::serve(
        listener,
        Arc::new(CertificateResolver::new(current)),
        shutdown.clone(),
    ));

    let scheduler_task =
        tokio::spawn(RenewalScheduler::new(manager, &config).run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::new(e).context("Failed to listen for Ctrl-C"))?;
    tracing::info!("Shutting down");
    shutdown.cancel();
    let (http_result, tls_result, scheduler_result) =
        tokio::join!(http_task, tls_task, scheduler_task);
    http_result?;
    tls_result??;
    scheduler_result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcert::config::LETS_ENCRYPT_PRODUCTION_DIRECTORY;
    use std::io::Write;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["http_server"]);
        assert_eq!(args.data_dir, PathBuf::from("/var/lib/ipcert"));
        assert_eq!(args.http_bind_addr, "0.0.0.0:80".parse().unwrap());
        assert_eq!(args.https_bind_addr, "0.0.0.0:443".parse().unwrap());
        assert_eq!(args.public_ip, None);
        let config = load_config(&args).unwrap();
        assert_eq!(config.directory_url, LETS_ENCRYPT_PRODUCTION_DIRECTORY);
    }
    #[test]
    fn staging_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "directory_url: https://acme.test/directory").unwrap();
        writeln!(file, "poll_interval: 5").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from(["http_server", "--config", &path]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.directory_url, "https://acme.test/directory");
        assert_eq!(config.poll_interval, Duration::from_secs(5));

        let args = Args::parse_from(["http_server", "--config", &path, "--staging"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.directory_url, LETS_ENCRYPT_STAGING_DIRECTORY);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }
    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::parse_from(["http_server", "-c", "/nonexistent/ipcert.yaml"]);
        assert!(load_config(&args).is_err());
    }
    #[test]
    fn fixed_public_ip() {
        let args = Args::parse_from(["http_server", "--public-ip", "2001:db8::1"]);
        assert_eq!(args.public_ip, Some("2001:db8::1".parse().unwrap()));
    }
}
