//! DNS provider implementations.

mod alidns;
mod cloudflare;
mod dnspod;
mod duckdns;
mod dyndns;


pub use alidns::AliDnsProvider;
pub use cloudflare::CloudflareProvider;
pub use dnspod::DnsPodProvider;
pub use duckdns::DuckDnsProvider;
pub use dyndns::{DynDnsFlavor, DynDnsProvider};

use crate::change::has_changed;
use crate::config::{fqdn, DomainConfig, ProviderKind, Settings};
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// A DNS record as reported by a provider. Fetched fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    /// Provider record ID (or the FQDN for update-only providers).
    pub id: String,
    /// Subdomain label.
    pub name: String,
    /// Current record value; `None` when the provider cannot report it.
    pub value: Option<String>,
    /// Provider-specific fields needed to write the record back.
    pub metadata: BTreeMap<String, String>,
}

impl ProviderRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// What happened to one subdomain during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The record was rewritten to the new IP.
    Updated { previous: Option<String> },
    /// The record already holds the IP.
    Unchanged,
    /// No matching record exists at the provider yet.
    NotFound,
}

/// Per-subdomain result of [`DnsProvider::reconcile`].
#[derive(Debug)]
pub struct SubdomainReport {
    pub sub_domain: String,
    pub result: Result<SyncOutcome>,
}

/// Trait for DNS providers.
///
/// Implementations only know how to find and rewrite a single A record; the
/// lookup-then-update policy lives in the provided methods.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &'static str;

    /// Locate the A record for `sub_domain` under `domain`. When several
    /// records match, the first one in the provider's order wins.
    async fn find_record(&self, domain: &str, sub_domain: &str)
        -> Result<Option<ProviderRecord>>;

    /// Point `record` at `ip`.
    async fn update_record(&self, domain: &str, record: &ProviderRecord, ip: &str) -> Result<()>;

    /// Look up one subdomain and update it if its value differs from `ip`.
    async fn sync_subdomain(&self, domain: &str, sub_domain: &str, ip: &str) -> Result<SyncOutcome> {
        let Some(record) = self.find_record(domain, sub_domain).await? else {
            return Ok(SyncOutcome::NotFound);
        };

        if !has_changed(record.value.as_deref(), ip) {
            return Ok(SyncOutcome::Unchanged);
        }

        tracing::debug!(
            provider = self.name(),
            record = %fqdn(domain, sub_domain),
            "IP mismatch: {:?} -> {}",
            record.value,
            ip
        );
        self.update_record(domain, &record, ip).await?;
        Ok(SyncOutcome::Updated {
            previous: record.value,
        })
    }

    /// Sync every subdomain of `domain`. A failing subdomain is logged and
    /// does not stop its siblings.
    async fn reconcile(&self, domain: &DomainConfig, ip: &str) -> Vec<SubdomainReport> {
        let mut reports = Vec::with_capacity(domain.sub_domains.len());

        for sub_domain in &domain.sub_domains {
            let result = self
                .sync_subdomain(&domain.domain_name, sub_domain, ip)
                .await;

            match &result {
                Ok(SyncOutcome::NotFound) => tracing::warn!(
                    provider = self.name(),
                    record = %domain.fqdn(sub_domain),
                    "Record not configured yet, skipping"
                ),
                Err(e) => tracing::error!(
                    provider = self.name(),
                    record = %domain.fqdn(sub_domain),
                    "Failed to sync record: {}",
                    e
                ),
                Ok(_) => {}
            }

            reports.push(SubdomainReport {
                sub_domain: sub_domain.clone(),
                result,
            });
        }

        reports
    }
}

/// Create a provider from configuration.
pub fn create_provider(settings: &Settings) -> Result<Box<dyn DnsProvider>> {
    let client = http_client(settings)?;

    let provider: Box<dyn DnsProvider> = match settings.provider {
        ProviderKind::DnsPod => Box::new(DnsPodProvider::new(client, settings)),
        ProviderKind::Cloudflare => Box::new(CloudflareProvider::new(client, settings)),
        ProviderKind::AliDns => Box::new(AliDnsProvider::new(client, settings)),
        ProviderKind::He => Box::new(DynDnsProvider::new(
            client,
            DynDnsFlavor::HurricaneElectric,
            settings,
        )),
        ProviderKind::Google => {
            Box::new(DynDnsProvider::new(client, DynDnsFlavor::Google, settings))
        }
        ProviderKind::DuckDns => Box::new(DuckDnsProvider::new(client, settings)),
    };

    Ok(provider)
}

/// Build a fresh HTTP client honouring the proxy and user agent settings.
pub fn http_client(settings: &Settings) -> Result<reqwest::Client> {
    let user_agent = settings
        .user_agent
        .clone()
        .filter(|ua| !ua.is_empty())
        .unwrap_or_else(|| format!("ddns-warden/{}", env!("CARGO_PKG_VERSION")));

    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(user_agent);

    if let Some(proxy) = settings.socks5_proxy.as_deref().filter(|p| !p.is_empty()) {
        let url = if proxy.contains("://") {
            proxy.to_string()
        } else {
            format!("socks5://{}", proxy)
        };
        tracing::debug!("Using SOCKS5 proxy {}", url);
        let proxy = reqwest::Proxy::all(&url)
            .map_err(|e| DdnsError::Config(format!("invalid socks5_proxy {}: {}", url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}
