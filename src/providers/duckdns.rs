//! DuckDNS provider.

use super::{DnsProvider, ProviderRecord};
use crate::config::Settings;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://www.duckdns.org";
const PROVIDER: &str = "duckdns";

/// DuckDNS provider. Subdomains are the DuckDNS names (`myhost` for `myhost.duckdns.org`).
pub struct DuckDnsProvider {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl DuckDnsProvider {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            token: settings.login_token.clone(),
            base_url: settings.api_base(DEFAULT_BASE_URL).to_string(),
        }
    }
}

#[async_trait]
impl DnsProvider for DuckDnsProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_record(
        &self,
        _domain: &str,
        sub_domain: &str,
    ) -> Result<Option<ProviderRecord>> {
        // DuckDNS doesn't provide a way to query the current IP
        Ok(Some(ProviderRecord::new(sub_domain, sub_domain, None)))
    }

    async fn update_record(&self, _domain: &str, record: &ProviderRecord, ip: &str) -> Result<()> {
        let text = self
            .client
            .get(format!("{}/update", self.base_url))
            .query(&[
                ("domains", record.name.as_str()),
                ("token", self.token.as_str()),
                ("ip", ip),
            ])
            .send()
            .await?
            .text()
            .await?;

        if text.trim() == "OK" {
            tracing::info!(provider = PROVIDER, record = %record.name, "Record updated to {}", ip);
            Ok(())
        } else {
            Err(DdnsError::provider(
                PROVIDER,
                format!("DuckDNS returned: {}", text.trim()),
            ))
        }
    }
}
