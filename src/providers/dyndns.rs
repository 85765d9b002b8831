//! dyndns2-protocol providers: Hurricane Electric and Google Domains.
//!
//! Neither exposes the current record value, so lookups return a record
//! whose value is unknown and the update is always attempted.

use super::{DnsProvider, ProviderRecord};
use crate::config::{fqdn, Settings};
use crate::error::{DdnsError, Result};
use async_trait::async_trait;

/// Which dyndns2 service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynDnsFlavor {
    HurricaneElectric,
    Google,
}

impl DynDnsFlavor {
    fn name(self) -> &'static str {
        match self {
            DynDnsFlavor::HurricaneElectric => "he",
            DynDnsFlavor::Google => "google",
        }
    }

    fn default_url(self) -> &'static str {
        match self {
            DynDnsFlavor::HurricaneElectric => "https://dyn.dns.he.net/nic/update",
            DynDnsFlavor::Google => "https://domains.google.com/nic/update",
        }
    }
}

/// dyndns2 provider.
pub struct DynDnsProvider {
    client: reqwest::Client,
    flavor: DynDnsFlavor,
    username: String,
    password: String,
    update_url: String,
}

impl DynDnsProvider {
    pub fn new(client: reqwest::Client, flavor: DynDnsFlavor, settings: &Settings) -> Self {
        Self {
            client,
            flavor,
            username: settings.email.clone(),
            password: settings.password.clone(),
            update_url: settings.api_base(flavor.default_url()).to_string(),
        }
    }
}

#[async_trait]
impl DnsProvider for DynDnsProvider {
    fn name(&self) -> &'static str {
        self.flavor.name()
    }

    async fn find_record(
        &self,
        domain: &str,
        sub_domain: &str,
    ) -> Result<Option<ProviderRecord>> {
        Ok(Some(ProviderRecord::new(
            fqdn(domain, sub_domain),
            sub_domain,
            None,
        )))
    }

    async fn update_record(&self, _domain: &str, record: &ProviderRecord, ip: &str) -> Result<()> {
        let hostname = record.id.as_str();

        let request = match self.flavor {
            DynDnsFlavor::HurricaneElectric => self.client.post(&self.update_url).form(&[
                ("hostname", hostname),
                ("password", self.password.as_str()),
                ("myip", ip),
            ]),
            DynDnsFlavor::Google => self
                .client
                .post(&self.update_url)
                .basic_auth(&self.username, Some(&self.password))
                .form(&[("hostname", hostname), ("myip", ip)]),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = text.trim();

        if status.is_success() && (body.starts_with("good") || body.starts_with("nochg")) {
            tracing::info!(provider = self.name(), record = %hostname, "Record updated to {}", ip);
            Ok(())
        } else {
            Err(DdnsError::provider(
                self.name(),
                format!("{} returned HTTP {}: {}", hostname, status, body),
            ))
        }
    }
}
