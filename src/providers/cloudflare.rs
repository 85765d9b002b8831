//! Cloudflare provider.

use super::{DnsProvider, ProviderRecord};
use crate::config::{fqdn, Settings};
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
const PROVIDER: &str = "cloudflare";

/// Cloudflare provider.
pub struct CloudflareProvider {
    client: reqwest::Client,
    auth: Auth,
    base_url: String,
}

enum Auth {
    Key { email: String, key: String },
    Token(String),
}

#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CloudflareError>,
}

#[derive(Debug, Deserialize)]
struct CloudflareError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    name: String,
    content: String,
    #[serde(default)]
    proxied: bool,
    #[serde(default)]
    ttl: Option<u32>,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    proxied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u32>,
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider. A `login_token` takes precedence over email/key auth.
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        let auth = if settings.login_token.is_empty() {
            Auth::Key {
                email: settings.email.clone(),
                key: settings.password.clone(),
            }
        } else {
            Auth::Token(settings.login_token.clone())
        };

        Self {
            client,
            auth,
            base_url: settings.api_base(DEFAULT_BASE_URL).to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));

        match &self.auth {
            Auth::Key { email, key } => builder
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", key),
            Auth::Token(token) => builder.bearer_auth(token),
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        let response: CloudflareResponse<T> = builder.send().await?.json().await?;

        if !response.success {
            let msg = response
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(DdnsError::provider(PROVIDER, msg));
        }

        response
            .result
            .ok_or_else(|| DdnsError::provider(PROVIDER, "response has no result"))
    }

    /// Find the zone ID for a domain.
    async fn zone_id(&self, domain: &str) -> Result<String> {
        let zones: Vec<Zone> = self
            .send(
                self.request(reqwest::Method::GET, "/zones")
                    .query(&[("name", domain)]),
            )
            .await?;

        zones
            .into_iter()
            .find(|z| z.name == domain)
            .map(|z| z.id)
            .ok_or_else(|| DdnsError::RecordNotFound {
                provider: PROVIDER.to_string(),
                record: format!("zone {}", domain),
            })
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_record(
        &self,
        domain: &str,
        sub_domain: &str,
    ) -> Result<Option<ProviderRecord>> {
        let zone_id = self.zone_id(domain).await?;
        let name = fqdn(domain, sub_domain);

        let records: Vec<DnsRecord> = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/zones/{}/dns_records", zone_id),
                )
                .query(&[("type", "A"), ("name", name.as_str())]),
            )
            .await?;

        Ok(records.into_iter().find(|r| r.name == name).map(|r| {
            let mut record = ProviderRecord::new(r.id, sub_domain, Some(r.content))
                .with_meta("zone_id", zone_id)
                .with_meta("fqdn", r.name)
                .with_meta("proxied", r.proxied.to_string());
            if let Some(ttl) = r.ttl {
                record = record.with_meta("ttl", ttl.to_string());
            }
            record
        }))
    }

    async fn update_record(&self, domain: &str, record: &ProviderRecord, ip: &str) -> Result<()> {
        let zone_id = match record.meta("zone_id") {
            Some(id) => id.to_string(),
            None => self.zone_id(domain).await?,
        };
        let name = record
            .meta("fqdn")
            .map(str::to_string)
            .unwrap_or_else(|| fqdn(domain, &record.name));

        let request = UpdateRequest {
            record_type: "A",
            name: &name,
            content: ip,
            proxied: record.meta("proxied") == Some("true"),
            ttl: record.meta("ttl").and_then(|t| t.parse().ok()),
        };

        let updated: DnsRecord = self
            .send(
                self.request(
                    reqwest::Method::PUT,
                    &format!("/zones/{}/dns_records/{}", zone_id, record.id),
                )
                .json(&request),
            )
            .await?;

        tracing::info!(provider = PROVIDER, record = %updated.name, "Record updated to {}", updated.content);
        Ok(())
    }
}
