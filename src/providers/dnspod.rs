//! DNSPod provider.

use super::{DnsProvider, ProviderRecord};
use crate::config::Settings;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

const DEFAULT_BASE_URL: &str = "https://dnsapi.cn";
const PROVIDER: &str = "dnspod";
const DEFAULT_LINE: &str = "默认";

/// DNSPod provider.
pub struct DnsPodProvider {
    client: reqwest::Client,
    login_token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusOnly {
    status: Status,
}

#[derive(Debug, Deserialize)]
struct DomainList {
    #[serde(default)]
    domains: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
struct Domain {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    name: String,
    value: String,
    #[serde(default)]
    line: Option<String>,
    #[serde(default)]
    line_id: Option<String>,
}

/// DNSPod returns IDs as numbers in some endpoints and strings in others.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

impl DnsPodProvider {
    /// Create a new DNSPod provider. `login_token` is preferred; `password` is accepted as the token.
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        let login_token = if settings.login_token.is_empty() {
            settings.password.clone()
        } else {
            settings.login_token.clone()
        };

        Self {
            client,
            login_token,
            base_url: settings.api_base(DEFAULT_BASE_URL).to_string(),
        }
    }

    /// POST a form to a DNSPod action and decode the body once the status code is "1".
    async fn post<T: DeserializeOwned>(&self, action: &str, params: &[(&str, &str)]) -> Result<T> {
        let mut form: Vec<(&str, &str)> = vec![
            ("login_token", self.login_token.as_str()),
            ("format", "json"),
            ("lang", "en"),
            ("error_on_empty", "no"),
        ];
        form.extend_from_slice(params);

        let text = self
            .client
            .post(format!("{}/{}", self.base_url, action))
            .form(&form)
            .send()
            .await?
            .text()
            .await?;

        let status: StatusOnly = serde_json::from_str(&text).map_err(|e| {
            tracing::debug!(provider = PROVIDER, "Undecodable response: {}", text);
            DdnsError::provider(PROVIDER, format!("{}: {}", action, e))
        })?;

        if status.status.code != "1" {
            return Err(DdnsError::provider(
                PROVIDER,
                format!(
                    "{} failed with code {}: {}",
                    action, status.status.code, status.status.message
                ),
            ));
        }

        serde_json::from_str(&text)
            .map_err(|e| DdnsError::provider(PROVIDER, format!("{}: {}", action, e)))
    }

    async fn domain_id(&self, domain: &str) -> Result<String> {
        let list: DomainList = self
            .post(
                "Domain.List",
                &[("type", "all"), ("offset", "0"), ("length", "20")],
            )
            .await?;

        if list.domains.is_empty() {
            tracing::warn!(provider = PROVIDER, "Domain list is empty");
        }

        list.domains
            .into_iter()
            .find(|d| d.name == domain)
            .map(|d| d.id)
            .ok_or_else(|| DdnsError::RecordNotFound {
                provider: PROVIDER.to_string(),
                record: domain.to_string(),
            })
    }
}

#[async_trait]
impl DnsProvider for DnsPodProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_record(
        &self,
        domain: &str,
        sub_domain: &str,
    ) -> Result<Option<ProviderRecord>> {
        let domain_id = self.domain_id(domain).await?;

        let list: RecordList = self
            .post(
                "Record.List",
                &[
                    ("domain_id", domain_id.as_str()),
                    ("sub_domain", sub_domain),
                    ("record_type", "A"),
                    ("offset", "0"),
                    ("length", "1"),
                ],
            )
            .await?;

        Ok(list
            .records
            .into_iter()
            .find(|r| r.name == sub_domain)
            .map(|r| {
                let mut record = ProviderRecord::new(r.id, r.name, Some(r.value))
                    .with_meta("domain_id", domain_id);
                if let Some(line) = r.line {
                    record = record.with_meta("line", line);
                }
                if let Some(line_id) = r.line_id {
                    record = record.with_meta("line_id", line_id);
                }
                record
            }))
    }

    async fn update_record(&self, domain: &str, record: &ProviderRecord, ip: &str) -> Result<()> {
        let domain_id = match record.meta("domain_id") {
            Some(id) => id.to_string(),
            None => self.domain_id(domain).await?,
        };

        let mut params = vec![
            ("domain_id", domain_id.as_str()),
            ("record_id", record.id.as_str()),
            ("sub_domain", record.name.as_str()),
            ("record_type", "A"),
            ("value", ip),
        ];
        match record.meta("line_id") {
            Some(line_id) => params.push(("record_line_id", line_id)),
            None => params.push(("record_line", record.meta("line").unwrap_or(DEFAULT_LINE))),
        }

        let _: StatusOnly = self.post("Record.Modify", &params).await?;

        tracing::info!(provider = PROVIDER, record = %record.name, domain, "Record updated to {}", ip);
        Ok(())
    }
}
