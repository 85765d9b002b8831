//! AliDNS (Alibaba Cloud DNS) provider.

use super::{DnsProvider, ProviderRecord};
use crate::config::Settings;
use crate::error::{DdnsError, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};

const DEFAULT_BASE_URL: &str = "https://alidns.aliyuncs.com";
const API_VERSION: &str = "2015-01-09";
const SIGNED_HEADERS: &str =
    "host;x-acs-action;x-acs-content-sha256;x-acs-date;x-acs-signature-nonce;x-acs-version";
const PROVIDER: &str = "alidns";

type HmacSha256 = Hmac<Sha256>;

/// AliDNS provider. `email` holds the AccessKey ID and `password` the secret.
pub struct AliDnsProvider {
    client: reqwest::Client,
    access_key_id: String,
    access_key_secret: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeDomainRecordsResponse {
    #[serde(rename = "DomainRecords")]
    domain_records: Option<DomainRecords>,
}

#[derive(Debug, Deserialize)]
struct DomainRecords {
    #[serde(rename = "Record", default)]
    record: Vec<AliRecord>,
}

#[derive(Debug, Deserialize)]
struct AliRecord {
    #[serde(rename = "RecordId")]
    record_id: String,
    #[serde(rename = "RR")]
    rr: String,
    #[serde(rename = "Value")]
    value: String,
    #[serde(rename = "TTL")]
    ttl: Option<u32>,
    #[serde(rename = "Line")]
    line: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateDomainRecordResponse {
    #[serde(rename = "RecordId")]
    record_id: String,
}

impl AliDnsProvider {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            access_key_id: settings.email.clone(),
            access_key_secret: settings.password.clone(),
            base_url: settings.api_base(DEFAULT_BASE_URL).to_string(),
        }
    }

    fn host(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| DdnsError::Config(format!("invalid AliDNS api {}: {}", self.base_url, e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| DdnsError::Config(format!("AliDNS api {} has no host", self.base_url)))?;

        Ok(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Build the ACS3-HMAC-SHA256 `Authorization` header for a body-less POST.
    fn sign(&self, host: &str, action: &str, query: &str, timestamp: &str, nonce: &str) -> String {
        let hashed_payload = hex::encode(Sha256::digest(b""));

        let canonical_headers = format!(
            "host:{}\nx-acs-action:{}\nx-acs-content-sha256:{}\nx-acs-date:{}\nx-acs-signature-nonce:{}\nx-acs-version:{}\n",
            host, action, hashed_payload, timestamp, nonce, API_VERSION
        );

        let canonical_request = format!(
            "POST\n/\n{}\n{}\n{}\n{}",
            query, canonical_headers, SIGNED_HEADERS, hashed_payload
        );

        let string_to_sign = format!(
            "ACS3-HMAC-SHA256\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = hex::encode(hmac_sha256(
            self.access_key_secret.as_bytes(),
            string_to_sign.as_bytes(),
        ));

        format!(
            "ACS3-HMAC-SHA256 Credential={},SignedHeaders={},Signature={}",
            self.access_key_id, SIGNED_HEADERS, signature
        )
    }

    async fn request<T: DeserializeOwned>(&self, action: &str, params: &[(&str, &str)]) -> Result<T> {
        let host = self.host()?;
        let query = canonical_query(params);
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let authorization = self.sign(&host, action, &query, &timestamp, &nonce);

        let url = format!("{}/?{}", self.base_url, query);
        tracing::debug!(provider = PROVIDER, "POST {} Action: {}", self.base_url, action);

        let text = self
            .client
            .post(&url)
            .header("Host", &host)
            .header("x-acs-action", action)
            .header("x-acs-version", API_VERSION)
            .header("x-acs-date", &timestamp)
            .header("x-acs-signature-nonce", &nonce)
            .header("x-acs-content-sha256", hex::encode(Sha256::digest(b"")))
            .header("Authorization", authorization)
            .send()
            .await?
            .text()
            .await?;

        if let Ok(ErrorResponse {
            code: Some(code),
            message,
        }) = serde_json::from_str::<ErrorResponse>(&text)
        {
            return Err(DdnsError::provider(
                PROVIDER,
                format!("{}: {} {}", action, code, message.unwrap_or_default()),
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::debug!(provider = PROVIDER, "Undecodable response: {}", text);
            DdnsError::provider(PROVIDER, format!("{}: {}", action, e))
        })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 encoded, key-sorted query string as required by the signature.
fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    pairs.sort();

    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl DnsProvider for AliDnsProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_record(
        &self,
        domain: &str,
        sub_domain: &str,
    ) -> Result<Option<ProviderRecord>> {
        let response: DescribeDomainRecordsResponse = self
            .request(
                "DescribeDomainRecords",
                &[
                    ("DomainName", domain),
                    ("RRKeyWord", sub_domain),
                    ("Type", "A"),
                ],
            )
            .await?;

        let records = response
            .domain_records
            .map(|r| r.record)
            .unwrap_or_default();

        Ok(records.into_iter().find(|r| r.rr == sub_domain).map(|r| {
            let mut record = ProviderRecord::new(r.record_id, r.rr, Some(r.value));
            if let Some(ttl) = r.ttl {
                record = record.with_meta("ttl", ttl.to_string());
            }
            if let Some(line) = r.line {
                record = record.with_meta("line", line);
            }
            record
        }))
    }

    async fn update_record(&self, domain: &str, record: &ProviderRecord, ip: &str) -> Result<()> {
        let mut params = vec![
            ("RecordId", record.id.as_str()),
            ("RR", record.name.as_str()),
            ("Type", "A"),
            ("Value", ip),
        ];
        if let Some(ttl) = record.meta("ttl") {
            params.push(("TTL", ttl));
        }
        if let Some(line) = record.meta("line") {
            params.push(("Line", line));
        }

        let response: UpdateDomainRecordResponse =
            self.request("UpdateDomainRecord", &params).await?;

        tracing::info!(
            provider = PROVIDER,
            record = %crate::config::fqdn(domain, &record.name),
            record_id = %response.record_id,
            "Record updated to {}",
            ip
        );
        Ok(())
    }
}
