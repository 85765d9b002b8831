//! Configuration management for ddns-warden.

use crate::error::{DdnsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interval used when `interval` is zero or absent.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Supported DNS providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "DNSPod")]
    DnsPod,
    #[serde(rename = "HE")]
    He,
    #[serde(rename = "Cloudflare")]
    Cloudflare,
    #[serde(rename = "AliDNS")]
    AliDns,
    #[serde(rename = "Google")]
    Google,
    #[serde(rename = "DuckDNS")]
    DuckDns,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::DnsPod => "DNSPod",
            ProviderKind::He => "HE",
            ProviderKind::Cloudflare => "Cloudflare",
            ProviderKind::AliDns => "AliDNS",
            ProviderKind::Google => "Google",
            ProviderKind::DuckDns => "DuckDNS",
        };
        f.write_str(name)
    }
}

/// A domain and the subdomains kept in sync under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub domain_name: String,
    #[serde(default)]
    pub sub_domains: Vec<String>,
}

impl DomainConfig {
    pub fn new(domain_name: impl Into<String>, sub_domains: &[&str]) -> Self {
        Self {
            domain_name: domain_name.into(),
            sub_domains: sub_domains.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Fully qualified name of a subdomain (`@` and `""` mean the apex).
    pub fn fqdn(&self, sub_domain: &str) -> String {
        fqdn(&self.domain_name, sub_domain)
    }
}

/// Join a subdomain label onto its domain.
pub fn fqdn(domain: &str, sub_domain: &str) -> String {
    if sub_domain.is_empty() || sub_domain == "@" {
        domain.to_string()
    } else {
        format!("{}.{}", sub_domain, domain)
    }
}

/// SMTP notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default)]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub send_to: String,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub provider: ProviderKind,

    /// Account email, Cloudflare auth email, or AliDNS AccessKey ID.
    #[serde(default)]
    pub email: String,

    /// Password, API key, or AliDNS AccessKey secret (`$VAR` reads the environment).
    #[serde(default)]
    pub password: String,

    /// API token (`$VAR` reads the environment).
    #[serde(default)]
    pub login_token: String,

    #[serde(default)]
    pub domains: Vec<DomainConfig>,

    /// Online service echoing the caller's IP.
    #[serde(default)]
    pub ip_url: Option<String>,

    /// Network interface to read the address from when `ip_url` fails.
    #[serde(default)]
    pub ip_interface: Option<String>,

    /// Check interval in seconds (0 = default of 300).
    #[serde(default)]
    pub interval: u64,

    #[serde(default)]
    pub user_agent: Option<String>,

    /// SOCKS5 proxy address, e.g. `127.0.0.1:1080`.
    #[serde(default)]
    pub socks5_proxy: Option<String>,

    /// Append logs to this file instead of stderr.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Override the provider's API base URL.
    #[serde(default)]
    pub api: Option<String>,

    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Settings {
    /// Minimal settings for a provider, mostly useful for tests.
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            email: String::new(),
            password: String::new(),
            login_token: String::new(),
            domains: Vec::new(),
            ip_url: None,
            ip_interface: None,
            interval: 0,
            user_agent: None,
            socks5_proxy: None,
            log_path: None,
            api: None,
            notify: NotifyConfig::default(),
        }
    }

    /// Candidate config file locations, most specific first.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("ddns-warden").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/ddns-warden/config.toml"));
        paths.push(PathBuf::from("config.toml"));
        paths.push(PathBuf::from("config.json"));
        paths
    }

    /// Load settings from a file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DdnsError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut settings: Settings = if is_json {
            serde_json::from_str(&content)
                .map_err(|e| DdnsError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            toml::from_str(&content)?
        };

        settings.resolve_secrets();
        Ok(settings)
    }

    /// Effective polling interval.
    pub fn interval(&self) -> Duration {
        if self.interval == 0 {
            Duration::from_secs(DEFAULT_INTERVAL_SECS)
        } else {
            Duration::from_secs(self.interval)
        }
    }

    /// Base URL for the provider API, honouring the `api` override.
    pub fn api_base<'a>(&'a self, default: &'a str) -> &'a str {
        match self.api.as_deref() {
            Some(api) if !api.is_empty() => api.trim_end_matches('/'),
            _ => default,
        }
    }

    fn resolve_secrets(&mut self) {
        self.email = resolve_env(&self.email);
        self.password = resolve_env(&self.password);
        self.login_token = resolve_env(&self.login_token);
        self.notify.smtp_password = resolve_env(&self.notify.smtp_password);
    }

    /// Validate provider credentials and the rest of the settings.
    pub fn check(&self) -> Result<()> {
        let missing = |field: &str| {
            Err(DdnsError::Config(format!(
                "{} cannot be empty for provider {}",
                field, self.provider
            )))
        };

        match self.provider {
            ProviderKind::DnsPod => {
                if self.password.is_empty() && self.login_token.is_empty() {
                    return missing("password or login_token");
                }
            }
            ProviderKind::He => {
                if self.password.is_empty() {
                    return missing("password");
                }
            }
            ProviderKind::Cloudflare => {
                if self.login_token.is_empty() {
                    if self.email.is_empty() {
                        return missing("email");
                    }
                    if self.password.is_empty() {
                        return missing("password");
                    }
                }
            }
            ProviderKind::AliDns | ProviderKind::Google => {
                if self.email.is_empty() {
                    return missing("email");
                }
                if self.password.is_empty() {
                    return missing("password");
                }
            }
            ProviderKind::DuckDns => {
                if self.login_token.is_empty() {
                    return missing("login_token");
                }
            }
        }

        if self.domains.is_empty() {
            return Err(DdnsError::Config("no domains configured".to_string()));
        }
        if let Some(domain) = self.domains.iter().find(|d| d.domain_name.is_empty()) {
            return Err(DdnsError::Config(format!(
                "domain with sub_domains {:?} has an empty domain_name",
                domain.sub_domains
            )));
        }

        let has_url = self.ip_url.as_deref().is_some_and(|u| !u.is_empty());
        let has_iface = self.ip_interface.as_deref().is_some_and(|i| !i.is_empty());
        if !has_url && !has_iface {
            return Err(DdnsError::Config(
                "either ip_url or ip_interface must be set".to_string(),
            ));
        }

        if self.notify.enabled {
            let n = &self.notify;
            if n.smtp_server.is_empty() || n.smtp_port == 0 {
                return Err(DdnsError::Config(
                    "notify requires smtp_server and smtp_port".to_string(),
                ));
            }
            if n.smtp_username.is_empty() || n.send_to.is_empty() {
                return Err(DdnsError::Config(
                    "notify requires smtp_username and send_to".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Resolve environment variable references (values starting with $).
pub(crate) fn resolve_env(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!("Environment variable {} not set", var_name);
            value.to_string()
        })
    } else {
        value.to_string()
    }
}
