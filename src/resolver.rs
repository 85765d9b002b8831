//! Current IP resolution: an online echo service first, then a local interface.

use crate::config::Settings;
use crate::error::{DdnsError, Result};
use crate::providers::http_client;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};

/// Something that can tell us the machine's current IPv4 address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResolveIp: Send + Sync {
    /// Resolve the current address in string form.
    async fn current_ip(&self) -> Result<String>;
}

/// Enumerates the addresses bound to a network interface.
#[cfg_attr(test, mockall::automock)]
pub trait InterfaceAddrs: Send + Sync {
    /// Addresses of `interface`, in the order the OS reports them.
    fn addresses(&self, interface: &str) -> Result<Vec<IpAddr>>;
}

/// Reads interface addresses from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceAddrs for SystemInterfaces {
    fn addresses(&self, interface: &str) -> Result<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = if_addrs::get_if_addrs()?
            .into_iter()
            .filter(|iface| iface.name == interface)
            .map(|iface| iface.ip())
            .collect();

        if addrs.is_empty() {
            return Err(DdnsError::NoAddressAvailable(format!(
                "can't get network device {}",
                interface
            )));
        }
        Ok(addrs)
    }
}

/// Pick the first address usable for an A record.
///
/// Unspecified, loopback, multicast, link-local and broadcast addresses are
/// skipped, as is anything IPv6. OS order decides among the rest.
pub fn select_interface_ip(addrs: &[IpAddr]) -> Option<Ipv4Addr> {
    addrs.iter().find_map(|addr| match addr {
        IpAddr::V4(v4)
            if !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_multicast()
                || v4.is_link_local()
                || v4.is_broadcast()) =>
        {
            Some(*v4)
        }
        _ => None,
    })
}

/// Resolves the IP from `ip_url`, falling back to `ip_interface`.
pub struct IpResolver {
    client: reqwest::Client,
    ip_url: Option<String>,
    interface: Option<String>,
    interfaces: Box<dyn InterfaceAddrs>,
}

impl IpResolver {
    /// Create a resolver from settings, reading interfaces from the OS.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            http_client(settings)?,
            settings.ip_url.clone(),
            settings.ip_interface.clone(),
            Box::new(SystemInterfaces),
        ))
    }

    pub fn new(
        client: reqwest::Client,
        ip_url: Option<String>,
        interface: Option<String>,
        interfaces: Box<dyn InterfaceAddrs>,
    ) -> Self {
        Self {
            client,
            ip_url: ip_url.filter(|u| !u.is_empty()),
            interface: interface.filter(|i| !i.is_empty()),
            interfaces,
        }
    }

    /// Ask the echo service for our public address.
    async fn ip_online(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DdnsError::Network(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let text = response.text().await?;
        let ip_str = text.trim();

        ip_str
            .parse::<Ipv4Addr>()
            .map(|ip| ip.to_string())
            .map_err(|_| DdnsError::Network(format!("Invalid IPv4 response from {}: {}", url, ip_str)))
    }

    fn ip_from_interface(&self, interface: &str) -> Result<String> {
        let addrs = self.interfaces.addresses(interface)?;

        select_interface_ip(&addrs)
            .map(|ip| ip.to_string())
            .ok_or_else(|| {
                DdnsError::NoAddressAvailable(format!(
                    "can't get a valid address from {}",
                    interface
                ))
            })
    }
}

#[async_trait]
impl ResolveIp for IpResolver {
    async fn current_ip(&self) -> Result<String> {
        let mut failures = Vec::new();

        if let Some(url) = &self.ip_url {
            match self.ip_online(url).await {
                Ok(ip) => {
                    tracing::debug!("Resolved IP {} from {}", ip, url);
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!("Getting IP online failed, falling back to interface if possible: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if let Some(interface) = &self.interface {
            match self.ip_from_interface(interface) {
                Ok(ip) => {
                    tracing::debug!("Resolved IP {} from interface {}", ip, interface);
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!("Getting IP from interface {} failed: {}", interface, e);
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            failures.push("neither ip_url nor ip_interface is configured".to_string());
        }
        Err(DdnsError::NoAddressAvailable(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(ip_url: Option<String>, interface: Option<&str>, interfaces: MockInterfaceAddrs) -> IpResolver {
        IpResolver::new(
            reqwest::Client::new(),
            ip_url,
            interface.map(str::to_string),
            Box::new(interfaces),
        )
    }

    #[test]
    fn test_select_skips_disqualified_addresses() {
        let addrs = vec![
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(169, 254, 10, 1)),
            IpAddr::V4(Ipv4Addr::new(224, 0, 0, 251)),
            IpAddr::V4(Ipv4Addr::BROADCAST),
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        ];
        assert_eq!(
            select_interface_ip(&addrs),
            Some(Ipv4Addr::new(192, 168, 1, 20))
        );
    }

    #[test]
    fn test_select_first_match_wins() {
        let addrs = vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
        ];
        assert_eq!(select_interface_ip(&addrs), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn test_select_nothing_usable() {
        let addrs = vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        assert_eq!(select_interface_ip(&addrs), None);
        assert_eq!(select_interface_ip(&[]), None);
    }

    #[tokio::test]
    async fn test_online_source_preferred() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.5\n"))
            .mount(&mock_server)
            .await;

        let mut interfaces = MockInterfaceAddrs::new();
        interfaces.expect_addresses().never();

        let resolver = resolver(Some(format!("{}/ip", mock_server.uri())), Some("eth0"), interfaces);
        assert_eq!(resolver.current_ip().await.unwrap(), "1.2.3.5");
    }

    #[tokio::test]
    async fn test_falls_back_to_interface() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let mut interfaces = MockInterfaceAddrs::new();
        interfaces.expect_addresses().times(1).returning(|_| {
            Ok(vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)),
            ])
        });

        let resolver = resolver(Some(format!("{}/ip", mock_server.uri())), Some("eth0"), interfaces);
        assert_eq!(resolver.current_ip().await.unwrap(), "198.51.100.4");
    }

    #[tokio::test]
    async fn test_garbage_echo_response_falls_back() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
            .mount(&mock_server)
            .await;

        let mut interfaces = MockInterfaceAddrs::new();
        interfaces
            .expect_addresses()
            .returning(|_| Ok(vec![IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))]));

        let resolver = resolver(Some(mock_server.uri()), Some("eth0"), interfaces);
        assert_eq!(resolver.current_ip().await.unwrap(), "10.1.2.3");
    }

    #[tokio::test]
    async fn test_no_address_available() {
        let mut interfaces = MockInterfaceAddrs::new();
        interfaces
            .expect_addresses()
            .returning(|_| Ok(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]));

        let resolver = resolver(None, Some("lo"), interfaces);
        assert!(matches!(
            resolver.current_ip().await,
            Err(DdnsError::NoAddressAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let resolver = resolver(None, None, MockInterfaceAddrs::new());
        assert!(matches!(
            resolver.current_ip().await,
            Err(DdnsError::NoAddressAvailable(_))
        ));
    }
}
