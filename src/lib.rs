//! # ddns-warden
//!
//! A dynamic DNS daemon that keeps A records pointed at the host's current IP.
//!
//! ## Features
//!
//! - Multiple DNS providers: DNSPod, Cloudflare, AliDNS, Hurricane Electric, Google, DuckDNS
//! - IP resolution from an online echo service with fallback to a local interface
//! - One independent reconciliation loop per domain, restarted on crashes up to a limit
//! - Optional email notification when a record is updated
//! - SOCKS5 proxy support for all outbound HTTP
//!
//! ## Usage
//!
//! ```bash
//! # Show the IP that would be published
//! ddns-warden ip
//!
//! # Validate configuration
//! ddns-warden check
//!
//! # Run the daemon
//! ddns-warden run
//! ```

pub mod change;
pub mod config;
pub mod domain_loop;
pub mod error;
pub mod notify;
pub mod providers;
pub mod resolver;
pub mod supervisor;

pub use config::{DomainConfig, ProviderKind, Settings};
pub use domain_loop::{CycleOutcome, DomainLoop, DomainState};
pub use error::{DdnsError, Result};
pub use resolver::{IpResolver, ResolveIp};
pub use supervisor::{FailureSignal, Supervisor, SupervisorReport, PANIC_MAX};
