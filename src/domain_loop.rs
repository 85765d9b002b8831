//! Per-domain reconciliation loop.
//!
//! Each configured domain gets its own [`DomainLoop`] running on its own task:
//! resolve the current IP, compare it with the last applied one, push it to
//! the provider for every subdomain, notify, then sleep for the interval.

use crate::change::has_changed;
use crate::config::DomainConfig;
use crate::notify::Notifier;
use crate::providers::{DnsProvider, SyncOutcome};
use crate::resolver::ResolveIp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Mutable per-loop state. Never shared with other loops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DomainState {
    /// Last IP successfully applied to every subdomain.
    pub last_ip: Option<String>,
}

/// Result of a single cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No IP could be resolved; nothing was sent to the provider.
    ResolveFailed,
    /// The IP matches the last applied one; nothing was sent to the provider.
    Unchanged { ip: String },
    /// The IP changed and every subdomain was processed.
    Applied {
        ip: String,
        updated: usize,
        failed: usize,
    },
}

/// The reconciliation loop for one domain.
pub struct DomainLoop {
    domain: Arc<DomainConfig>,
    provider: Box<dyn DnsProvider>,
    resolver: Arc<dyn ResolveIp>,
    notifier: Option<Arc<dyn Notifier>>,
    interval: Duration,
    state: DomainState,
    shutdown: watch::Receiver<bool>,
}

impl DomainLoop {
    pub fn new(
        domain: Arc<DomainConfig>,
        provider: Box<dyn DnsProvider>,
        resolver: Arc<dyn ResolveIp>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            domain,
            provider,
            resolver,
            notifier: None,
            interval,
            state: DomainState::default(),
            shutdown,
        }
    }

    /// Send a notification for every updated record.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn domain(&self) -> &DomainConfig {
        &self.domain
    }

    pub fn state(&self) -> &DomainState {
        &self.state
    }

    /// Run cycles until shutdown is requested.
    ///
    /// Panics raised while talking to the provider are not caught here; the
    /// supervisor observes them through the task's join handle.
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        tracing::info!(domain = %self.domain.domain_name, "Domain loop started");

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = self.run_cycle() => {}
            }

            tracing::debug!(
                domain = %self.domain.domain_name,
                "Going to sleep, next check in {}s",
                self.interval.as_secs()
            );

            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!(domain = %self.domain.domain_name, "Domain loop stopped");
    }

    /// Run one resolve → compare → update → notify cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let domain_name = self.domain.domain_name.as_str();

        let ip = match self.resolver.current_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(domain = %domain_name, "Failed to resolve current IP: {}", e);
                return CycleOutcome::ResolveFailed;
            }
        };

        if !has_changed(self.state.last_ip.as_deref(), &ip) {
            tracing::info!(domain = %domain_name, ip = %ip, "IP unchanged, no update needed");
            return CycleOutcome::Unchanged { ip };
        }

        tracing::info!(
            domain = %domain_name,
            "IP changed: {:?} -> {}",
            self.state.last_ip,
            ip
        );

        let mut updated = 0;
        let mut failed = 0;

        for sub_domain in &self.domain.sub_domains {
            let record = self.domain.fqdn(sub_domain);

            match self
                .provider
                .sync_subdomain(domain_name, sub_domain, &ip)
                .await
            {
                Ok(SyncOutcome::Updated { previous }) => {
                    updated += 1;
                    tracing::info!(
                        provider = self.provider.name(),
                        record = %record,
                        "Updated {:?} -> {}",
                        previous,
                        ip
                    );

                    if let Some(notifier) = &self.notifier {
                        if let Err(e) = notifier.notify(&record, &ip).await {
                            tracing::warn!(record = %record, "Failed to send notification: {}", e);
                        }
                    }
                }
                Ok(SyncOutcome::Unchanged) => {
                    tracing::info!(
                        provider = self.provider.name(),
                        record = %record,
                        "Record already points at {}",
                        ip
                    );
                }
                Ok(SyncOutcome::NotFound) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        record = %record,
                        "Record not configured yet, skipping"
                    );
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        provider = self.provider.name(),
                        record = %record,
                        "Failed to update record: {}",
                        e
                    );
                }
            }
        }

        // A failed subdomain must be retried next cycle, so only remember a
        // fully applied IP.
        if failed == 0 {
            self.state.last_ip = Some(ip.clone());
        }

        CycleOutcome::Applied {
            ip,
            updated,
            failed,
        }
    }
}

/// Resolves once `true` is published on the shutdown channel. A dropped sender
/// means nobody can ask for shutdown any more, so this then never resolves.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{DdnsError, Result};
    use crate::providers::ProviderRecord;
    use crate::resolver::MockResolveIp;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider holding one in-memory record per subdomain and counting calls.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub records: Mutex<Vec<(String, String)>>,
        pub lookups: Arc<Mutex<usize>>,
        pub updates: Arc<Mutex<Vec<(String, String)>>>,
        pub failing: Vec<String>,
    }

    impl FakeProvider {
        pub fn with_record(sub_domain: &str, value: &str) -> Self {
            Self {
                records: Mutex::new(vec![(sub_domain.to_string(), value.to_string())]),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DnsProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn find_record(
            &self,
            _domain: &str,
            sub_domain: &str,
        ) -> Result<Option<ProviderRecord>> {
            *self.lookups.lock().unwrap() += 1;
            if self.failing.iter().any(|s| s == sub_domain) {
                return Err(DdnsError::Network("connection reset".to_string()));
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| name == sub_domain)
                .map(|(name, value)| ProviderRecord::new(name.clone(), name.clone(), Some(value.clone()))))
        }

        async fn update_record(&self, _domain: &str, record: &ProviderRecord, ip: &str) -> Result<()> {
            self.updates
                .lock()
                .unwrap()
                .push((record.name.clone(), ip.to_string()));
            for (name, value) in self.records.lock().unwrap().iter_mut() {
                if *name == record.name {
                    *value = ip.to_string();
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub calls: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, domain: &str, ip: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((domain.to_string(), ip.to_string()));
            if self.fail {
                return Err(DdnsError::Notification("smtp down".to_string()));
            }
            Ok(())
        }
    }

    fn resolver_returning(ips: &[&str]) -> Arc<dyn ResolveIp> {
        let mut resolver = MockResolveIp::new();
        let mut seq = mockall::Sequence::new();
        for ip in ips {
            let ip = ip.to_string();
            resolver
                .expect_current_ip()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move || Ok(ip.clone()));
        }
        Arc::new(resolver)
    }

    fn domain_loop(
        provider: FakeProvider,
        resolver: Arc<dyn ResolveIp>,
        notifier: Arc<RecordingNotifier>,
    ) -> DomainLoop {
        let (_tx, rx) = watch::channel(false);
        DomainLoop::new(
            Arc::new(DomainConfig::new("example.com", &["home"])),
            Box::new(provider),
            resolver,
            Duration::from_secs(300),
            rx,
        )
        .with_notifier(notifier)
    }

    #[tokio::test]
    async fn test_changed_ip_updates_and_notifies() {
        let provider = FakeProvider::with_record("home", "1.2.3.4");
        let updates = provider.updates.clone();
        let notifier = Arc::new(RecordingNotifier::default());

        let mut domain_loop = domain_loop(provider, resolver_returning(&["1.2.3.5"]), notifier.clone());
        assert_eq!(domain_loop.domain().domain_name, "example.com");
        let outcome = domain_loop.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                ip: "1.2.3.5".to_string(),
                updated: 1,
                failed: 0
            }
        );
        assert_eq!(
            *updates.lock().unwrap(),
            vec![("home".to_string(), "1.2.3.5".to_string())]
        );
        assert_eq!(
            *notifier.calls.lock().unwrap(),
            vec![("home.example.com".to_string(), "1.2.3.5".to_string())]
        );
        assert_eq!(domain_loop.state().last_ip.as_deref(), Some("1.2.3.5"));
    }

    #[tokio::test]
    async fn test_matching_record_is_left_alone() {
        let provider = FakeProvider::with_record("home", "1.2.3.5");
        let updates = provider.updates.clone();
        let notifier = Arc::new(RecordingNotifier::default());

        let mut domain_loop = domain_loop(provider, resolver_returning(&["1.2.3.5"]), notifier.clone());
        let outcome = domain_loop.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                ip: "1.2.3.5".to_string(),
                updated: 0,
                failed: 0
            }
        );
        assert!(updates.lock().unwrap().is_empty());
        assert!(notifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_ip_skips_provider_entirely() {
        let provider = FakeProvider::with_record("home", "1.2.3.4");
        let updates = provider.updates.clone();
        let lookups = provider.lookups.clone();
        let notifier = Arc::new(RecordingNotifier::default());

        let mut domain_loop = domain_loop(
            provider,
            resolver_returning(&["1.2.3.5", "1.2.3.5\n", "1.2.3.5\n"]),
            notifier.clone(),
        );

        domain_loop.run_cycle().await;
        assert_eq!(*lookups.lock().unwrap(), 1);

        domain_loop.run_cycle().await;
        let outcome = domain_loop.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Unchanged {
                ip: "1.2.3.5\n".to_string()
            }
        );
        // Neither lookups nor updates reach the provider once the IP is unchanged.
        assert_eq!(*lookups.lock().unwrap(), 1);
        assert_eq!(updates.lock().unwrap().len(), 1);
        assert_eq!(notifier.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_touches_nothing() {
        let mut resolver = MockResolveIp::new();
        resolver
            .expect_current_ip()
            .returning(|| Err(DdnsError::NoAddressAvailable("offline".to_string())));

        let provider = FakeProvider::with_record("home", "1.2.3.4");
        let updates = provider.updates.clone();
        let notifier = Arc::new(RecordingNotifier::default());

        let mut domain_loop = domain_loop(provider, Arc::new(resolver), notifier.clone());

        assert_eq!(domain_loop.run_cycle().await, CycleOutcome::ResolveFailed);
        assert!(updates.lock().unwrap().is_empty());
        assert!(domain_loop.state().last_ip.is_none());
    }

    #[tokio::test]
    async fn test_failed_subdomain_does_not_block_siblings() {
        let provider = FakeProvider {
            records: Mutex::new(vec![
                ("home".to_string(), "1.2.3.4".to_string()),
                ("nas".to_string(), "1.2.3.4".to_string()),
            ]),
            failing: vec!["home".to_string()],
            ..Default::default()
        };
        let updates = provider.updates.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let (_tx, rx) = watch::channel(false);

        let mut domain_loop = DomainLoop::new(
            Arc::new(DomainConfig::new("example.com", &["home", "nas"])),
            Box::new(provider),
            resolver_returning(&["1.2.3.5"]),
            Duration::from_secs(300),
            rx,
        )
        .with_notifier(notifier.clone());

        let outcome = domain_loop.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                ip: "1.2.3.5".to_string(),
                updated: 1,
                failed: 1
            }
        );
        assert_eq!(
            *updates.lock().unwrap(),
            vec![("nas".to_string(), "1.2.3.5".to_string())]
        );
        // Not remembered, so the next cycle retries "home".
        assert!(domain_loop.state().last_ip.is_none());
    }

    #[tokio::test]
    async fn test_missing_record_is_skipped() {
        let provider = FakeProvider::default();
        let updates = provider.updates.clone();
        let notifier = Arc::new(RecordingNotifier::default());

        let mut domain_loop = domain_loop(provider, resolver_returning(&["1.2.3.5"]), notifier.clone());
        let outcome = domain_loop.run_cycle().await;

        assert_eq!(
            outcome,
            CycleOutcome::Applied {
                ip: "1.2.3.5".to_string(),
                updated: 0,
                failed: 0
            }
        );
        assert!(updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_is_not_fatal() {
        let provider = FakeProvider::with_record("home", "1.2.3.4");
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });

        let mut domain_loop = domain_loop(provider, resolver_returning(&["1.2.3.5"]), notifier.clone());
        let outcome = domain_loop.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Applied { updated: 1, failed: 0, .. }));
        assert_eq!(domain_loop.state().last_ip.as_deref(), Some("1.2.3.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sleeps_between_cycles_and_stops_on_shutdown() {
        let provider = FakeProvider::with_record("home", "1.2.3.4");
        let updates = provider.updates.clone();

        let mut resolver = MockResolveIp::new();
        resolver
            .expect_current_ip()
            .returning(|| Ok("1.2.3.5".to_string()));

        let (tx, rx) = watch::channel(false);
        let domain_loop = DomainLoop::new(
            Arc::new(DomainConfig::new("example.com", &["home"])),
            Box::new(provider),
            Arc::new(resolver),
            Duration::from_secs(60),
            rx,
        );

        let handle = tokio::spawn(domain_loop.run());
        tokio::time::sleep(Duration::from_secs(600)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(updates.lock().unwrap().len(), 1);
    }
}
