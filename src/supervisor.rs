//! Launches one [`DomainLoop`] per domain and restarts the ones that crash.
//!
//! A loop that panics (typically on a provider response it cannot handle)
//! takes down only its own task. The wrapper task around it turns the panic
//! into a [`FailureSignal`] for the supervisor, which relaunches the domain
//! until it has failed more than `panic_max` times.

use crate::config::{DomainConfig, Settings};
use crate::domain_loop::{wait_for_shutdown, DomainLoop};
use crate::error::Result;
use crate::notify::{Notifier, SmtpNotifier};
use crate::providers::create_provider;
use crate::resolver::IpResolver;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Restarts allowed per domain before it is abandoned.
pub const PANIC_MAX: u32 = 5;

/// Emitted when a domain loop terminates abnormally.
#[derive(Debug, Clone)]
pub struct FailureSignal {
    /// Index of the domain in the list passed to [`Supervisor::run`].
    pub slot: usize,
    pub domain: Arc<DomainConfig>,
    pub reason: String,
}

/// Builds a fresh [`DomainLoop`] for a domain, on first start and on every restart.
pub trait LoopFactory: Send + Sync {
    fn build(&self, domain: Arc<DomainConfig>, shutdown: watch::Receiver<bool>)
        -> Result<DomainLoop>;
}

/// Builds loops from [`Settings`]: one provider and resolver per loop.
pub struct SettingsLoopFactory {
    settings: Arc<Settings>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SettingsLoopFactory {
    pub fn new(settings: Arc<Settings>) -> Self {
        let notifier = settings
            .notify
            .enabled
            .then(|| Arc::new(SmtpNotifier::new(settings.notify.clone())) as Arc<dyn Notifier>);

        Self { settings, notifier }
    }
}

impl LoopFactory for SettingsLoopFactory {
    fn build(
        &self,
        domain: Arc<DomainConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<DomainLoop> {
        let provider = create_provider(&self.settings)?;
        let resolver = Arc::new(IpResolver::from_settings(&self.settings)?);

        let domain_loop = DomainLoop::new(
            domain,
            provider,
            resolver,
            self.settings.interval(),
            shutdown,
        );

        Ok(match &self.notifier {
            Some(notifier) => domain_loop.with_notifier(notifier.clone()),
            None => domain_loop,
        })
    }
}

/// Final accounting once the supervisor returns.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Failure count per configured domain, in the order the domains were given.
    pub failures: Vec<u32>,
    /// Domains that exhausted their restarts, in the order they were abandoned.
    pub abandoned: Vec<Arc<DomainConfig>>,
}

/// Runs and restarts domain loops.
pub struct Supervisor {
    factory: Arc<dyn LoopFactory>,
    panic_max: u32,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(factory: Arc<dyn LoopFactory>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            factory,
            panic_max: PANIC_MAX,
            shutdown,
        }
    }

    pub fn with_panic_max(mut self, panic_max: u32) -> Self {
        self.panic_max = panic_max;
        self
    }

    /// Run one loop per domain until shutdown is requested or every domain
    /// has been abandoned.
    pub async fn run(&self, domains: Vec<DomainConfig>) -> SupervisorReport {
        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<FailureSignal>();
        let mut tasks = JoinSet::new();
        let mut report = SupervisorReport {
            failures: vec![0; domains.len()],
            abandoned: Vec::new(),
        };
        let mut shutdown = self.shutdown.clone();

        // Entries may share a domain_name, so accounting is per slot.
        let mut running = domains.len();
        for (slot, domain) in domains.into_iter().enumerate() {
            self.launch(&mut tasks, slot, Arc::new(domain), failure_tx.clone());
        }

        while running > 0 {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!("Shutdown requested, stopping domain loops");
                    break;
                }
                Some(signal) = failure_rx.recv() => {
                    let name = signal.domain.domain_name.as_str();
                    let count = &mut report.failures[signal.slot];
                    *count += 1;

                    tracing::error!(
                        domain = %name,
                        slot = signal.slot,
                        failures = *count,
                        "Domain loop failed: {}",
                        signal.reason
                    );

                    if *count > self.panic_max {
                        tracing::error!(
                            domain = %name,
                            "Domain failed {} times, giving up on it",
                            *count
                        );
                        report.abandoned.push(signal.domain);
                        running -= 1;
                    } else {
                        tracing::info!(domain = %name, "Restarting domain loop");
                        self.launch(&mut tasks, signal.slot, signal.domain, failure_tx.clone());
                    }
                }
                // Reap finished wrapper tasks so the set doesn't grow with restarts.
                Some(_) = tasks.join_next() => {}
            }
        }

        while tasks.join_next().await.is_some() {}
        report
    }

    fn launch(
        &self,
        tasks: &mut JoinSet<()>,
        slot: usize,
        domain: Arc<DomainConfig>,
        failure_tx: mpsc::UnboundedSender<FailureSignal>,
    ) {
        let domain_loop = match self.factory.build(domain.clone(), self.shutdown.clone()) {
            Ok(domain_loop) => domain_loop,
            Err(e) => {
                let _ = failure_tx.send(FailureSignal {
                    slot,
                    domain,
                    reason: format!("cannot build domain loop: {}", e),
                });
                return;
            }
        };

        tracing::debug!(domain = %domain_loop.domain().domain_name, slot, "Launching domain loop");

        tasks.spawn(async move {
            match tokio::spawn(domain_loop.run()).await {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    let _ = failure_tx.send(FailureSignal {
                        slot,
                        domain,
                        reason: panic_message(e.into_panic()),
                    });
                }
                Err(e) => {
                    tracing::debug!(domain = %domain.domain_name, "Domain loop cancelled: {}", e);
                }
            }
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
