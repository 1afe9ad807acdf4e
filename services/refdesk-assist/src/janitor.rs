//! Background eviction of expired sessions.

use crate::gateway::ProviderGateway;
use crate::reclaim::{release_resources, ReleaseFailure};
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Result of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub evicted: Vec<String>,
    pub provider_failures: Vec<ReleaseFailure>,
}

pub struct Janitor {
    store: SessionStore,
    gateway: Arc<dyn ProviderGateway>,
    max_age: Duration,
    interval: Duration,
}

impl Janitor {
    pub fn new(
        store: SessionStore,
        gateway: Arc<dyn ProviderGateway>,
        max_age: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            max_age,
            interval,
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Evict every bundle older than `max_age` as of `now`.
    ///
    /// Age is judged once against the snapshot. A bundle removed by someone
    /// else in the meantime is skipped without touching the provider.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let max_age = chrono::Duration::from_std(self.max_age)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let snapshot = self.store.snapshot().await;
        let mut report = SweepReport {
            examined: snapshot.len(),
            ..SweepReport::default()
        };

        let expired: Vec<_> = snapshot
            .into_iter()
            .filter(|bundle| bundle.is_expired(now, max_age))
            .collect();

        for bundle in expired {
            let Ok(bundle) = self.store.remove(&bundle.session_id).await else {
                tracing::debug!(session_id = %bundle.session_id, "Session already removed");
                continue;
            };

            let age_mins = bundle.age(now).num_minutes();
            tracing::info!(
                session_id = %bundle.session_id,
                source_ref = %bundle.source_ref,
                age_mins,
                "Evicting expired session"
            );

            let resources = bundle.owned_resources();
            let release = release_resources(self.gateway.as_ref(), &resources).await;
            report.provider_failures.extend(release.failures);
            report.evicted.push(bundle.session_id);
        }

        if report.evicted.is_empty() {
            tracing::debug!(examined = report.examined, "Sweep found nothing to evict");
        } else {
            tracing::info!(
                examined = report.examined,
                evicted = report.evicted.len(),
                failures = report.provider_failures.len(),
                "Sweep complete"
            );
        }

        report
    }

    /// Run sweeps every `interval` until the returned handle is stopped.
    /// The first sweep happens one interval after spawning.
    pub fn spawn(self: Arc<Self>) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = self.interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            tracing::info!(
                interval_secs = period.as_secs(),
                max_age_secs = self.max_age.as_secs(),
                "Janitor started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Janitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
        });

        JanitorHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a running janitor loop.
pub struct JanitorHandle {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl JanitorHandle {
    /// Signal the loop to stop and wait for it. A sweep already underway
    /// finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Janitor task ended abnormally");
        }
    }
}
