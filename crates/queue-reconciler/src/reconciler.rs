//! Periodic queue reconciliation.

use crate::{availability, group_memberships, MembershipMap, QueueState, StatusBarrier};
use ami_client::{actions, AmiClient};
use call_routing::NumberRegistry;
use gateway_config::{Alert, Config};
use portal_client::{PortalClient, PortalMethod};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Portal endpoint the per-tenant status map lands on.
const SAVE_QUEUES_ENDPOINT: &str = "save_company_queues_states";

/// How long a membership dump may take before the cycle is skipped.
const BURST_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives the refresh / dump / compare / report cycle on a fixed
/// timer. One loop task, so cycles never overlap.
pub struct QueueReconciler {
    client: AmiClient,
    registry: Arc<NumberRegistry>,
    portal: Arc<PortalClient>,
    config: Arc<Config>,
    barrier: Arc<StatusBarrier>,
    alert: Arc<dyn Alert>,
}

impl QueueReconciler {
    pub fn new(
        client: AmiClient,
        registry: Arc<NumberRegistry>,
        portal: Arc<PortalClient>,
        config: Arc<Config>,
        alert: Arc<dyn Alert>,
    ) -> Self {
        let barrier = StatusBarrier::new();
        barrier.register(&client);
        Self {
            client,
            registry,
            portal,
            config,
            barrier,
            alert,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(
            self.config.intervals.queue_reconcile_secs,
        ));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.intervals.queue_reconcile_secs,
            "Queue reconciler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => self.reconcile_once().await,
            }
        }
        info!("Queue reconciler stopped");
    }

    /// One full cycle: refresh the registry, dump memberships, compare
    /// against static provisioning, report per tenant.
    pub async fn reconcile_once(&self) {
        self.registry.refresh().await;

        self.barrier.begin_burst();
        if let Err(e) = actions::queue_status(&self.client).await {
            warn!(error = %e, "QueueStatus request failed, cycle skipped");
            return;
        }

        let Some(mut rx) = self.barrier.await_complete(BURST_TIMEOUT).await else {
            self.alert
                .alert("Queue status dump never completed, reconciliation skipped");
            return;
        };

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        let memberships = group_memberships(&frames);
        debug!(members = memberships.len(), "Queue membership dump collected");

        for country in self.config.tenants.keys() {
            let statuses = self.tenant_statuses(country, &memberships).await;
            if statuses.is_empty() {
                continue;
            }
            self.push_statuses(country, statuses).await;
        }
    }

    /// Compute `{number: status}` for one tenant and clean up strays
    /// along the way.
    async fn tenant_statuses(
        &self,
        country: &str,
        memberships: &MembershipMap,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut statuses = serde_json::Map::new();

        for number in self.registry.numbers_for(country) {
            let key = (number.clone(), country.to_string());
            let state = match memberships.get(&key) {
                None => QueueState::NotInQueue,
                Some(active) => self.check_member(&number, active).await,
            };
            statuses.insert(number, state.as_str().into());
        }
        statuses
    }

    async fn check_member(&self, number: &str, active: &BTreeSet<String>) -> QueueState {
        let static_queue = match actions::static_queue(&self.client, number).await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(number, error = %e, "Static queue lookup failed");
                return QueueState::NotAvailable;
            }
        };

        let (state, strays) = availability(&static_queue, active);
        for stray in strays {
            debug!(number, queue = %stray, "Removing stray queue membership");
            if let Err(e) = actions::queue_remove(&self.client, &stray, number).await {
                warn!(number, queue = %stray, error = %e, "Stray removal failed");
            }
        }
        state
    }

    async fn push_statuses(
        &self,
        country: &str,
        statuses: serde_json::Map<String, serde_json::Value>,
    ) {
        let Some(tenant) = self.config.tenants.get(country) else {
            return;
        };
        let Some(url) = self.config.api_url(country, SAVE_QUEUES_ENDPOINT) else {
            return;
        };

        let payload = serde_json::Value::Object(statuses);
        match self
            .portal
            .send(
                &payload,
                &url,
                PortalMethod::Post,
                &tenant.secret,
                &tenant.tenant_id,
            )
            .await
        {
            Ok(_) => debug!(country, "Queue states reported"),
            Err(e) => warn!(country, error = %e, "Queue state report failed"),
        }
    }
}
