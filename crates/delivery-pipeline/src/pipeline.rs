//! Outbox reader and sender pool.

use crate::{CdrSink, PipelineResult};
use cdr_store::{CallRecord, CdrStore};
use gateway_config::{Alert, DeliverySettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Timer-driven reader plus a pool of sender workers.
///
/// Every tick reads at most `max_cdr` of the oldest records and fans
/// them out to `sender_count` workers. Records survive failed sends;
/// the tick interval doubles as the retry interval. A record still in
/// flight can be re-read on the next tick, which is harmless because
/// deletion is idempotent and the portals de-duplicate by unique id.
pub struct DeliveryPipeline<S: CdrSink> {
    store: Arc<CdrStore>,
    sink: Arc<S>,
    alert: Arc<dyn Alert>,
    settings: DeliverySettings,
}

impl<S: CdrSink> DeliveryPipeline<S> {
    pub fn new(
        store: Arc<CdrStore>,
        sink: Arc<S>,
        alert: Arc<dyn Alert>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            store,
            sink,
            alert,
            settings,
        }
    }

    /// Run until the shutdown signal flips. In-flight sends finish
    /// before this returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick =
            tokio::time::interval(Duration::from_secs(self.settings.read_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            max_cdr = self.settings.max_cdr,
            sender_count = self.settings.sender_count,
            interval_secs = self.settings.read_interval_secs,
            "Delivery pipeline started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!(error = %e, "Outbox drain failed");
                    }
                }
            }
        }

        info!("Delivery pipeline stopped");
    }

    /// One reader tick: overload check, read a batch, deliver it.
    /// Returns the number of records confirmed delivered.
    pub async fn drain_once(&self) -> PipelineResult<usize> {
        let pending = self.store.cdr_count()?;
        if pending >= self.settings.overload_factor * self.settings.max_cdr {
            // One alert per tick; delivery keeps going regardless.
            self.alert.alert(&format!(
                "CDR outbox overloaded: {pending} records pending"
            ));
        }

        let batch = self.store.select_pending(self.settings.max_cdr)?;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!(batch = batch.len(), pending, "Draining outbox");

        let (tx, rx) = mpsc::channel::<CallRecord>(self.settings.max_cdr);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.settings.sender_count {
            let store = Arc::clone(&self.store);
            let sink = Arc::clone(&self.sink);
            let rx = Arc::clone(&rx);
            workers.spawn(async move {
                let mut delivered = 0usize;
                loop {
                    let record = { rx.lock().await.recv().await };
                    let Some(record) = record else { break };
                    match sink.deliver(&record).await {
                        Ok(()) => {
                            if let Err(e) = store.delete_cdr(&record.unique_id) {
                                warn!(unique_id = %record.unique_id, error = %e,
                                      "Delivered record could not be deleted");
                            }
                            delivered += 1;
                        }
                        Err(e) => {
                            warn!(unique_id = %record.unique_id, error = %e,
                                  "Delivery failed, record kept for retry");
                        }
                    }
                }
                delivered
            });
        }

        for record in batch {
            // Capacity equals the batch size, so this never blocks.
            if tx.send(record).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut delivered = 0;
        while let Some(result) = workers.join_next().await {
            delivered += result.unwrap_or(0);
        }
        Ok(delivered)
    }
}
