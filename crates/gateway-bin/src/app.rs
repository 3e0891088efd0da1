//! Gateway assembly and lifecycle.
//!
//! Wires the AMI session, the ingest path, the delivery pipeline and
//! the reconciler together, then supervises them until a shutdown
//! signal or a fatal error. Shutdown order: flip the watch signal
//! (which makes the supervisor log off), drain every task, close the
//! store last by dropping it.

use ami_client::{run_supervisor, AmiClient, AmiFrame, ConnectSettings, SupervisorConfig};
use call_routing::{NumberRegistry, TenantRoster};
use cdr_store::CdrStore;
use delivery_pipeline::{DeliveryPipeline, PortalSink};
use gateway_config::{Alert, Alerter, Config};
use portal_client::PortalClient;
use queue_reconciler::QueueReconciler;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::ingest::CdrIngest;
use crate::recording::RecordStarter;

/// Portal endpoint serving the tenant's inner-number roster.
const ROSTER_ENDPOINT: &str = "get_employees_inner_phone";

/// Backpressure bound between the AMI read loop and the ingest task.
const CDR_QUEUE_DEPTH: usize = 1024;
const BRIDGE_QUEUE_DEPTH: usize = 256;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let alert: Arc<dyn Alert> = Arc::new(Alerter::new(&config.pbx_name, config.alert_url.clone()));
    let store = Arc::new(CdrStore::open(Path::new(&config.outbox_path))?);
    let portal = Arc::new(PortalClient::new());

    let rosters: Vec<TenantRoster> = config
        .tenants
        .iter()
        .filter_map(|(country, tenant)| {
            Some(TenantRoster {
                country: country.clone(),
                url: config.api_url(country, ROSTER_ENDPOINT)?,
                tenant_id: tenant.tenant_id.clone(),
                secret: tenant.secret.clone(),
            })
        })
        .collect();
    let registry = Arc::new(NumberRegistry::new(Arc::clone(&portal), rosters));

    // Classification needs the number space before the first event.
    info!("Fetching initial inner-number rosters");
    registry.refresh().await;

    let client = AmiClient::new();

    // Handlers run inline on the read loop, so they only forward into
    // bounded queues; the real work happens on the tasks below.
    let (cdr_tx, mut cdr_rx) = mpsc::channel::<AmiFrame>(CDR_QUEUE_DEPTH);
    client.register_event_handler("Cdr", move |frame| {
        if cdr_tx.try_send(frame.clone()).is_err() {
            warn!("CDR queue full, event dropped");
        }
    });
    let (bridge_tx, mut bridge_rx) = mpsc::channel::<AmiFrame>(BRIDGE_QUEUE_DEPTH);
    client.register_event_handler("Bridge", move |frame| {
        if bridge_tx.try_send(frame.clone()).is_err() {
            warn!("Bridge queue full, event dropped");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    // Ingest: the only task allowed to declare the process broken, on
    // a persistence failure.
    let ingest = CdrIngest::new(Arc::clone(&config), Arc::clone(&registry), Arc::clone(&store));
    {
        let alert = Arc::clone(&alert);
        let mut shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    frame = cdr_rx.recv() => {
                        let Some(frame) = frame else { return Ok(()) };
                        if let Err(e) = ingest.handle(&frame) {
                            alert.alert(&format!("Call record persistence failed: {e}"));
                            return Err(e.into());
                        }
                    }
                }
            }
        });
    }

    // Recording starter.
    let starter = RecordStarter::new(
        client.clone(),
        &config.pbx_name,
        Path::new(&config.recordings_dir),
    );
    {
        let mut shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    frame = bridge_rx.recv() => {
                        let Some(frame) = frame else { return Ok(()) };
                        starter.handle(&frame).await;
                    }
                }
            }
        });
    }

    // AMI session supervisor.
    {
        let supervisor_config = SupervisorConfig::new(ConnectSettings {
            host: config.ami.host.clone(),
            username: config.ami.username.clone(),
            secret: config.ami.secret.clone(),
        });
        let client = client.clone();
        let alert = Arc::clone(&alert);
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            run_supervisor(client, supervisor_config, alert, shutdown)
                .await
                .map_err(Into::into)
        });
    }

    // Delivery pipeline.
    {
        let sink = Arc::new(PortalSink::new(
            Arc::clone(&portal),
            config.tenants.clone(),
            config.api_prefix.clone(),
        ));
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&store),
            sink,
            Arc::clone(&alert),
            config.delivery.clone(),
        );
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            pipeline.run(shutdown).await;
            Ok(())
        });
    }

    // Queue reconciler.
    {
        let reconciler = QueueReconciler::new(
            client.clone(),
            Arc::clone(&registry),
            Arc::clone(&portal),
            Arc::clone(&config),
            Arc::clone(&alert),
        );
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            reconciler.run(shutdown).await;
            Ok(())
        });
    }

    // Registry refresher.
    {
        let registry = Arc::clone(&registry);
        let interval_secs = config.intervals.registry_refresh_secs;
        let mut shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(interval_secs));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    _ = tick.tick() => registry.refresh().await,
                }
            }
        });
    }

    info!(pbx = %config.pbx_name, tenants = config.tenants.len(), "Gateway started");

    let result = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
        joined = tasks.join_next() => match joined {
            Some(Ok(Err(e))) => Err(e),
            Some(Err(e)) => Err(e.into()),
            _ => Ok(()),
        },
    };

    // The supervisor logs off the AMI session when the signal flips;
    // the store closes when its last Arc drops, after every task.
    let _ = shutdown_tx.send(true);
    while tasks.join_next().await.is_some() {}
    info!("Gateway stopped");
    result
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
