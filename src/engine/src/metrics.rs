//! Optional Prometheus metrics export: a small gauge/counter registry
//! served over an axum `/metrics` route with graceful-shutdown wiring.

use crate::config::MetricsSettings;
use crate::context::EngineContext;
use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use taskqueue_eventbus::EventKind;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help)
}

/// Per-group gauges refreshed on a timer, plus lifecycle counters fed by
/// the event bus: polled system gauges kept separate from event-driven
/// counters.
struct EngineMetrics {
    registry: Registry,
    queue_depth: IntGaugeVec,
    active_tasks: IntGaugeVec,
    claims_total: IntCounterVec,
    completions_total: IntCounterVec,
    failures_total: IntCounterVec,
    retries_total: IntCounterVec,
}

impl EngineMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let queue_depth = IntGaugeVec::new(
            opts("taskqueue_group_queue_depth", "Tasks waiting or delayed in a group's order set"),
            &["queue", "group"],
        )?;
        let active_tasks = IntGaugeVec::new(
            opts("taskqueue_group_active_tasks", "Tasks currently claimed and processing in a group"),
            &["queue", "group"],
        )?;
        let claims_total = IntCounterVec::new(
            opts("taskqueue_claims_total", "Tasks claimed from any group"),
            &["queue"],
        )?;
        let completions_total = IntCounterVec::new(
            opts("taskqueue_completions_total", "Tasks that finished successfully"),
            &["queue"],
        )?;
        let failures_total = IntCounterVec::new(
            opts("taskqueue_failures_total", "Tasks that exhausted their retries"),
            &["queue"],
        )?;
        let retries_total = IntCounterVec::new(
            opts("taskqueue_retries_total", "Retry attempts recorded across all groups"),
            &["queue"],
        )?;

        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(active_tasks.clone()))?;
        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(completions_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;

        Ok(Self {
            registry,
            queue_depth,
            active_tasks,
            claims_total,
            completions_total,
            failures_total,
            retries_total,
        })
    }

    fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

async fn metrics_handler(State(metrics): State<Arc<EngineMetrics>>) -> (StatusCode, String) {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            warn!(%err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Poll every configured queue's groups on an interval, updating the
/// depth/active-task gauges from [`taskqueue_group::GroupManager`].
async fn gauge_refresh_loop(ctx: EngineContext, metrics: Arc<EngineMetrics>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for queue in &ctx.config().queues {
                    let groups = match ctx.groups().list_groups_for_queue(&queue.name).await {
                        Ok(groups) => groups,
                        Err(err) => {
                            warn!(queue = %queue.name, %err, "failed to list groups for metrics refresh");
                            continue;
                        }
                    };
                    for group in groups {
                        let depth = ctx.groups().order_len(&group).await.unwrap_or(0);
                        let active = ctx.groups().processing_count(&group).await.unwrap_or(0);
                        metrics
                            .queue_depth
                            .with_label_values(&[queue.name.as_str(), group.as_str()])
                            .set(depth as i64);
                        metrics
                            .active_tasks
                            .with_label_values(&[queue.name.as_str(), group.as_str()])
                            .set(active as i64);
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Fan lifecycle events into the counter series. Event kinds don't carry
/// a queue name, only a group, so the queue label falls back to the
/// group's own queue lookup; best-effort like the rest of the event bus.
async fn event_counter_loop(ctx: EngineContext, metrics: Arc<EngineMetrics>, kind: EventKind, shutdown: CancellationToken) {
    let mut rx = match ctx.events().subscribe(kind).await {
        Ok(rx) => rx,
        Err(err) => {
            warn!(%err, ?kind, "failed to subscribe for metrics counters");
            return;
        }
    };

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let queue = match &event.group_name {
                    Some(group) => ctx.groups().queue_of(group).await.ok().flatten().unwrap_or_default(),
                    None => String::new(),
                };
                let counter = match kind {
                    EventKind::StatusChange => &metrics.claims_total,
                    EventKind::TaskCompleted => &metrics.completions_total,
                    EventKind::TaskFailed => &metrics.failures_total,
                    EventKind::RetryAttempt => &metrics.retries_total,
                    _ => continue,
                };
                counter.with_label_values(&[queue.as_str()]).inc();
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Start the `/metrics` HTTP server and its background collectors as one
/// cancellable task, returning `Ok(())` immediately if metrics export is
/// disabled.
pub fn spawn_metrics_service(
    ctx: EngineContext,
    settings: MetricsSettings,
    shutdown: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        if !settings.enabled {
            return Ok(());
        }

        let metrics = Arc::new(EngineMetrics::new()?);

        tokio::spawn(gauge_refresh_loop(ctx.clone(), metrics.clone(), shutdown.clone()));
        for kind in [EventKind::StatusChange, EventKind::TaskCompleted, EventKind::TaskFailed, EventKind::RetryAttempt] {
            tokio::spawn(event_counter_loop(ctx.clone(), metrics.clone(), kind, shutdown.clone()));
        }

        let app = Router::new().route("/metrics", get(metrics_handler)).with_state(metrics);
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(port = settings.port, "metrics server started");

        let shutdown_signal = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal.cancelled().await;
                info!("shutting down metrics server");
            })
            .await?;

        Ok(())
    })
}
