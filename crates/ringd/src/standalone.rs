//! Standalone mode: master, simulated agents, and all background loops in
//! one process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ringleader_agent::{AgentConfig, DeviceAgent, TaskHandler};
use ringleader_channel::ChannelManager;
use ringleader_registry::DeviceRegistry;
use ringleader_rings::RingBalancer;
use ringleader_rollout::{threshold_gate, DeploymentScheduler};
use ringleader_scheduler::TaskScheduler;
use ringleader_state::{GatingFactors, RingSpec, StateStore};

use crate::config::OrchestratorConfig;

/// Seed the ring table and default gating template on first run.
fn seed_state(store: &StateStore) -> anyhow::Result<()> {
    if store.list_rings()?.is_empty() {
        let rings = [
            (0u8, "Ring 0 - Canary (Test Bed)",
             "Test devices for initial validation. Non-production systems only."),
            (1, "Ring 1 - Low Risk Devices",
             "Devices with stable configurations, recent successful deployment history, \
              low risk scores (71-100), standard configurations."),
            (2, "Ring 2 - High Risk Devices",
             "Business-critical devices with moderate to high resource usage, \
              risk scores (31-70), production systems."),
            (3, "Ring 3 - VIP Devices",
             "Executive and leadership devices, highest stability requirements, \
              risk scores (0-30). Deploy only after all other rings succeed."),
        ];
        for (ring_id, name, criteria) in rings {
            store.put_ring(&RingSpec {
                ring_id,
                name: name.to_string(),
                criteria: criteria.to_string(),
            })?;
        }
        info!("default rings seeded");
    }
    if store.get_gating("default")?.is_none() {
        store.put_gating("default", &GatingFactors::default())?;
        info!("default gating factors seeded");
    }
    Ok(())
}

fn echo_handler() -> TaskHandler {
    Box::new(|params| Box::pin(async move { Ok(json!({ "echo": params })) }))
}

fn compute_handler() -> TaskHandler {
    Box::new(|params| {
        Box::pin(async move {
            let values = params
                .get("values")
                .and_then(|v| v.as_array())
                .ok_or_else(|| "missing values array".to_string())?;
            let sum: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
            // Simulate some work.
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!({ "sum": sum }))
        })
    })
}

fn spawn_agents(
    count: usize,
    heartbeat_interval: Duration,
    channels: &ChannelManager,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(count);
    for i in 1..=count {
        let mut agent = DeviceAgent::new(&format!("agent-{i}"), "master", channels.clone());
        agent.register_handler("echo", echo_handler());
        agent.register_handler("compute", compute_handler());
        let agent = Arc::new(agent.with_config(AgentConfig {
            heartbeat_interval,
            ..AgentConfig::default()
        }));
        handles.push(tokio::spawn(agent.run(shutdown.clone())));
    }
    info!(count, "simulated agents spawned");
    handles
}

/// Submits demo work and drives one rollout once the fleet has settled.
async fn demo_driver(
    scheduler: Arc<TaskScheduler>,
    balancer: Arc<RingBalancer>,
    rollout: Arc<DeploymentScheduler>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Let agents register and heartbeat once.
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(10)) => {}
        _ = shutdown.changed() => return,
    }

    balancer.rebalance();

    for i in 0..5 {
        scheduler.submit("echo", json!({ "n": i }), 5);
        scheduler.submit("compute", json!({ "values": [i, i + 1, i + 2] }), 1);
    }

    match rollout.create_deployment("standalone rollout", None) {
        Ok(deployment) => {
            if let Err(e) = rollout.start(&deployment.id) {
                warn!(error = %e, "demo rollout failed to start");
            }
        }
        Err(e) => warn!(error = %e, "demo deployment creation failed"),
    }

    // Periodic cluster summary until shutdown.
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = scheduler.cluster_status();
                info!(
                    agents = status.total_agents,
                    busy = status.busy_agents,
                    pending = status.pending_tasks,
                    completed = status.completed_tasks,
                    failed = status.failed_tasks,
                    "cluster status"
                );
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

pub async fn run(config: OrchestratorConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("ringleader daemon starting in standalone mode");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("ringleader.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    seed_state(&store)?;

    let channels = ChannelManager::with_capacity(config.queue_capacity);
    let registry = Arc::new(DeviceRegistry::new(store.clone())?);
    info!("device registry initialized");

    let scheduler = Arc::new(TaskScheduler::new(
        channels.clone(),
        Arc::clone(&registry),
        config.scheduler_config(),
    ));
    info!("task scheduler initialized");

    let balancer = Arc::new(RingBalancer::new(Arc::clone(&registry), channels.clone()));
    info!("ring balancer initialized");

    let rollout = Arc::new(DeploymentScheduler::new(
        store.clone(),
        Arc::clone(&registry),
        threshold_gate(),
        config.rollout_config(),
    ));
    info!(dwell_secs = config.dwell_secs, "deployment scheduler initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let message_handle = tokio::spawn(Arc::clone(&scheduler).run_message_loop(shutdown_rx.clone()));
    let monitor_handle = tokio::spawn(Arc::clone(&scheduler).run_monitors(shutdown_rx.clone()));
    let rebalance_handle = tokio::spawn(
        Arc::clone(&balancer).run(config.rebalance_interval(), shutdown_rx.clone()),
    );

    let agent_handles = spawn_agents(
        config.agents,
        config.heartbeat_interval(),
        &channels,
        &shutdown_rx,
    );

    let demo_handle = tokio::spawn(demo_driver(
        Arc::clone(&scheduler),
        Arc::clone(&balancer),
        Arc::clone(&rollout),
        shutdown_rx.clone(),
    ));

    // ── Graceful shutdown on Ctrl-C ────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scheduler.shutdown_agents("daemon shutting down");
    let _ = shutdown_tx.send(true);
    // In-flight deployments record their Stopped statuses before we exit.
    rollout.stop_all().await;

    for handle in agent_handles {
        let _ = handle.await;
    }
    let _ = demo_handle.await;
    let _ = rebalance_handle.await;
    let _ = monitor_handle.await;
    let _ = message_handle.await;

    info!("ringleader daemon stopped");
    Ok(())
}
