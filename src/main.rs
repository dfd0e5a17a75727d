use std::sync::Arc;

use futures::StreamExt;
use tracing::info;

use slotguard::config::EngineConfig;
use slotguard::engine::{Engine, Ports};
use slotguard::notify::NotifyHub;
use slotguard::ports::{InstantGateways, SystemClock};
use slotguard::reaper::{spawn_sweepers, ChannelScheduler};
use slotguard::store::InMemoryRepository;

/// Reference wiring of the engine with in-process adapters, both sweepers,
/// and an event log. The in-memory store starts empty and nothing here fills
/// it; embedding hosts build `Ports` around their own `Repository` and call
/// `spawn_sweepers` the same way.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    slotguard::observability::init_tracing();

    let config = EngineConfig::from_env();
    slotguard::observability::init(config.metrics_port)?;

    let instant_gateways = std::env::var("SLOTGUARD_INSTANT_GATEWAYS").unwrap_or_default();
    let gateways = InstantGateways::new(
        instant_gateways
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty()),
    );

    let hub = Arc::new(NotifyHub::new());
    let (scheduler, sweeps) = ChannelScheduler::new();
    let ports = Ports {
        repository: Arc::new(InMemoryRepository::new()),
        clock: Arc::new(SystemClock),
        scheduler: Arc::new(scheduler),
        events: hub.clone(),
        gateways: Arc::new(gateways),
    };
    let engine = Arc::new(Engine::new(ports, config.clone()));

    info!("slotguard worker started (in-memory store, empty)");
    info!("  pending_payment_minutes: {}", config.pending_payment_minutes);
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  instant gateways: {}", if instant_gateways.is_empty() { "none" } else { instant_gateways.as_str() });

    let sweepers = spawn_sweepers(engine.clone(), sweeps);

    let events = hub.stream_all();
    tokio::spawn(async move {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            info!(event = %event.name(), entity = %event.entity_id(), "status event");
        }
    });

    tokio::signal::ctrl_c().await?;
    for task in sweepers {
        task.abort();
    }
    info!("slotguard stopped");
    Ok(())
}
