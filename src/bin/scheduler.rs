use anyhow::Result;
use fleet_core::{
    clients::{ActivityClient, AgentClient},
    config::{Config, StoreBackend},
    events::EventPublisher,
    scheduler::{ScheduleExecutor, SchedulerApi, SchedulerService},
    store::{LockStore, MemoryStore, PubSubStore, RedisStore},
};
use std::sync::Arc;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Fleet Core scheduler service");

    let config = Config::load()?;

    let memory = Arc::new(MemoryStore::new());
    let (locks, pubsub): (Arc<dyn LockStore>, Arc<dyn PubSubStore>) = match config.store.backend {
        StoreBackend::Redis => {
            info!("Using Redis lock and pub/sub primitives at {}", config.store.redis_url);
            let redis = Arc::new(RedisStore::connect(&config.store.redis_url).await?);
            (redis.clone(), redis)
        }
        StoreBackend::Memory => (memory.clone(), memory.clone()),
    };

    let agent_client = AgentClient::new(config.runtime.clone())?;
    let activity = ActivityClient::new(config.internal_api.clone());
    let events = EventPublisher::new(pubsub, config.scheduler.publish_events);

    let executor = Arc::new(ScheduleExecutor::new(
        memory.clone(),
        locks,
        agent_client,
        activity,
        events,
        config.scheduler.clone(),
    ));
    let service = Arc::new(SchedulerService::new(
        memory,
        executor,
        config.scheduler.clone(),
    ));
    let api = SchedulerApi::new(config.api.host.clone(), config.scheduler.port, service.clone());

    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                error!("Scheduler loop failed: {e}");
            }
        }
        result = api.run() => {
            if let Err(e) = result {
                error!("Scheduler API failed: {e}");
            }
        }
    }

    Ok(())
}
