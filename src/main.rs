use anyhow::Result;
use fleet_core::{
    api::{dispatch::MessageDispatcher, ApiServer},
    clients::{ActivityClient, AgentClient},
    config::{Config, StoreBackend},
    lifecycle::ContainerManager,
    queue::ExecutionQueue,
    store::{MemoryStore, QueueStore, RedisStore},
};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Fleet Core control-plane server");

    let config = Config::load()?;

    let memory = Arc::new(MemoryStore::new());
    let queue_store: Arc<dyn QueueStore> = match config.store.backend {
        StoreBackend::Redis => {
            info!("Using Redis queue primitives at {}", config.store.redis_url);
            Arc::new(RedisStore::connect(&config.store.redis_url).await?)
        }
        StoreBackend::Memory => memory.clone(),
    };

    let queue = ExecutionQueue::new(queue_store, config.queue.clone());
    let agent_client = AgentClient::new(config.runtime.clone())?;
    let activity = ActivityClient::new(config.internal_api.clone());
    let dispatcher = MessageDispatcher::new(
        queue.clone(),
        agent_client,
        activity,
        config.scheduler.default_timeout_secs,
    );

    let mut api_server = ApiServer::new(config.clone(), queue, dispatcher);
    match ContainerManager::new(memory, config.docker.clone()) {
        Ok(lifecycle) => {
            api_server = api_server.with_lifecycle(Arc::new(lifecycle));
        }
        Err(e) => {
            warn!("Docker unavailable, container lifecycle endpoints disabled: {e}");
        }
    }

    api_server.run().await?;
    Ok(())
}
