use crate::coordinator::{CoordinatorConfig, InitialPosition, PollingCoordinator};
use crate::error::Result;
use crate::factory::EventProcessorFactory;
use crate::retry::RetryConfig;
use crate::test::mocks::{MockCheckpointStore, MockEventStore, MockKinesisClient};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive("kinesis_event_sink=debug".parse().expect("valid directive")),
            )
            .with_test_writer()
            .with_thread_ids(true)
            .with_line_number(true)
            .try_init()
            .ok();
    });
}

pub fn create_test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        stream_name: "test-stream".to_string(),
        batch_size: 100,
        idle_time_between_reads: Duration::from_millis(5),
        shard_refresh_interval: Duration::from_millis(50),
        max_concurrent_shards: None,
        initial_position: InitialPosition::TrimHorizon,
        retry: RetryConfig {
            max_retries: Some(3),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_factor: 0.0,
        },
    }
}

/// A running coordinator wired to mocks
pub struct TestContext {
    pub client: MockKinesisClient,
    pub events: Arc<MockEventStore>,
    pub checkpoints: MockCheckpointStore,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

impl TestContext {
    pub fn start(
        config: CoordinatorConfig,
        client: MockKinesisClient,
        checkpoints: MockCheckpointStore,
    ) -> Self {
        init_logging();

        let events = Arc::new(MockEventStore::new());
        let factory = EventProcessorFactory::new(events.clone());
        let coordinator =
            PollingCoordinator::new(config, factory, client.clone(), checkpoints.clone());

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { coordinator.run(rx).await });

        Self {
            client,
            events,
            checkpoints,
            shutdown,
            handle,
        }
    }

    /// Signal shutdown and wait for every worker to stop
    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.send(true)?;
        tokio::time::timeout(Duration::from_secs(5), self.handle).await???;
        Ok(())
    }
}
