//! Polling coordinator driving one shard processor per shard
//!
//! The coordinator periodically lists the stream's shards and runs a worker
//! task for every shard that is not yet running or finished. Child shards
//! wait until their listed parents have been read to the end. Each worker:
//!
//! - loads the shard checkpoint and starts after it, or at the configured
//!   [`InitialPosition`] when there is none
//! - polls `GetRecords`, handing every non-empty page to its processor with a
//!   checkpointer positioned at the last record of the page
//! - retries throttling and transport failures, re-acquires expired
//!   iterators, and gives the shard up on any other read failure; the shard
//!   is picked up again from its checkpoint on a later refresh
//! - on shutdown checkpoints the last delivered record and stops
//!
//! The coordinator only owns the polling and ownership logic; everything
//! record-related happens behind [`ShardRecordProcessor`].

use crate::client::{KinesisClientError, KinesisClientTrait, RecordsPage, StartingPosition};
use crate::error::{CheckpointError, ProcessorError, Result};
use crate::factory::ShardRecordProcessorFactory;
use crate::processor::ShardRecordProcessor;
use crate::retry::{wait_for_shutdown, RetryConfig, RetryError, RetryHandle};
use crate::store::{CheckpointStore, ShardCheckpoint, StoreCheckpointer};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Where to start reading a shard that has no checkpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InitialPosition {
    /// Start from the oldest available record
    TrimHorizon,
    /// Start from records written after the worker attaches
    #[default]
    Latest,
    /// Start from the first record at or after a timestamp
    AtTimestamp(DateTime<Utc>),
}

impl InitialPosition {
    pub fn starting_position(&self) -> StartingPosition {
        match self {
            InitialPosition::TrimHorizon => StartingPosition::TrimHorizon,
            InitialPosition::Latest => StartingPosition::Latest,
            InitialPosition::AtTimestamp(ts) => StartingPosition::AtTimestamp(*ts),
        }
    }
}

/// Accepts `TRIM_HORIZON`, `LATEST` or `AT_TIMESTAMP:<rfc3339>`, case-insensitively
impl FromStr for InitialPosition {
    type Err = ProcessorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("TRIM_HORIZON") {
            return Ok(InitialPosition::TrimHorizon);
        }
        if s.eq_ignore_ascii_case("LATEST") {
            return Ok(InitialPosition::Latest);
        }

        match s.split_once(':') {
            Some((kind, ts)) if kind.eq_ignore_ascii_case("AT_TIMESTAMP") => {
                DateTime::parse_from_rfc3339(ts)
                    .map(|ts| InitialPosition::AtTimestamp(ts.with_timezone(&Utc)))
                    .map_err(|e| {
                        ProcessorError::ConfigError(format!("invalid timestamp {:?}: {}", ts, e))
                    })
            }
            _ => Err(ProcessorError::ConfigError(format!(
                "unknown initial position {:?}",
                s
            ))),
        }
    }
}

/// Configuration for the polling coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub stream_name: String,
    /// Upper bound on records per `GetRecords` call
    pub batch_size: i32,
    /// Pause after every read
    pub idle_time_between_reads: Duration,
    /// How often the shard list is refreshed
    pub shard_refresh_interval: Duration,
    /// Maximum number of shards read concurrently (None for unbounded)
    pub max_concurrent_shards: Option<u32>,
    pub initial_position: InitialPosition,
    /// Retry policy for stream reads
    pub retry: RetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            batch_size: 100,
            idle_time_between_reads: Duration::from_secs(1),
            shard_refresh_interval: Duration::from_secs(60),
            max_concurrent_shards: None,
            initial_position: InitialPosition::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// How a shard worker finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardExit {
    /// The shard was read to its end
    Completed,
    /// Stopped on the shutdown signal
    Shutdown,
    /// Gave the shard up after an unrecoverable read failure
    LeaseLost,
}

struct WorkerContext<F, C, S> {
    config: CoordinatorConfig,
    factory: F,
    client: C,
    store: Arc<S>,
}

/// Runs shard workers for a single stream until shutdown
pub struct PollingCoordinator<F, C, S>
where
    F: ShardRecordProcessorFactory + 'static,
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    context: Arc<WorkerContext<F, C, S>>,
}

impl<F, C, S> PollingCoordinator<F, C, S>
where
    F: ShardRecordProcessorFactory + 'static,
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    pub fn new(config: CoordinatorConfig, factory: F, client: C, store: S) -> Self {
        Self {
            context: Arc::new(WorkerContext {
                config,
                factory,
                client,
                store: Arc::new(store),
            }),
        }
    }

    /// Poll the stream until `shutdown` flips to true, then wait for every
    /// worker to checkpoint and stop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = &self.context.config;
        info!(stream = %config.stream_name, "Starting polling coordinator");

        let semaphore = config
            .max_concurrent_shards
            .map(|limit| Arc::new(Semaphore::new(limit as usize)));

        let mut workers: HashMap<String, JoinHandle<Result<ShardExit>>> = HashMap::new();
        let mut completed: HashSet<String> = HashSet::new();

        let mut ticker = interval(config.shard_refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {}
            }

            Self::reap_finished(&mut workers, &mut completed).await;

            if let Err(e) = self
                .refresh_shards(&mut workers, &mut completed, &semaphore, &shutdown)
                .await
            {
                warn!(error = %e, "Shard refresh failed, retrying on next interval");
            }
        }

        let exits = join_all(
            workers
                .drain()
                .map(|(shard_id, handle)| async move { (shard_id, handle.await) }),
        )
        .await;
        for (shard_id, result) in exits {
            Self::log_worker_exit(&shard_id, result);
        }

        info!("Coordinator shutdown complete");
        Ok(())
    }

    async fn refresh_shards(
        &self,
        workers: &mut HashMap<String, JoinHandle<Result<ShardExit>>>,
        completed: &mut HashSet<String>,
        semaphore: &Option<Arc<Semaphore>>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let ctx = &self.context;
        let shards = ctx
            .client
            .list_shards(&ctx.config.stream_name)
            .await
            .map_err(|e| ProcessorError::ShardRefreshError(e.to_string()))?;

        let listed: HashSet<&str> = shards.iter().map(|s| s.shard_id.as_str()).collect();

        for shard in &shards {
            let shard_id = &shard.shard_id;
            if workers.contains_key(shard_id) || self.is_complete(shard_id, completed).await {
                continue;
            }

            let mut waiting_on = None;
            for parent in shard.parents().filter(|p| listed.contains(p)) {
                if !self.is_complete(parent, completed).await {
                    waiting_on = Some(parent);
                    break;
                }
            }
            if let Some(parent) = waiting_on {
                debug!(
                    shard_id = %shard_id,
                    parent_shard_id = %parent,
                    "Waiting for parent shard to finish"
                );
                continue;
            }

            let ctx = self.context.clone();
            let semaphore = semaphore.clone();
            let shutdown_rx = shutdown.clone();
            let worker_shard_id = shard_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(sem) => Some(sem.acquire_owned().await?),
                    None => None,
                };
                ctx.process_shard(&worker_shard_id, shutdown_rx).await
            });

            debug!(shard_id = %shard_id, "Spawned shard worker");
            workers.insert(shard_id.clone(), handle);
        }

        Ok(())
    }

    /// True once the shard has been read to its end, here or by an earlier run
    async fn is_complete(&self, shard_id: &str, completed: &mut HashSet<String>) -> bool {
        if completed.contains(shard_id) {
            return true;
        }

        match self.context.store.get_checkpoint(shard_id).await {
            Ok(Some(checkpoint)) if checkpoint.is_shard_end() => {
                completed.insert(shard_id.to_string());
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(shard_id = %shard_id, error = %e, "Failed to read checkpoint");
                false
            }
        }
    }

    async fn reap_finished(
        workers: &mut HashMap<String, JoinHandle<Result<ShardExit>>>,
        completed: &mut HashSet<String>,
    ) {
        let finished: Vec<String> = workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(shard_id, _)| shard_id.clone())
            .collect();

        for shard_id in finished {
            if let Some(handle) = workers.remove(&shard_id) {
                let result = handle.await;
                if matches!(result, Ok(Ok(ShardExit::Completed))) {
                    completed.insert(shard_id.clone());
                }
                Self::log_worker_exit(&shard_id, result);
            }
        }
    }

    fn log_worker_exit(
        shard_id: &str,
        result: std::result::Result<Result<ShardExit>, tokio::task::JoinError>,
    ) {
        match result {
            Ok(Ok(exit)) => debug!(shard_id = %shard_id, exit = ?exit, "Shard worker finished"),
            Ok(Err(e)) => error!(shard_id = %shard_id, error = %e, "Shard worker failed"),
            Err(e) => error!(shard_id = %shard_id, error = %e, "Shard worker aborted"),
        }
    }
}

impl<F, C, S> WorkerContext<F, C, S>
where
    F: ShardRecordProcessorFactory + 'static,
    C: KinesisClientTrait + 'static,
    S: CheckpointStore + 'static,
{
    async fn process_shard(
        &self,
        shard_id: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ShardExit> {
        if *shutdown.borrow() {
            info!(shard_id = %shard_id, "Shutdown signal received before processing started");
            return Ok(ShardExit::Shutdown);
        }

        let checkpoint = self
            .store
            .get_checkpoint(shard_id)
            .await
            .map_err(|e| CheckpointError::RetrieveFailed(format!("{:#}", e)))?;

        let start = match &checkpoint {
            Some(ShardCheckpoint::ShardEnd) => {
                info!(shard_id = %shard_id, "Shard already fully processed");
                return Ok(ShardExit::Completed);
            }
            Some(ShardCheckpoint::Sequence(sequence)) => {
                info!(shard_id = %shard_id, checkpoint = %sequence, "Resuming from checkpoint");
                StartingPosition::AfterSequenceNumber(sequence.clone())
            }
            None => {
                info!(
                    shard_id = %shard_id,
                    position = ?self.config.initial_position,
                    "No existing checkpoint found"
                );
                self.config.initial_position.starting_position()
            }
        };
        let mut last_sequence = checkpoint.and_then(|cp| cp.sequence_number().map(String::from));

        let mut processor = self.factory.create_processor();
        processor.initialize(shard_id).await?;

        let mut iterator = match self.acquire_iterator(shard_id, &start, &shutdown).await {
            Ok(iterator) => iterator,
            Err(ProcessorError::Shutdown) => {
                return self.stop(&mut processor, shard_id, last_sequence).await
            }
            Err(e) => return self.relinquish(&mut processor, shard_id, e).await,
        };

        loop {
            match self.read_page(&iterator, &shutdown).await {
                Ok(page) => {
                    debug!(
                        shard_id = %shard_id,
                        records = page.records.len(),
                        millis_behind_latest = ?page.millis_behind_latest,
                        "Read page"
                    );

                    if let Some(last) = page.records.last() {
                        let target = last.sequence_number.clone();
                        let checkpointer = StoreCheckpointer::new(
                            self.store.clone(),
                            shard_id,
                            Some(ShardCheckpoint::Sequence(target.clone())),
                        );
                        processor.process_batch(&page.records, &checkpointer).await?;
                        last_sequence = Some(target);
                    }

                    match page.next_iterator {
                        Some(next) => iterator = next,
                        None => {
                            let checkpointer = StoreCheckpointer::new(
                                self.store.clone(),
                                shard_id,
                                Some(ShardCheckpoint::ShardEnd),
                            );
                            processor.shard_ended(&checkpointer).await?;
                            info!(shard_id = %shard_id, "Completed shard processing");
                            return Ok(ShardExit::Completed);
                        }
                    }
                }
                Err(RetryError::Interrupted) => {
                    return self.stop(&mut processor, shard_id, last_sequence).await
                }
                Err(e) => match e.into_inner() {
                    Some(KinesisClientError::ExpiredIterator) => {
                        warn!(shard_id = %shard_id, "Iterator expired, requesting a new one");
                        let position = last_sequence
                            .clone()
                            .map(StartingPosition::AfterSequenceNumber)
                            .unwrap_or_else(|| start.clone());

                        iterator = match self.acquire_iterator(shard_id, &position, &shutdown).await
                        {
                            Ok(iterator) => iterator,
                            Err(ProcessorError::Shutdown) => {
                                return self.stop(&mut processor, shard_id, last_sequence).await
                            }
                            Err(e) => return self.relinquish(&mut processor, shard_id, e).await,
                        };
                        continue;
                    }
                    Some(err) => {
                        let e = ProcessorError::GetRecordsFailed(err.to_string());
                        return self.relinquish(&mut processor, shard_id, e).await;
                    }
                    None => return self.stop(&mut processor, shard_id, last_sequence).await,
                },
            }

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    return self.stop(&mut processor, shard_id, last_sequence).await;
                }
                _ = tokio::time::sleep(self.config.idle_time_between_reads) => {}
            }
        }
    }

    async fn acquire_iterator(
        &self,
        shard_id: &str,
        position: &StartingPosition,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<String> {
        let mut retry = RetryHandle::new(self.config.retry.clone()).with_shutdown(shutdown.clone());

        let iterator = retry
            .retry_if(
                || {
                    self.client
                        .get_shard_iterator(&self.config.stream_name, shard_id, position)
                },
                KinesisClientError::is_retryable,
            )
            .await
            .map_err(|e| match e {
                RetryError::Interrupted => ProcessorError::Shutdown,
                other => ProcessorError::GetIteratorFailed(other.to_string()),
            })?;

        debug!(shard_id = %shard_id, position = ?position, "Acquired shard iterator");
        Ok(iterator)
    }

    async fn read_page(
        &self,
        iterator: &str,
        shutdown: &watch::Receiver<bool>,
    ) -> std::result::Result<RecordsPage, RetryError<KinesisClientError>> {
        let mut retry = RetryHandle::new(self.config.retry.clone()).with_shutdown(shutdown.clone());

        retry
            .retry_if(
                || self.client.get_records(iterator, self.config.batch_size),
                KinesisClientError::is_retryable,
            )
            .await
    }

    async fn stop(
        &self,
        processor: &mut F::Processor,
        shard_id: &str,
        last_sequence: Option<String>,
    ) -> Result<ShardExit> {
        info!(shard_id = %shard_id, "Shutdown received, stopping shard worker");
        let checkpointer = StoreCheckpointer::new(
            self.store.clone(),
            shard_id,
            last_sequence.map(ShardCheckpoint::Sequence),
        );
        processor.shutdown_requested(&checkpointer).await?;
        Ok(ShardExit::Shutdown)
    }

    async fn relinquish(
        &self,
        processor: &mut F::Processor,
        shard_id: &str,
        error: ProcessorError,
    ) -> Result<ShardExit> {
        error!(
            shard_id = %shard_id,
            error = %error,
            "Unrecoverable read failure, giving up shard"
        );
        processor.lease_lost().await?;
        Ok(ShardExit::LeaseLost)
    }
}
