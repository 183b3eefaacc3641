//! Command line and environment configuration for the sink binary

use crate::coordinator::{CoordinatorConfig, InitialPosition};
use crate::error::{ProcessorError, Result};
use crate::monitoring::MonitoringConfig;
use crate::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use clap::Parser;
use std::time::Duration;
use tracing::info;

/// Largest page `GetRecords` accepts
const MAX_BATCH_SIZE: i32 = 10_000;

#[derive(Debug, Clone, Parser)]
#[command(name = "kinesis-event-sink")]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    /// AWS region used by every client
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Endpoint override for local emulators; implies static test credentials
    #[arg(long, env = "AWS_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "KINESIS_STREAM_NAME")]
    pub stream_name: String,

    /// Consumer application name, also used as the checkpoint table name
    #[arg(long, env = "KINESIS_APPLICATION_NAME")]
    pub application_name: String,

    /// Table receiving normalized events
    #[arg(long, env = "DYNAMODB_TABLE_NAME")]
    pub table_name: String,

    /// TRIM_HORIZON, LATEST or AT_TIMESTAMP:<rfc3339>
    #[arg(long, env = "KINESIS_INITIAL_POSITION", default_value = "LATEST")]
    pub initial_position: InitialPosition,

    #[arg(long, env = "KINESIS_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: i32,

    /// Pause between reads of one shard, in milliseconds
    #[arg(long, env = "KINESIS_IDLE_TIME_MS", default_value_t = 1000)]
    pub idle_time_ms: u64,

    #[arg(long, env = "KINESIS_SHARD_REFRESH_SECS", default_value_t = 60)]
    pub shard_refresh_secs: u64,

    #[arg(long, env = "KINESIS_MAX_CONCURRENT_SHARDS")]
    pub max_concurrent_shards: Option<u32>,

    /// Interval for logging per-shard metrics; 0 disables monitoring
    #[arg(long, env = "METRICS_INTERVAL_SECS", default_value_t = 60)]
    pub metrics_interval_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        for (flag, value) in [
            ("region", &self.region),
            ("stream-name", &self.stream_name),
            ("application-name", &self.application_name),
            ("table-name", &self.table_name),
        ] {
            if value.trim().is_empty() {
                return Err(ProcessorError::ConfigError(format!(
                    "--{} must not be empty",
                    flag
                )));
            }
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ProcessorError::ConfigError(format!(
                "--batch-size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }

        if self.shard_refresh_secs == 0 {
            return Err(ProcessorError::ConfigError(
                "--shard-refresh-secs must be positive".to_string(),
            ));
        }

        if self.max_concurrent_shards == Some(0) {
            return Err(ProcessorError::ConfigError(
                "--max-concurrent-shards must be positive when set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            stream_name: self.stream_name.clone(),
            batch_size: self.batch_size,
            idle_time_between_reads: Duration::from_millis(self.idle_time_ms),
            shard_refresh_interval: Duration::from_secs(self.shard_refresh_secs),
            max_concurrent_shards: self.max_concurrent_shards,
            initial_position: self.initial_position.clone(),
            retry: RetryConfig::default(),
        }
    }

    pub fn monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            enabled: self.metrics_interval_secs > 0,
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
            ..MonitoringConfig::default()
        }
    }
}

/// SDK clients shared by the whole process
#[derive(Debug, Clone)]
pub struct AwsClients {
    pub kinesis: aws_sdk_kinesis::Client,
    #[cfg(feature = "dynamodb-store")]
    pub dynamodb: aws_sdk_dynamodb::Client,
}

impl AwsClients {
    pub async fn from_config(config: &AppConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint {
            info!(endpoint = %endpoint, "Using endpoint override with static credentials");
            loader = loader
                .endpoint_url(endpoint)
                .credentials_provider(Credentials::new("test", "test", None, None, "static"));
        }

        let shared = loader.load().await;

        Self {
            kinesis: aws_sdk_kinesis::Client::new(&shared),
            #[cfg(feature = "dynamodb-store")]
            dynamodb: aws_sdk_dynamodb::Client::new(&shared),
        }
    }
}
