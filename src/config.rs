//! Configuration management for the fraud triage pipeline

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub streams: StreamsConfig,
    pub rules: RulesConfig,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// Redis connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis server URL
    pub url: String,
}

/// Stream names and consumer identity
#[derive(Debug, Clone, Deserialize)]
pub struct StreamsConfig {
    /// Inbound transaction stream
    pub transaction_stream: String,
    /// Consumer group on the inbound stream
    pub consumer_group: String,
    /// This worker's consumer name within the group
    pub consumer_name: String,
    /// Outbound stream feeding the AI investigator
    pub ai_queue_stream: String,
}

/// Rule engine thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// Risk score below which a transaction is auto-approved
    pub approve_below: f64,
    /// Risk score above which a transaction is auto-blocked
    pub block_above: f64,
    /// Block deposits larger than this multiple of declared monthly income
    pub income_multiple: f64,
    /// Sliding window for the rapid deposit/withdrawal check, in seconds
    #[serde(default = "default_velocity_window_secs")]
    pub velocity_window_secs: u64,
}

fn default_velocity_window_secs() -> u64 {
    300
}

/// Triage loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum records pulled per tick
    pub batch_size: usize,
    /// Tick cadence in milliseconds
    pub tick_interval_ms: u64,
    /// Deliveries after which a poison record is parked and acked
    pub poison_retry_limit: u64,
    /// Bound on individual store/enqueue operations, in milliseconds
    pub op_timeout_ms: u64,
    /// Server-side block timeout on stream reads, in milliseconds
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,
    /// Per-subscriber push buffer, in frames
    #[serde(default = "default_push_buffer")]
    pub push_buffer: usize,
}

fn default_read_block_ms() -> u64 {
    50
}

fn default_push_buffer() -> usize {
    256
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Listen address, e.g. `0.0.0.0:8080`
    pub bind_addr: String,
    /// Stats broadcast interval in milliseconds
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

fn default_stats_interval_ms() -> u64 {
    1000
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            streams: StreamsConfig::default(),
            rules: RulesConfig::default(),
            pipeline: PipelineConfig::default(),
            http: HttpConfig {
                bind_addr: "0.0.0.0:8080".to_string(),
                stats_interval_ms: 1000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            transaction_stream: "deriv:transactions".to_string(),
            consumer_group: "fraud-detector1".to_string(),
            consumer_name: "processor-1".to_string(),
            ai_queue_stream: "fraud:investigation:queue".to_string(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            approve_below: 0.15,
            block_above: 0.75,
            income_multiple: 15.0,
            velocity_window_secs: 300,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            tick_interval_ms: 100,
            poison_retry_limit: 5,
            op_timeout_ms: 1000,
            read_block_ms: 50,
            push_buffer: 256,
        }
    }
}
