//! Service configuration
//!
//! Sources, highest priority first:
//! 1. Command-line arguments (`--address`)
//! 2. Environment variables (deployment names such as `SERV_QUEUES`, `POSTGRES_HOST`)
//! 3. TOML configuration file (`--config`)
//! 4. Compiled defaults
//!
//! Everything is read once at start-up and passed down by value.

use serde::Deserialize;
use siren_common::config::{available_cores, env_flag, env_override, env_value, load_toml_or_default};
use siren_common::LoggingConfig;
use std::path::{Path, PathBuf};

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub thread_pool: ThreadPoolConfig,
    pub postgres: PostgresConfig,
    pub elastic: ElasticConfig,
    pub matching: MatchingConfig,
    pub ingest: IngestConfig,
    pub metadata: MetadataConfig,
    pub core: CoreConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load the TOML file (missing file = defaults), then apply environment overrides.
    pub fn load(path: &Path) -> siren_common::Result<Self> {
        let mut config: ServiceConfig = load_toml_or_default(path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.server.apply_env();
        self.thread_pool.apply_env();
        self.postgres.apply_env();
        self.elastic.apply_env();
        self.matching.apply_env();
        self.ingest.apply_env();
        self.metadata.apply_env();
        self.core.apply_env();
        if let Some(level) = env_value::<String>("SIREN_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

/// RPC server and gateway
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Gateway listen address
    pub address: String,
    /// Completion queues
    pub queues: usize,
    /// Servicer threads per completion queue
    pub threads_per_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            queues: available_cores(),
            threads_per_queue: 1,
        }
    }
}

impl ServerConfig {
    fn apply_env(&mut self) {
        env_override("SERV_ADDRESS", &mut self.address);
        env_override("SERV_QUEUES", &mut self.queues);
        env_override("SERV_THREADS_PER_QUEUE", &mut self.threads_per_queue);
    }
}

/// Process-wide worker pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub queues: usize,
    pub threads_per_queue: usize,
    /// Drain queued work before stopping
    pub graceful: bool,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            queues: available_cores(),
            threads_per_queue: available_cores(),
            graceful: true,
        }
    }
}

impl ThreadPoolConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        env_override("THREAD_POOL_QUEUES", &mut self.queues);
        env_override("TP_THREADS_PER_QUEUE", &mut self.threads_per_queue);
    }
}

/// Primary row store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            db_name: "fingerprint".to_string(),
            pool_size: 50,
        }
    }
}

impl PostgresConfig {
    fn apply_env(&mut self) {
        env_override("POSTGRES_HOST", &mut self.host);
        env_override("POSTGRES_PORT", &mut self.port);
        env_override("POSTGRES_USER", &mut self.user);
        env_override("POSTGRES_PASSWORD", &mut self.password);
        env_override("POSTGRES_DB_NAME", &mut self.db_name);
        env_override("POSTGRES_POOL_SIZE", &mut self.pool_size);
    }

    pub fn url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db_name
        )
    }
}

/// Fast document/search store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub use_ssl: bool,
    pub pool_size: usize,
    /// Documents per `_bulk` request
    pub batch_size: usize,
    /// Searches per `_msearch` request
    pub multi_batch_size: usize,
    /// Hashes per fast-store lookup query
    pub query_batch_size: usize,
    /// Top hits kept per song bucket
    pub result_window: usize,
    /// Song buckets kept per lookup query
    pub focus_buckets: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9200,
            user: String::new(),
            password: String::new(),
            use_ssl: true,
            pool_size: 100,
            batch_size: 1000,
            multi_batch_size: 3,
            query_batch_size: 500,
            result_window: 500,
            focus_buckets: 35,
        }
    }
}

impl ElasticConfig {
    fn apply_env(&mut self) {
        env_override("ELASTIC_HOST", &mut self.host);
        env_override("ES_PORT", &mut self.port);
        env_override("ELASTIC_USER", &mut self.user);
        env_override("ELASTIC_PASSWORD", &mut self.password);
        if let Some(flag) = env_flag("USE_SSL") {
            self.use_ssl = flag;
        }
        env_override("ELASTIC_POOL_SIZE", &mut self.pool_size);
        env_override("ELASTIC_BATCH_SIZE", &mut self.batch_size);
        env_override("ELASTIC_MULTI_BATCH_SIZE", &mut self.multi_batch_size);
        env_override("ELASTIC_QUERY_BATCH_SIZE", &mut self.query_batch_size);
        env_override("ES_RESULT_WINDOW", &mut self.result_window);
        env_override("ES_FOCUS_BUCKETS", &mut self.focus_buckets);
    }

    pub fn base_url(&self) -> String {
        format!("https://{}:{}/", self.host, self.port)
    }
}

/// Histogram thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub min_wasserstein_distance: f64,
    pub min_zscore: f64,
    /// Fraction of the peak count a competing cluster must reach to cast doubt
    pub min_peak_percent: f64,
    pub noise_sample_size: usize,
    pub empty_noise_sentinel: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_wasserstein_distance: 250.0,
            min_zscore: 3.25,
            min_peak_percent: 0.33,
            noise_sample_size: 10,
            empty_noise_sentinel: 1.0,
        }
    }
}

impl MatchingConfig {
    fn apply_env(&mut self) {
        env_override("MINIMUM_WASSERSTEIN_DISTANCE", &mut self.min_wasserstein_distance);
        env_override("MINIMUM_ZSCORE", &mut self.min_zscore);
        // Deployed as an integer percentage
        if let Some(percent) = env_value::<f64>("MINIMUM_PEAK_PERCENT") {
            self.min_peak_percent = percent / 100.0;
        }
    }
}

/// Track download settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub download_dir: PathBuf,
    pub timeout_ms: u64,
    pub verify_tls: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            download_dir: std::env::temp_dir(),
            timeout_ms: 30_000,
            verify_tls: true,
        }
    }
}

impl IngestConfig {
    fn apply_env(&mut self) {
        env_override("DOWNLOAD_DIR", &mut self.download_dir);
        env_override("THIRDPARTY_API_TIMEOUT_MS", &mut self.timeout_ms);
        if let Some(flag) = env_flag("USE_SSL") {
            self.verify_tls = flag;
        }
    }
}

/// Track metadata service
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
}

impl MetadataConfig {
    fn apply_env(&mut self) {
        if let Some(address) = env_value::<String>("METADATA_ADDRESS") {
            self.address = Some(address);
        }
        if let Some(port) = env_value::<u16>("METADATA_PORT") {
            self.port = Some(port);
        }
    }

    /// Base URL of the metadata service, if configured
    pub fn base_url(&self) -> Option<String> {
        let address = self.address.as_deref().filter(|a| !a.is_empty())?;
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        Some(match self.port {
            Some(port) => format!("{}:{}", base, port),
            None => base,
        })
    }
}

/// External fingerprint extractor
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Extractor executable; unset means ingest is unavailable
    pub command: Option<PathBuf>,
    pub peak_zscore: Option<f64>,
    pub block_size: Option<usize>,
    pub block_stride_coeff: Option<f64>,
}

impl CoreConfig {
    fn apply_env(&mut self) {
        if let Some(command) = env_value::<PathBuf>("CORE_COMMAND") {
            self.command = Some(command);
        }
        if let Some(value) = env_value("CORE_PEAK_ZSCORE") {
            self.peak_zscore = Some(value);
        }
        if let Some(value) = env_value("CORE_BLOCK_SIZE") {
            self.block_size = Some(value);
        }
        if let Some(value) = env_value("CORE_BLOCK_STRIDE_COEFF") {
            self.block_stride_coeff = Some(value);
        }
    }
}
