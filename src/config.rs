use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the medscribe pipeline and gateway.
#[derive(Debug)]
pub struct Config {
    /// Base URL of the artifact store REST API.
    pub store_url: String,
    /// Service key for the artifact store.
    pub store_api_key: String,
    /// Base URL of the blob storage service.
    pub blob_url: String,
    /// Service key for the blob storage service.
    pub blob_api_key: String,
    /// Bucket holding uploaded media objects.
    pub blob_bucket: String,
    /// Base URL of the speech recognition service.
    pub transcription_url: String,
    /// Fully qualified recognizer resource used for transcription.
    pub transcription_recognizer: String,
    /// Optional API key for the speech recognition service.
    pub transcription_api_key: Option<String>,
    /// Base URL of the vision extraction service.
    pub extraction_url: String,
    /// Model identifier used for structured extraction.
    pub extraction_model: String,
    /// Optional API key for the vision extraction service.
    pub extraction_api_key: Option<String>,
    /// Base URL of the embedding provider.
    pub embedding_url: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional key clients must present in `X-API-Key`; auth is off when unset.
    pub gateway_api_key: Option<String>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Number of pipeline workers consuming the job queue.
    pub worker_count: usize,
    /// Delivery attempts before a job is abandoned.
    pub queue_max_attempts: u32,
    /// Base redelivery delay in milliseconds, doubling per attempt.
    pub queue_backoff_base_ms: u64,
    /// Hard wall-clock ceiling for one blob download, in seconds.
    pub download_timeout_secs: u64,
    /// Maximum object size the download stage will accept, in bytes.
    pub download_max_bytes: usize,
    /// Lifetime of signed blob URLs, in seconds.
    pub signed_url_ttl_secs: u64,
    /// Result count used when a retrieval query does not specify one.
    pub retrieval_default_limit: usize,
    /// Upper bound on the retrieval result count.
    pub retrieval_max_limit: usize,
    /// Similarity threshold used when a retrieval query does not specify one.
    pub retrieval_default_threshold: f32,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store_url: load_env("STORE_URL")?,
            store_api_key: load_env("STORE_API_KEY")?,
            blob_url: load_env("BLOB_URL")?,
            blob_api_key: load_env("BLOB_API_KEY")?,
            blob_bucket: load_env("BLOB_BUCKET")?,
            transcription_url: load_env("TRANSCRIPTION_URL")?,
            transcription_recognizer: load_env("TRANSCRIPTION_RECOGNIZER")?,
            transcription_api_key: load_env_optional("TRANSCRIPTION_API_KEY"),
            extraction_url: load_env("EXTRACTION_URL")?,
            extraction_model: load_env("EXTRACTION_MODEL")?,
            extraction_api_key: load_env_optional("EXTRACTION_API_KEY"),
            embedding_url: load_env("EMBEDDING_URL")?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            gateway_api_key: load_env_optional("GATEWAY_API_KEY"),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            worker_count: load_env_or("WORKER_COUNT", 4)?,
            queue_max_attempts: load_env_or("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_backoff_base_ms: load_env_or("QUEUE_BACKOFF_BASE_MS", 5_000)?,
            download_timeout_secs: load_env_or("DOWNLOAD_TIMEOUT_SECS", 30)?,
            download_max_bytes: load_env_or("DOWNLOAD_MAX_BYTES", 100 * 1024 * 1024)?,
            signed_url_ttl_secs: load_env_or("SIGNED_URL_TTL_SECS", 3_600)?,
            retrieval_default_limit: load_env_or("RETRIEVAL_DEFAULT_LIMIT", 5)?,
            retrieval_max_limit: load_env_or("RETRIEVAL_MAX_LIMIT", 20)?,
            retrieval_default_threshold: load_env_or("RETRIEVAL_DEFAULT_THRESHOLD", 0.5)?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        store_url = %config.store_url,
        blob_bucket = %config.blob_bucket,
        extraction_model = %config.extraction_model,
        embedding_model = %config.embedding_model,
        workers = config.worker_count,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
