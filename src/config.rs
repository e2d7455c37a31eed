use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use storefront_core::{Distance, DEFAULT_OVERFETCH_FACTOR, DEFAULT_VECTOR_DIM};
use storefront_recommend::{AzureOpenAiSettings, RecommendationSettings, DEFAULT_MIN_SIMILARITY};
use storefront_store::StorageSettings;
use thiserror::Error;
use tracing::Level;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{field} is required when {reason}")]
    Missing { field: &'static str, reason: &'static str },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceArg {
    Cosine,
    Euclidean,
}

impl From<DistanceArg> for Distance {
    fn from(arg: DistanceArg) -> Self {
        match arg {
            DistanceArg::Cosine => Distance::Cosine,
            DistanceArg::Euclidean => Distance::Euclidean,
        }
    }
}

#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Local feature-hashing embedder
    Hashing,
    /// Azure OpenAI embeddings deployment
    Azure,
}

/// Customer analytics and product recommendation service
#[derive(Parser, Serialize, Debug, Clone)]
#[command(name = "storefront")]
#[command(about = "Customer analytics and product recommendations", long_about = None)]
pub struct AppConfig {
    /// Path to the data directory
    #[arg(short, long, env = "STOREFRONT_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// HTTP API port
    #[arg(long, env = "STOREFRONT_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "STOREFRONT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Embedding dimensionality of every vector index
    #[arg(long, env = "STOREFRONT_VECTOR_DIM", default_value_t = DEFAULT_VECTOR_DIM)]
    pub vector_dim: usize,

    #[arg(long, env = "STOREFRONT_DISTANCE", value_enum, default_value_t = DistanceArg::Cosine)]
    pub distance: DistanceArg,

    #[arg(long, env = "STOREFRONT_EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProviderKind::Hashing)]
    pub embedding_provider: EmbeddingProviderKind,

    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    pub azure_openai_endpoint: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub azure_openai_api_key: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_EMBEDDING_DEPLOYMENT", default_value = "text-embedding-ada-002")]
    pub azure_openai_embedding_deployment: String,

    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = "2024-02-15-preview")]
    pub azure_openai_api_version: String,

    /// Deadline for each embedding or index call
    #[arg(long, env = "STOREFRONT_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// Period of the segmentation and churn job; 0 disables it
    #[arg(long, env = "STOREFRONT_SEGMENTATION_INTERVAL_SECS", default_value_t = 3600)]
    pub segmentation_interval_secs: u64,

    /// Period of background snapshots; 0 disables them
    #[arg(long, env = "STOREFRONT_SNAPSHOT_INTERVAL_SECS", default_value_t = 300)]
    pub snapshot_interval_secs: u64,

    /// Candidates fetched per requested result before filtering
    #[arg(long, env = "STOREFRONT_OVERFETCH_FACTOR", default_value_t = DEFAULT_OVERFETCH_FACTOR)]
    pub overfetch_factor: usize,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,
}

impl AppConfig {
    /// Check every field up front so misconfiguration fails at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid {
                field: "log_level",
                reason: format!("'{}' is not one of {}", self.log_level, LOG_LEVELS.join(", ")),
            });
        }
        if self.vector_dim == 0 {
            return Err(ConfigError::Invalid {
                field: "vector_dim",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.overfetch_factor == 0 {
            return Err(ConfigError::Invalid {
                field: "overfetch_factor",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.embedding_provider == EmbeddingProviderKind::Azure {
            let azure = "embedding_provider is azure";
            if is_blank(&self.azure_openai_endpoint) {
                return Err(ConfigError::Missing {
                    field: "azure_openai_endpoint",
                    reason: azure,
                });
            }
            if is_blank(&self.azure_openai_api_key) {
                return Err(ConfigError::Missing {
                    field: "azure_openai_api_key",
                    reason: azure,
                });
            }
            if self.azure_openai_embedding_deployment.trim().is_empty() {
                return Err(ConfigError::Missing {
                    field: "azure_openai_embedding_deployment",
                    reason: azure,
                });
            }
        }
        Ok(())
    }

    /// Effective configuration as pretty JSON. Secrets are left out.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn segmentation_interval(&self) -> Option<Duration> {
        (self.segmentation_interval_secs > 0).then(|| Duration::from_secs(self.segmentation_interval_secs))
    }

    pub fn storage_settings(&self) -> StorageSettings {
        StorageSettings {
            vector_dim: self.vector_dim,
            distance: self.distance.into(),
            overfetch_factor: self.overfetch_factor,
            snapshot_interval: (self.snapshot_interval_secs > 0)
                .then(|| Duration::from_secs(self.snapshot_interval_secs)),
        }
    }

    pub fn recommendation_settings(&self) -> RecommendationSettings {
        RecommendationSettings {
            timeout: self.request_timeout(),
            overfetch_factor: self.overfetch_factor,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    /// Azure settings, present only once [`AppConfig::validate`] has passed
    /// for the azure provider.
    pub fn azure_settings(&self) -> Option<AzureOpenAiSettings> {
        Some(AzureOpenAiSettings {
            endpoint: self.azure_openai_endpoint.clone()?,
            api_key: self.azure_openai_api_key.clone()?,
            deployment: self.azure_openai_embedding_deployment.clone(),
            api_version: self.azure_openai_api_version.clone(),
            dimension: self.vector_dim,
            timeout: self.request_timeout(),
        })
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["storefront"];
        argv.extend_from_slice(args);
        AppConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.vector_dim, 1536);
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.overfetch_factor, 4);
        assert_eq!(config.azure_openai_api_version, "2024-02-15-preview");
        assert_eq!(config.level(), Level::INFO);
        assert_eq!(config.storage_settings().distance, Distance::Cosine);
    }

    #[test]
    fn test_azure_requires_endpoint_and_key() {
        let config = parse(&["--embedding-provider", "azure", "--azure-openai-api-key", "k"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Missing {
                field: "azure_openai_endpoint",
                reason: "embedding_provider is azure",
            })
        );

        let config = parse(&[
            "--embedding-provider",
            "azure",
            "--azure-openai-endpoint",
            "https://example.openai.azure.com",
            "--azure-openai-api-key",
            "k",
        ]);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.azure_settings().unwrap().dimension, 1536);
    }

    #[test]
    fn test_invalid_fields_are_named() {
        let err = parse(&["--vector-dim", "0"]).validate().unwrap_err();
        assert!(err.to_string().contains("vector_dim"));

        let err = parse(&["--log-level", "loud"]).validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));

        let err = parse(&["--overfetch-factor", "0"]).validate().unwrap_err();
        assert!(err.to_string().contains("overfetch_factor"));

        let err = parse(&["--request-timeout-ms", "0"]).validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_ms"));
    }

    #[test]
    fn test_config_dump_omits_secrets() {
        let config = parse(&[
            "--embedding-provider",
            "azure",
            "--azure-openai-endpoint",
            "https://example.openai.azure.com",
            "--azure-openai-api-key",
            "secret-key",
            "--print-config",
        ]);
        assert!(config.print_config);

        let dump = config.to_json().unwrap();
        assert!(!dump.contains("secret-key"));
        assert!(!dump.contains("print_config"));
        let value: serde_json::Value = serde_json::from_str(&dump).unwrap();
        assert_eq!(value["vector_dim"], 1536);
        assert_eq!(value["distance"], "cosine");
        assert_eq!(value["embedding_provider"], "azure");
        assert_eq!(value["azure_openai_endpoint"], "https://example.openai.azure.com");
    }

    #[test]
    fn test_zero_intervals_disable_jobs() {
        let config = parse(&["--snapshot-interval-secs", "0", "--segmentation-interval-secs", "0"]);
        assert!(config.storage_settings().snapshot_interval.is_none());
        assert!(config.segmentation_interval().is_none());
    }
}
