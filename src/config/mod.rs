/// Configuration management for the aiflow engine
///
/// Handles server binding, storage location and LLM credentials.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// GigaChat API configuration
    pub gigachat: GigaChatConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Externally visible base URL used when handing out webhook URLs
    pub public_base_url: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite database file (default: "data")
    pub data_dir: String,
}

/// GigaChat endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GigaChatConfig {
    /// OAuth token endpoint
    pub oauth_url: String,
    /// Chat/embeddings API base URL
    pub api_url: String,
    /// OAuth scope
    pub scope: String,
    /// Model name for completions
    pub model: String,
    /// Default credential; node configs may override per node
    pub auth_token: Option<String>,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let host = std::env::var("AIFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("AIFLOW_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);

        Self {
            server: ServerConfig {
                public_base_url: std::env::var("AIFLOW_PUBLIC_URL")
                    .unwrap_or_else(|_| format!("http://{}:{}", host, port)),
                host,
                port,
            },
            database: DatabaseConfig {
                data_dir: std::env::var("AIFLOW_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            gigachat: GigaChatConfig::default(),
        }
    }
}

impl Default for GigaChatConfig {
    fn default() -> Self {
        Self {
            oauth_url: std::env::var("GIGACHAT_OAUTH_URL")
                .unwrap_or_else(|_| "https://ngw.devices.sberbank.ru:9443/api/v2/oauth".to_string()),
            api_url: std::env::var("GIGACHAT_API_URL")
                .unwrap_or_else(|_| "https://gigachat.devices.sberbank.ru/api/v1".to_string()),
            scope: std::env::var("GIGACHAT_SCOPE").unwrap_or_else(|_| "GIGACHAT_API_PERS".to_string()),
            model: std::env::var("GIGACHAT_MODEL").unwrap_or_else(|_| "GigaChat-Max".to_string()),
            auth_token: std::env::var("GIGACHAT_AUTH_TOKEN").ok(),
        }
    }
}
