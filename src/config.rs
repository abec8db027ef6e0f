//! Process configuration.
//!
//! Loaded from an optional `config.{toml,yaml,json}` in the working directory,
//! overridden by `SIGNER__SECTION__KEY` environment variables.

use std::collections::HashMap;
use std::path::PathBuf;

use ::config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    /// Source documents that may be signed, keyed by document id.
    #[serde(default = "default_documents")]
    pub documents: HashMap<String, PathBuf>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix of the URLs handed back to clients.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory signed PDFs are written to.
    #[serde(default = "default_signed_dir")]
    pub signed_dir: PathBuf,

    /// URL path under which `signed_dir` is served.
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,

    #[serde(default = "default_audit_db")]
    pub audit_db: PathBuf,
}

impl SignerConfig {
    /// Load from `config.*` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("SIGNER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            server: default_server(),
            storage: default_storage(),
            documents: default_documents(),
        }
    }
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        base_url: default_base_url(),
        workers: default_workers(),
        max_body_bytes: default_max_body_bytes(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_base_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        signed_dir: default_signed_dir(),
        public_prefix: default_public_prefix(),
        audit_db: default_audit_db(),
    }
}

fn default_signed_dir() -> PathBuf {
    PathBuf::from("signed")
}

fn default_public_prefix() -> String {
    "/signed".to_string()
}

fn default_audit_db() -> PathBuf {
    PathBuf::from("data/audit.db")
}

fn default_documents() -> HashMap<String, PathBuf> {
    HashMap::from([("sample".to_string(), PathBuf::from("pdfs/sample.pdf"))])
}
