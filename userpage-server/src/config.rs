use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server settings. Read from the `--config` TOML file when one is given;
/// command line flags override individual values.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub api_server_hostname: String,
    pub api_server_port: u16,
    pub data_directory: PathBuf,
    /// Base of the download URLs handed out for pictures. Defaults to the
    /// listen address.
    pub public_url: Option<String>,
    pub max_upload_bytes: usize,
    /// Origins allowed by CORS. Empty allows any origin.
    pub cors_origins: Vec<String>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_server_hostname: "0.0.0.0".to_string(),
            api_server_port: 8080,
            data_directory: PathBuf::from("data"),
            public_url: None,
            max_upload_bytes: 5 * 1024 * 1024,
            cors_origins: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.api_server_hostname, self.api_server_port);
        addr.parse()
            .with_context(|| format!("invalid listen address {}", addr))
    }

    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = match self.api_server_hostname.as_str() {
                    "0.0.0.0" => "127.0.0.1",
                    host => host,
                };
                format!("http://{}:{}", host, self.api_server_port)
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_directory.join("userpage.db")
    }
}
