//! Admission controller configuration
//!
//! Layers, lowest precedence first: built-in defaults, an optional config
//! file, `ADMISSION_`-prefixed environment variables, command-line flags.

use admission_lib::lookup::DEFAULT_LOOKUP_TIMEOUT;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "admission-controller", version, about = "VPA admission controller")]
pub struct Cli {
    /// Optional configuration file (yaml, toml or json)
    #[arg(long, env = "ADMISSION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address for health probes and metrics
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Address the webhook listens on
    #[arg(long)]
    pub webhook_address: Option<SocketAddr>,

    /// Scale limits along with requests
    #[arg(long)]
    pub allow_to_adjust_limits: bool,

    /// PEM certificate served by the webhook
    #[arg(long)]
    pub tls_cert_file: Option<PathBuf>,

    /// PEM private key for the webhook certificate
    #[arg(long)]
    pub tls_private_key: Option<PathBuf>,

    /// Bound on each cluster lookup
    #[arg(long)]
    pub lookup_timeout_ms: Option<u64>,
}

/// Effective configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    #[serde(default = "default_address")]
    pub address: SocketAddr,

    #[serde(default = "default_webhook_address")]
    pub webhook_address: SocketAddr,

    #[serde(default)]
    pub allow_to_adjust_limits: bool,

    #[serde(default)]
    pub tls_cert_file: Option<PathBuf>,

    #[serde(default)]
    pub tls_private_key: Option<PathBuf>,

    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "admission-controller".to_string())
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8944))
}

fn default_webhook_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64
}

impl AdmissionConfig {
    /// Load configuration and apply command-line overrides
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = Self::from_sources(cli.config.as_deref())?;
        config.apply(cli);
        config.validate()?;
        Ok(config)
    }

    /// Read the config file (if any) and the environment
    pub fn from_sources(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("ADMISSION").try_parsing(true))
            .build()
            .context("failed to read configuration")?;

        settings
            .try_deserialize()
            .context("invalid configuration")
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(address) = cli.address {
            self.address = address;
        }
        if let Some(address) = cli.webhook_address {
            self.webhook_address = address;
        }
        if cli.allow_to_adjust_limits {
            self.allow_to_adjust_limits = true;
        }
        if let Some(cert) = &cli.tls_cert_file {
            self.tls_cert_file = Some(cert.clone());
        }
        if let Some(key) = &cli.tls_private_key {
            self.tls_private_key = Some(key.clone());
        }
        if let Some(timeout) = cli.lookup_timeout_ms {
            self.lookup_timeout_ms = timeout;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tls_cert_file.is_some() != self.tls_private_key.is_some() {
            anyhow::bail!("tls_cert_file and tls_private_key must be set together");
        }
        if self.lookup_timeout_ms == 0 {
            anyhow::bail!("lookup_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Certificate and key paths when TLS is configured
    pub fn tls(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_file, &self.tls_private_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let config = AdmissionConfig::load(&Cli::default()).unwrap();

        assert_eq!(config.address, default_address());
        assert_eq!(config.webhook_address.port(), 8000);
        assert!(!config.allow_to_adjust_limits);
        assert_eq!(config.lookup_timeout(), Duration::from_secs(2));
        assert!(config.tls().is_none());
    }

    #[test]
    fn test_file_then_flags() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "webhook_address = \"127.0.0.1:9443\"\nlookup_timeout_ms = 500\nallow_to_adjust_limits = true"
        )
        .unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            lookup_timeout_ms: Some(750),
            ..Default::default()
        };
        let config = AdmissionConfig::load(&cli).unwrap();

        assert_eq!(config.webhook_address, "127.0.0.1:9443".parse().unwrap());
        assert!(config.allow_to_adjust_limits);
        assert_eq!(config.lookup_timeout_ms, 750);
    }

    #[test]
    fn test_tls_requires_cert_and_key() {
        let cli = Cli {
            tls_cert_file: Some(PathBuf::from("/etc/tls/tls.crt")),
            ..Default::default()
        };
        assert!(AdmissionConfig::load(&cli).is_err());

        let cli = Cli {
            tls_private_key: Some(PathBuf::from("/etc/tls/tls.key")),
            ..cli
        };
        let config = AdmissionConfig::load(&cli).unwrap();
        assert!(config.tls().is_some());
    }

    #[test]
    fn test_cli_flags_parse() {
        let cli = Cli::parse_from([
            "admission-controller",
            "--webhook-address",
            "0.0.0.0:8443",
            "--allow-to-adjust-limits",
        ]);
        assert_eq!(cli.webhook_address.unwrap().port(), 8443);
        assert!(cli.allow_to_adjust_limits);
    }
}
