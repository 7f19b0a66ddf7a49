use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use error_stack::Report;

use crate::config::ConfigError;

#[derive(Parser, Clone, Debug)]
pub struct ServeArgs {
    #[arg(
        long,
        default_value = "0.0.0.0",
        help = "The IP address on which to listen for the --secure-port port"
    )]
    pub bind_address: String,

    #[arg(
        long,
        default_value_t = 8443,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "The secure port on which to serve HTTPS"
    )]
    pub secure_port: u16,

    #[arg(
        long,
        env = "DRA_WEBHOOK_CERT_DIR",
        default_value = "/tmp/k8s-webhook-server/serving-certs",
        value_hint = clap::ValueHint::DirPath,
        help = "The directory that contains the server key and certificate"
    )]
    pub cert_dir: PathBuf,

    #[arg(
        long = "tls-cert-file-name",
        default_value = "tls.crt",
        help = "The name of the server certificate inside --cert-dir"
    )]
    pub cert_name: String,

    #[arg(
        long = "tls-private-key-file-name",
        default_value = "tls.key",
        help = "The name of the server key inside --cert-dir"
    )]
    pub key_name: String,

    #[arg(
        long,
        default_value = ":8000",
        help = "The TCP address serving health probes, e.g. 127.0.0.1:8000 or :8000"
    )]
    pub health_probe_bind_address: String,

    #[arg(
        long,
        env = "DEVICE_CONFIG_FILE",
        default_value = "device-config.yaml",
        value_hint = clap::ValueHint::FilePath,
        help = "The path to the device config file"
    )]
    pub device_config_file: PathBuf,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Deadline in seconds for each ResourceClaim create or delete call"
    )]
    pub store_timeout_secs: u64,
}

impl ServeArgs {
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join(&self.cert_name)
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join(&self.key_name)
    }

    pub fn secure_address(&self) -> String {
        join_host_port(&self.bind_address, self.secure_port)
    }

    pub fn health_probe_address(&self) -> String {
        normalize_bind_address(&self.health_probe_bind_address)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Check that the serving certificate and key are present.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Invalid`] if either file is missing
    pub fn validate(&self) -> Result<(), Report<ConfigError>> {
        let missing: Vec<String> = [self.cert_path(), self.key_path()]
            .into_iter()
            .filter(|path| !path.is_file())
            .map(|path| path.display().to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Report::new(ConfigError::Invalid {
                message: format!("missing TLS files: {}", missing.join(", ")),
            }))
        }
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Expands the `:port` shorthand to listen on all interfaces.
fn normalize_bind_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}
