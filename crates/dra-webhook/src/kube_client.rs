use core::error::Error;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

#[derive(Debug, derive_more::Display)]
pub enum KubeClientError {
    #[display("Failed to read kubeconfig file: {path}")]
    ReadKubeconfig { path: String },
    #[display("Failed to create Kubernetes client: {message}")]
    Connect { message: String },
}

impl Error for KubeClientError {}

/// Build a client from `kubeconfig`, or from the in-cluster/default
/// configuration when no file is given.
pub async fn init_kube_client(
    kubeconfig: Option<&Path>,
) -> Result<Client, Report<KubeClientError>> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .change_context(KubeClientError::Connect {
                message: "default configuration".to_string(),
            });
    };

    let kubeconfig =
        Kubeconfig::read_from(path).change_context(KubeClientError::ReadKubeconfig {
            path: path.display().to_string(),
        })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context(KubeClientError::Connect {
            message: format!("invalid kubeconfig {}", path.display()),
        })?;

    Client::try_from(config).change_context(KubeClientError::Connect {
        message: format!("kubeconfig {}", path.display()),
    })
}
