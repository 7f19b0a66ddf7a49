use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Result;
use clap::Parser;
use dra_webhook::admission::MutatingAdmission;
use dra_webhook::admission::ValidatingAdmission;
use dra_webhook::claim::ClaimStore;
use dra_webhook::claim::KubeClaimStore;
use dra_webhook::config::Cli;
use dra_webhook::config::Commands;
use dra_webhook::config::ResourceNameMapping;
use dra_webhook::config::ServeArgs;
use dra_webhook::kube_client::init_kube_client;
use dra_webhook::server::WebhookServer;
use dra_webhook::server::WebhookState;
use tokio_util::sync::CancellationToken;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(serve_args) => run_serve(*serve_args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let _guard = utils::logging::init();

    tracing::info!("Starting dra-webhook {}", &**version::VERSION);

    args.validate().map_err(|report| anyhow!("{report:?}"))?;
    let mapping = ResourceNameMapping::from_file(&args.device_config_file)
        .map_err(|report| anyhow!("{report:?}"))?;
    tracing::info!(
        count = %mapping.count_name,
        core = %mapping.core_name,
        memory = %mapping.memory_name,
        device_class = %mapping.device_class_name,
        "Loaded resource name mapping"
    );
    let mapping = Arc::new(mapping);

    let client = init_kube_client(args.kubeconfig.as_deref())
        .await
        .map_err(|report| anyhow!("{report:?}"))?;
    let store: Arc<dyn ClaimStore> = Arc::new(KubeClaimStore::new(client, args.store_timeout()));

    let state = WebhookState {
        mutating: Arc::new(MutatingAdmission::new(mapping.clone(), store.clone())),
        validating: Arc::new(ValidatingAdmission::new(mapping, store)),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
                return;
            }
            tracing::info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    WebhookServer::new(&args, state)
        .run(shutdown)
        .await
        .map_err(|report| anyhow!("{report:?}"))?;

    tracing::info!("dra-webhook stopped");
    Ok(())
}
