//! HTTPS admission endpoints and the plain-HTTP health probe server.

use core::error::Error;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionReview;
use poem::get;
use poem::handler;
use poem::listener::Listener;
use poem::listener::RustlsCertificate;
use poem::listener::RustlsConfig;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::post;
use poem::web::Data;
use poem::web::Json;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::admission;
use crate::admission::AdmissionHandler;
use crate::config::ServeArgs;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, derive_more::Display)]
pub enum ServerError {
    #[display("Failed to load TLS material from {path}")]
    Tls { path: String },
    #[display("{name} server failed")]
    Serve { name: &'static str },
}

impl Error for ServerError {}

/// Handlers shared by the admission routes.
#[derive(Clone)]
pub struct WebhookState {
    pub mutating: Arc<dyn AdmissionHandler>,
    pub validating: Arc<dyn AdmissionHandler>,
}

#[handler]
async fn mutate(
    state: Data<&WebhookState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(admission::review(state.mutating.as_ref(), review).await)
}

#[handler]
async fn validate(
    state: Data<&WebhookState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(admission::review(state.validating.as_ref(), review).await)
}

#[handler]
fn healthz() -> &'static str {
    "ok"
}

/// Admission routes: `POST /mutate` and `POST /validate`.
pub fn create_routes(state: WebhookState) -> impl Endpoint {
    Route::new()
        .at("/mutate", post(mutate))
        .at("/validate", post(validate))
        .data(state)
        .with(Tracing)
}

/// Health probe routes: `GET /healthz` and `GET /readyz`.
pub fn health_routes() -> impl Endpoint {
    Route::new()
        .at("/healthz", get(healthz))
        .at("/readyz", get(healthz))
}

/// Serves the admission routes over TLS and the health routes over plain HTTP.
pub struct WebhookServer {
    secure_address: String,
    health_address: String,
    cert_path: PathBuf,
    key_path: PathBuf,
    state: WebhookState,
}

impl WebhookServer {
    pub fn new(args: &ServeArgs, state: WebhookState) -> Self {
        Self {
            secure_address: args.secure_address(),
            health_address: args.health_probe_address(),
            cert_path: args.cert_path(),
            key_path: args.key_path(),
            state,
        }
    }

    /// Run both servers until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Tls`] if the certificate or key cannot be read
    /// - [`ServerError::Serve`] if either server fails to bind or run
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Report<ServerError>> {
        let cert = read_pem(&self.cert_path).await?;
        let key = read_pem(&self.key_path).await?;
        let tls = RustlsConfig::new().fallback(RustlsCertificate::new().cert(cert).key(key));

        info!(address = %self.secure_address, "Starting admission webhook server");
        let webhook = Server::new(TcpListener::bind(self.secure_address).rustls(tls))
            .run_with_graceful_shutdown(
                create_routes(self.state),
                shutdown.clone().cancelled_owned(),
                Some(SHUTDOWN_GRACE_PERIOD),
            );

        info!(address = %self.health_address, "Starting health probe server");
        let health = Server::new(TcpListener::bind(self.health_address))
            .run_with_graceful_shutdown(
                health_routes(),
                shutdown.cancelled_owned(),
                Some(SHUTDOWN_GRACE_PERIOD),
            );

        tokio::try_join!(
            async { webhook.await.change_context(ServerError::Serve { name: "webhook" }) },
            async { health.await.change_context(ServerError::Serve { name: "health probe" }) },
        )?;

        info!("Servers stopped");
        Ok(())
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, Report<ServerError>> {
    tokio::fs::read(path)
        .await
        .change_context(ServerError::Tls {
            path: path.display().to_string(),
        })
}
