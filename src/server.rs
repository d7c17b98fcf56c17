//! Listener and process-wide state shared by every session

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::backend::{BackendConnector, Credentials};
use crate::config::{AuthConfig, BackendConfig, Config};
use crate::metrics::metrics;
use crate::protocol::capabilities::{CLIENT_SSL, DEFAULT_CAPABILITIES};
use crate::router::{QueryTranslator, Router, TranslatorError};
use crate::session::{ConnectionRegistry, DefinitionError, GlobalSettings, Session, VariableError};
use crate::tls::{build_tls_acceptor, TlsError};

/// Global connection counter for generating unique connection IDs
static CONNECTION_COUNTER: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to load system variable definitions: {0}")]
    Definitions(#[from] DefinitionError),

    #[error("Invalid system variable override: {0}")]
    Override(#[from] VariableError),

    #[error("Failed to load translations: {0}")]
    Translations(#[from] TranslatorError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("Failed to read backend credentials: {0}")]
    Credentials(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a session needs that outlives it
pub struct ServerContext {
    pub server_version: String,
    pub auth: AuthConfig,
    pub backend: Arc<BackendConfig>,
    pub connector: Arc<dyn BackendConnector>,
    pub credentials: Option<Credentials>,
    pub globals: Arc<GlobalSettings>,
    pub router: Router,
    pub tls: Option<TlsAcceptor>,
    pub registry: Arc<ConnectionRegistry>,
}

impl ServerContext {
    /// Load variable definitions, translations, TLS material and credentials
    pub fn from_config(
        config: &Config,
        connector: Arc<dyn BackendConnector>,
    ) -> Result<Self, ServerError> {
        let globals = match &config.session.system_variables_file {
            Some(path) => GlobalSettings::load_file(path)?,
            None => GlobalSettings::builtin()?,
        }
        .with_overrides(&config.session.overrides)?;
        info!(count = globals.len(), "System variables loaded");

        let mut translator = QueryTranslator::builtin();
        if let Some(path) = &config.session.translation_file {
            let loaded = translator.load_file(path)?;
            info!(path = %path.display(), loaded, "Translations loaded");
        }

        let tls = config
            .server
            .tls
            .as_ref()
            .map(build_tls_acceptor)
            .transpose()?;

        let credentials = config
            .backend
            .credentials_file
            .as_ref()
            .map(Credentials::from_file)
            .transpose()
            .map_err(ServerError::Credentials)?;

        Ok(Self {
            server_version: config.server.server_version.clone(),
            auth: config.auth.clone(),
            backend: Arc::new(config.backend.clone()),
            connector,
            credentials,
            globals: Arc::new(globals),
            router: Router::new(translator),
            tls,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    /// Capabilities advertised in the greeting
    pub fn capabilities(&self) -> u32 {
        if self.tls.is_some() {
            DEFAULT_CAPABILITIES | CLIENT_SSL
        } else {
            DEFAULT_CAPABILITIES
        }
    }
}

pub struct Server {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
}

impl Server {
    pub async fn bind(addr: &str, ctx: Arc<ServerContext>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, tls = ctx.tls.is_some(), "spanwire listening");
        Ok(Self { ctx, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves, then terminate every live session
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let connection_id = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
            let token = self.ctx.registry.register(connection_id, Some(peer_addr));
            let ctx = self.ctx.clone();
            metrics().record_connection_accepted();

            info!(connection_id, peer = %peer_addr, "New connection");

            tokio::spawn(async move {
                let registry = ctx.registry.clone();
                let session = Session::new(connection_id, ctx, token);
                if let Err(e) = session.run(stream).await {
                    warn!(connection_id, error = %e, "Session ended with error");
                } else {
                    info!(connection_id, "Session ended");
                }
                registry.deregister(connection_id);
                metrics().record_connection_closed();
            });
        }

        let terminated = self.ctx.registry.terminate_all();
        info!(terminated, "Listener stopped");
    }
}
