use crate::{
    auth::UserPass,
    dispatch::{BridgeDispatch, ClientConnection, ProxyDispatch},
    error::{ErrorKind, Socks5Error},
    handshake::{self, Negotiated},
    registry::ConnectionRegistry,
};
use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    pub auth_config: Option<Arc<UserPass>>,
    dispatch: Arc<dyn ProxyDispatch>,
    registry: Arc<ConnectionRegistry>,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type. Without further
    /// configuration it accepts any client and bridges to the destination
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            auth_config: None,
            dispatch: Arc::new(BridgeDispatch),
            registry: ConnectionRegistry::new(),
            listener: None,
        }
    }

    /// with_auth applies the desired authentication
    pub fn with_auth(mut self, auth: Option<UserPass>) -> Self {
        // Arc allows shared ownership of UserPass
        self.auth_config = auth.map(Arc::new);
        self
    }

    /// with_dispatch replaces the policy run after a successful handshake
    pub fn with_dispatch(mut self, dispatch: Arc<dyn ProxyDispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// with_registry shares an existing registry with this server
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// bind to the listen address and return the bound address. Binding
    /// again keeps the existing listener
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.listen_addr))?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {:?}", addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run handles server spinup and listens for incoming connections
    pub async fn run(mut self) -> Result<()> {
        self.bind().await?;
        let listener = self
            .listener
            .take()
            .context("listener missing after bind")?;

        // Listen for connections to proxy
        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = listener.accept().await?;

            let id = self.registry.next_id();
            let client = ClientConnection::new(id, Some(peer_addr), Box::new(inbound));

            // Clone for this connection
            let auth_config = self.auth_config.clone();
            let dispatch = Arc::clone(&self.dispatch);
            let registry = Arc::clone(&self.registry);

            // Spawn async task
            tokio::spawn(async move {
                debug!(conn_id = %id, "new client: {}", peer_addr);

                // Send connection to connection handler
                if let Err(e) = handle_connection(client, auth_config, dispatch, registry).await {
                    error!(conn_id = %id, "connection error: {:#}", e);
                }
            });
        }
    }
}

/// handle_connection handles the full client/server SOCKS5 protocol flow
pub async fn handle_connection(
    client: ClientConnection,
    auth_config: Option<Arc<UserPass>>,
    dispatch: Arc<dyn ProxyDispatch>,
    registry: Arc<ConnectionRegistry>,
) -> Result<()> {
    let conn_id = client.id();

    // Negotiate authentication and read the request
    let Negotiated {
        request,
        destination,
        client,
    } = match handshake::negotiate(client, auth_config, &registry).await {
        Ok(negotiated) => negotiated,
        Err(e) if is_quiet_close(&e) => {
            debug!(%conn_id, "closing connection: {e}");
            return Ok(());
        }
        Err(e) => return Err(e).context("handshake failed"),
    };

    // Hand off to the configured policy
    dispatch.dispatch(request, destination, client).await
}

/// Malformed clients, bad credentials and clients that hang up mid-handshake
/// are routine and only worth a debug line
fn is_quiet_close(e: &Socks5Error) -> bool {
    e.kind() != ErrorKind::Transport || matches!(e, Socks5Error::ConnectionClosed)
}
