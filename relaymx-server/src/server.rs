//! Process entry point: binds the listener, starts the metrics endpoint,
//! and accepts connections until a shutdown signal arrives.

use std::sync::Arc;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;

use relaymx_protocol::collaborators::{KeywordClassifier, SingleBackendRouter, StaticUserRepository};
use relaymx_protocol::connection::{ClientConnection, ConnectionDeps};
use relaymx_session::BackendId;

use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::metrics::{self, PrometheusObserver, CONNECTIONS_TOTAL};

/// Binds a TCP socket through `socket2` so the backlog and send buffer can
/// be tuned before the listener is handed to Tokio.
fn bind_listener(config: &Config) -> anyhow::Result<std::net::TcpListener> {
    let addr: std::net::SocketAddr = format!("{}:{}", config.listener.bind_address, config.listener.port).parse()?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_send_buffer_size(config.listener.send_buffer_bytes)?;
    socket.set_nodelay(true)?;
    socket.bind(&addr.into())?;
    let backlog = (config.listener.backlog_multiplier as i32).max(1) * 128;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    if config.metrics.enabled {
        let bind_address = config.metrics.bind_address.clone();
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(&bind_address, port).await {
                tracing::error!(error = %e, "metrics endpoint exited");
            }
        });
    }

    let std_listener = bind_listener(&config)?;
    let listener = TcpListener::from_std(std_listener)?;
    tracing::info!(address = %config.listener.bind_address, port = config.listener.port, "relaymx listening");

    let manager = Arc::new(ConnectionManager::new(&config.general));

    let router = Arc::new(SingleBackendRouter::new(BackendId(1)));
    let classifier = Arc::new(KeywordClassifier);
    let users = Arc::new(StaticUserRepository::new());
    let observer: Arc<dyn relaymx_protocol::collaborators::ConnectionObserver> = Arc::new(PrometheusObserver);

    let mut connection_id: u32 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = accepted?;
                if !manager.check_rate_limit(peer_addr.ip()) {
                    continue;
                }
                let Some(permit) = manager.acquire().await else {
                    continue;
                };

                connection_id = connection_id.wrapping_add(1);
                CONNECTIONS_TOTAL.inc();

                let deps = ConnectionDeps {
                    router: router.clone(),
                    gateway: crate::gateway::unavailable_gateway(),
                    classifier: classifier.clone(),
                    users: users.clone(),
                    semantics: config.session,
                    properties: config.session_limits,
                    observer: observer.clone(),
                };
                let conn = ClientConnection::new(connection_id, deps);

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = conn.run(socket).await {
                        tracing::warn!(error = %e, "connection ended with an error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
