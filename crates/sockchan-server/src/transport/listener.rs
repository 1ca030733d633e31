use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use sockchan_core::error::{ChannelError, Result};

use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::transport::connection::serve_connection;

/// TCP listener plus shared state. One task per accepted client.
pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    pub async fn bind(cfg: ServerConfig) -> Result<Self> {
        let listen = cfg.server.listen_addr()?;
        let state = AppState::new(cfg)?;
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| ChannelError::Connection(format!("bind {listen} failed: {e}")))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Accept clients until `shutdown` resolves, then close every connection
    /// and wait for their tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut conns = JoinSet::new();
        let metrics = self.state.metrics();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(%peer, error = %e, "set_nodelay failed");
                        }
                        metrics.connections.inc(&[]);
                        metrics.active_connections.inc(&[]);
                        tracing::info!(%peer, "client connected");

                        let state = self.state.clone();
                        let stop = stop_rx.clone();
                        conns.spawn(async move {
                            let metrics = state.metrics();
                            serve_connection(state, stream, peer, stop).await;
                            metrics.active_connections.dec(&[]);
                            tracing::info!(%peer, "client disconnected");
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = conns.join_next(), if !conns.is_empty() => {}
            }
        }

        tracing::info!(open = conns.len(), "server shutting down");
        let _ = stop_tx.send(true);
        while conns.join_next().await.is_some() {}
        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }
}
