use crate::proto::{
    config_server::{Config, ConfigServer},
    ConfigRequest, ConfigResponse,
};
use anyhow::Result;
use ecnet_controller_sidecar::Server;
use futures::prelude::*;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::info;

/// Serves the most recently published sidecar configuration to polling
/// proxies.
#[derive(Clone)]
pub(crate) struct ConfigPollServer {
    server: Arc<Server>,
}

/// Serves `proxy.Config` on `listener` until shutdown is signaled.
pub(crate) async fn serve(
    listener: TcpListener,
    server: Arc<Server>,
    drain: drain::Watch,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let svc = ConfigPollServer::new(server).svc();

    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = tonic::transport::Server::builder()
            .add_service(svc)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), close_rx.map(|_| {}));
    }

    info!(%addr, "config gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}

// === impl ConfigPollServer ===

impl ConfigPollServer {
    pub(crate) fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub(crate) fn svc(self) -> ConfigServer<Self> {
        ConfigServer::new(self)
    }
}

#[tonic::async_trait]
impl Config for ConfigPollServer {
    async fn poll(
        &self,
        req: tonic::Request<ConfigRequest>,
    ) -> Result<tonic::Response<ConfigResponse>, tonic::Status> {
        let ConfigRequest { addr } = req.into_inner();
        tracing::trace!(%addr, "Poll");

        let json = self.server.latest_json().await.map_err(|error| {
            tracing::warn!(%error, "Failed to encode the latest configuration");
            tonic::Status::internal("failed to encode the latest configuration")
        })?;
        Ok(tonic::Response::new(ConfigResponse { json }))
    }
}
