use std::future::Future;
use std::net::SocketAddr;

use greenhouse_common::{Error, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::SharedState;

pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let gateway = &self.state.config.gateway;
        let addr = format!("{}:{}", gateway.host, gateway.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        info!("greenhouse gateway listening on {local}");

        let app = build_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("greenhouse gateway stopped");
        Ok(())
    }
}
