//! Client API server.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::controller::{ApiState, create_router};

/// Client API HTTP server.
pub struct ApiServer {
    port: u16,
    engine: ApiState,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, engine: ApiState, cancel: CancellationToken) -> Self {
        Self {
            port,
            engine,
            cancel,
        }
    }

    /// Serve the client API until cancelled.
    ///
    /// Open push streams end through the engine's own shutdown token, which
    /// lets graceful shutdown complete.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let app = create_router(self.engine);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
