use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use derive_new::new;
use eyre::{Context, Result};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::CoreMetrics;

/// Serves the agent's prometheus metrics over HTTP
#[derive(new, Debug)]
pub struct Server {
    listen_port: u16,
    core_metrics: Arc<CoreMetrics>,
}

impl Server {
    /// Spawn the server. `GET /metrics` returns the registry in the
    /// prometheus text format.
    pub fn run(self: Arc<Self>) -> JoinHandle<Result<()>> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port));
        let app = Router::new()
            .route("/metrics", get(metrics))
            .with_state(self.core_metrics.clone());

        tokio::spawn(
            async move {
                info!(%addr, "Serving metrics");
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Binding metrics server to {addr}"))?;
                axum::serve(listener, app)
                    .await
                    .context("Metrics server stopped")
            }
            .instrument(info_span!("MetricsServer")),
        )
    }
}

async fn metrics(State(core_metrics): State<Arc<CoreMetrics>>) -> (StatusCode, String) {
    debug!("Gathering metrics");
    let encoded = core_metrics
        .gather()
        .map_err(|err| format!("{err}"))
        .and_then(|bytes| String::from_utf8(bytes).map_err(|err| format!("{err}")));
    match encoded {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            warn!(%err, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}
