use std::io;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use uptime_metrics::SharedRegistry;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[tracing::instrument(name = "metrics", skip_all)]
pub async fn serve_metrics(listen_addr: SocketAddr, registry: SharedRegistry) -> io::Result<()> {
    let app = Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(registry);

    let listener = TcpListener::bind(listen_addr).await?;
    let address = listener.local_addr()?;

    async fn get_metrics(State(registry): State<SharedRegistry>) -> impl IntoResponse {
        let mut buf = String::new();

        match registry.encode(&mut buf) {
            Ok(()) => Ok(([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], buf)),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    info!(%address, "Serving metrics");
    axum::serve(listener, app).await
}
