//! Node server

use super::cluster::ClusterNode;
use super::http::create_router;
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Config, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

pub struct NodeServer {
    config: Config,
}

impl NodeServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bootstrap the node (found or join the cluster), then serve until
    /// ctrl-c.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting node: {}", self.config.socket_address);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  View: {}", self.config.view.join(","));
        if self.config.is_founder() {
            tracing::info!("  Shards: {:?} (founding)", self.config.shard_count);
        } else {
            tracing::info!("  Shards: cloned from cluster (joining)");
        }

        // Bind before joining so peers can reach us as soon as they learn
        // about us
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let node = ClusterNode::bootstrap(&self.config).await?;

        tracing::info!(shard = ?node.local_shard(), "✓ Node ready");
        serve_on(listener, node, self.config.max_body_bytes).await
    }
}

/// Full application: routes, request tracing and body limit
pub fn app(node: Arc<ClusterNode>, max_body_bytes: usize) -> Router {
    create_router(node)
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

/// Serve `node` on an already bound listener until ctrl-c
pub async fn serve_on(
    listener: TcpListener,
    node: Arc<ClusterNode>,
    max_body_bytes: usize,
) -> Result<()> {
    axum::serve(
        listener,
        app(node, max_body_bytes).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
