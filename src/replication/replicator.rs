//! Outbound messaging: single sends, group sends and broadcasts
//!
//! - `send_one` retries the same request against the same node for as long
//!   as it answers 503 (the peer's causal check failed). A transport error or
//!   timeout marks the node dead: it is evicted from the view and the ring,
//!   and the eviction is broadcast.
//! - `send_to_group` returns the first answer from a set of nodes.
//! - `broadcast` dispatches `send_one` to every node on detached tasks and
//!   returns immediately.

use super::protocol::{self, ViewChange};
use crate::common::{node_url, Error, ReplicationConfig, Result};
use crate::shard::{Membership, PlacementManager};
use axum::body::Bytes;
use axum::http::{header::CONTENT_TYPE, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A peer's answer, fully read
#[derive(Debug, Clone)]
pub struct PeerResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl PeerResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends started by a broadcast.
///
/// Outcomes are never reported to the caller: failures only surface through
/// dead-node eviction inside `send_one`. Call `detach` to let them run on
/// their own; `settled` exists for callers that must observe completion,
/// such as tests.
#[derive(Debug)]
pub struct Dispatched {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatched {
    /// Let the sends run to completion independently of the caller
    pub fn detach(self) {}

    /// Number of sends dispatched
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until every send has finished (successfully or not)
    pub async fn settled(self) {
        futures_util::future::join_all(self.handles).await;
    }
}

struct Inner {
    client: reqwest::Client,
    local_address: String,
    view: Arc<Membership>,
    placement: Arc<PlacementManager>,
    retry_delay: Duration,
}

#[derive(Clone)]
pub struct Replicator {
    inner: Arc<Inner>,
}

impl Replicator {
    pub fn new(
        local_address: impl Into<String>,
        view: Arc<Membership>,
        placement: Arc<PlacementManager>,
        config: &ReplicationConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                local_address: local_address.into(),
                view,
                placement,
                retry_delay: config.retry_delay(),
            }),
        })
    }

    pub fn local_address(&self) -> &str {
        &self.inner.local_address
    }

    /// Send one request to `node`, retrying while it answers 503
    pub async fn send_one(
        &self,
        node: &str,
        endpoint: &str,
        method: Method,
        body: Option<Bytes>,
    ) -> Result<PeerResponse> {
        let url = node_url(node, endpoint);
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            let mut request = self.inner.client.request(method.clone(), &url);
            if let Some(body) = &body {
                request = request
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => return Err(self.node_failed(node, e)),
            };

            if response.status() == StatusCode::SERVICE_UNAVAILABLE {
                debug!(node, endpoint, attempts, "Peer not ready (503), retrying");
                tokio::time::sleep(self.retry_pause()).await;
                continue;
            }

            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => return Err(self.node_failed(node, e)),
            };

            return Ok(PeerResponse {
                status,
                content_type,
                body,
            });
        }
    }

    /// Try each node in turn; the first one that answers wins
    pub async fn send_to_group<I>(
        &self,
        nodes: I,
        endpoint: &str,
        method: Method,
        body: Option<Bytes>,
    ) -> Result<PeerResponse>
    where
        I: IntoIterator<Item = String>,
    {
        for node in nodes {
            match self.send_one(&node, endpoint, method.clone(), body.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => debug!(node = %node, error = %e, "Group send moving to next node"),
            }
        }

        Err(Error::AllNodesUnreachable)
    }

    /// Fire-and-forget fan-out of the same request to every node
    pub fn broadcast<I>(&self, nodes: I, endpoint: &str, method: Method, body: Option<Bytes>) -> Dispatched
    where
        I: IntoIterator<Item = String>,
    {
        let handles = nodes
            .into_iter()
            .map(|node| {
                let this = self.clone();
                let endpoint = endpoint.to_string();
                let method = method.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    match this.send_one(&node, &endpoint, method, body).await {
                        Ok(response) if !response.status.is_success() => {
                            debug!(node = %node, endpoint = %endpoint, status = %response.status, "Broadcast rejected by peer");
                        }
                        Ok(_) => {}
                        // Already handled by eviction
                        Err(_) => {}
                    }
                })
            })
            .collect();

        Dispatched { handles }
    }

    fn retry_pause(&self) -> Duration {
        let jitter = Duration::from_millis(rand::random::<u64>() % 25);
        self.inner.retry_delay + jitter
    }

    fn node_failed(&self, node: &str, e: reqwest::Error) -> Error {
        warn!(node, error = %e, "Send failed, treating node as dead");
        self.evict(node);
        Error::NodeUnreachable {
            node: node.to_string(),
            reason: e.to_string(),
        }
    }

    /// Drop a dead node from the view and the ring and tell everyone else.
    /// Returns true if the node was in the view.
    pub fn evict(&self, node: &str) -> bool {
        if node == self.inner.local_address {
            return false;
        }

        let was_member = self.inner.view.delete(node);
        self.inner.placement.remove_node(node);
        if !was_member {
            return false;
        }

        warn!(node, "Evicted dead node");
        match protocol::to_body(&ViewChange {
            socket_address: node.to_string(),
        }) {
            Ok(body) => self
                .broadcast(
                    self.inner.view.others(&self.inner.local_address),
                    protocol::VIEW,
                    Method::DELETE,
                    Some(body),
                )
                .detach(),
            Err(e) => warn!(error = %e, "Could not encode eviction"),
        }
        true
    }
}
