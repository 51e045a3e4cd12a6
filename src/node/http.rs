//! HTTP API of a node
//!
//! Client-facing routes (`/view`, `/kvs/:key`, `/shard/...`) plus the
//! node-to-node routes under `/rep/`. Keys owned by another shard are relayed
//! to that shard and its answer is passed back unchanged.

use super::cluster::{ClusterNode, Route};
use crate::common::{validate_key, Error, Result};
use crate::kvs::VersionVector;
use crate::replication::protocol::{
    self, KeyTransfer, KvsRequest, ReplicatedDelete, ReplicatedPut, ReshardRequest,
    ShardMemberChange, ViewChange,
};
use crate::replication::PeerResponse;
use crate::shard::Ring;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

type NodeState = State<Arc<ClusterNode>>;

/// Creates the HTTP router with all public and internal endpoints
pub fn create_router(node: Arc<ClusterNode>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/status", get(admin_status))
        // View
        .route("/view", get(view_get).put(view_put).delete(view_delete))
        // Keys
        .route("/kvs/:key", get(kvs_get).put(kvs_put).delete(kvs_delete))
        // Shards
        .route("/shard/ids", get(shard_ids))
        .route("/shard/node-shard-id", get(node_shard_id))
        .route("/shard/members/:id", get(shard_members))
        .route("/shard/key-count/:id", get(shard_key_count))
        .route("/shard/add-member/:id", put(shard_add_member))
        .route("/shard/reshard", put(shard_reshard))
        // Node to node
        .route(
            protocol::REP_KVS,
            put(rep_kvs_put).delete(rep_kvs_delete),
        )
        .route(protocol::REP_ADD_MEMBER, put(rep_add_member))
        .route(protocol::REP_RESHARD, put(rep_reshard))
        .route(protocol::REP_TRANSFER, put(rep_transfer))
        .route(protocol::REP_CLONE_RING, get(rep_clone_ring))
        .route(protocol::REP_CLONE_DATA, get(rep_clone_data))
        .with_state(node)
}

// ============================================================================
// Response helpers
// ============================================================================

/// Error body `{"error": ...}`; rejected causal contexts also carry the
/// replica's current vector.
fn error_response(e: Error) -> Response {
    let status = e.to_http_status();
    match &e {
        Error::InvalidMetadata(current) => (
            status,
            Json(json!({ "error": e.to_string(), "causal-metadata": current })),
        )
            .into_response(),
        _ => (status, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

/// Pass a peer's answer back as-is
fn relay(response: PeerResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    if let Some(value) = response
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        out.headers_mut().insert(CONTENT_TYPE, value);
    }
    out
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::BadRequest(e.to_string()))
}

fn not_routed() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Node has not received the shard ring yet" })),
    )
        .into_response()
}

// ============================================================================
// Health
// ============================================================================

async fn health(State(node): NodeState) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "node": node.local_address(),
        "version": crate::VERSION,
    }))
}

/// Node state for operators: view, ring, local shard and store summary
async fn admin_status(State(node): NodeState) -> impl IntoResponse {
    Json(json!({
        "node": node.local_address(),
        "view": node.view().as_list(),
        "node-shard-id": node.local_shard().map_or(-1, |id| id as i64),
        "ring": node.placement().snapshot(),
        "key-count": node.store().len(),
        "causal-metadata": node.store().metadata(),
    }))
}

// ============================================================================
// View
// ============================================================================

async fn view_get(State(node): NodeState) -> impl IntoResponse {
    Json(json!({ "view": node.view().as_list() }))
}

async fn view_put(State(node): NodeState, body: Bytes) -> Response {
    let change: ViewChange = match parse(&body) {
        Ok(change) => change,
        Err(e) => return error_response(e),
    };

    if node.view().put(&change.socket_address) {
        (StatusCode::OK, Json(json!({ "result": "already present" }))).into_response()
    } else {
        tracing::info!(node = %change.socket_address, "Node joined the view");
        (StatusCode::CREATED, Json(json!({ "result": "added" }))).into_response()
    }
}

async fn view_delete(State(node): NodeState, body: Bytes) -> Response {
    let change: ViewChange = match parse(&body) {
        Ok(change) => change,
        Err(e) => return error_response(e),
    };

    if node.remove_from_view(&change.socket_address) {
        tracing::info!(node = %change.socket_address, "Node left the view");
        (StatusCode::OK, Json(json!({ "result": "deleted" }))).into_response()
    } else {
        error_response(Error::NodeNotInView(change.socket_address))
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Shared front half of the key handlers: validate, then either relay to
/// the owning shard or hand back the local shard id with the parsed body.
async fn route_kvs(
    node: &ClusterNode,
    method: Method,
    key: &str,
    body: Bytes,
) -> std::result::Result<(usize, KvsRequest), Response> {
    validate_key(key).map_err(error_response)?;

    match node.route(key) {
        Route::Unrouted => Err(not_routed()),
        Route::Remote(shard_id) => {
            let path = protocol::kvs_path(key);
            Err(match node.forward(shard_id, method, &path, body).await {
                Ok(response) => relay(response),
                Err(e) => error_response(e),
            })
        }
        Route::Local(shard_id) => {
            let request = KvsRequest::parse(&body).map_err(|e| {
                error_response(Error::BadRequest(format!(
                    "causal-metadata or value not specified: {}",
                    e
                )))
            })?;
            Ok((shard_id, request))
        }
    }
}

/// Vector handed back to the client: this replica's, plus whatever the
/// client already knew about other shards.
fn client_context(current: &VersionVector, incoming: &VersionVector) -> VersionVector {
    current.merged(incoming)
}

async fn kvs_get(
    State(node): NodeState,
    method: Method,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    let (shard_id, request) = match route_kvs(&node, method, &key, body).await {
        Ok(routed) => routed,
        Err(response) => return response,
    };
    let incoming = request.metadata();

    let result = node
        .scope_to_shard(&incoming, shard_id)
        .and_then(|scoped| node.get(&key, &scoped));
    match result {
        Ok((value, current)) => (
            StatusCode::OK,
            Json(json!({
                "result": "found",
                "value": value,
                "causal-metadata": client_context(&current, &incoming),
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn kvs_put(
    State(node): NodeState,
    method: Method,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    let (shard_id, request) = match route_kvs(&node, method, &key, body).await {
        Ok(routed) => routed,
        Err(response) => return response,
    };
    let incoming = request.metadata();
    let value = match request.value {
        Some(value) if !value.is_null() => value,
        _ => return error_response(Error::MissingValue),
    };

    let result = node
        .scope_to_shard(&incoming, shard_id)
        .and_then(|scoped| node.put(shard_id, &key, value, &scoped));
    match result {
        Ok((created, current)) => {
            let (status, result) = if created {
                (StatusCode::CREATED, "created")
            } else {
                (StatusCode::OK, "updated")
            };
            (
                status,
                Json(json!({
                    "result": result,
                    "causal-metadata": client_context(&current, &incoming),
                })),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn kvs_delete(
    State(node): NodeState,
    method: Method,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    let (shard_id, request) = match route_kvs(&node, method, &key, body).await {
        Ok(routed) => routed,
        Err(response) => return response,
    };
    let incoming = request.metadata();

    let result = node
        .scope_to_shard(&incoming, shard_id)
        .and_then(|scoped| node.delete(shard_id, &key, &scoped));
    match result {
        Ok(current) => (
            StatusCode::OK,
            Json(json!({
                "result": "deleted",
                "causal-metadata": client_context(&current, &incoming),
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Shards
// ============================================================================

async fn shard_ids(State(node): NodeState) -> impl IntoResponse {
    let ids: Vec<usize> = (0..node.placement().shard_count()).collect();
    Json(json!({ "shard-ids": ids }))
}

async fn node_shard_id(State(node): NodeState) -> Response {
    match node.local_shard() {
        Some(id) => Json(json!({ "node-shard-id": id })).into_response(),
        None => error_response(Error::NodeUnassigned),
    }
}

async fn shard_members(State(node): NodeState, Path(id): Path<usize>) -> Response {
    match node.placement().members(id) {
        Ok(members) => Json(json!({ "shard-members": members })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn shard_key_count(State(node): NodeState, Path(id): Path<usize>) -> Response {
    if node.local_shard() == Some(id) {
        return Json(json!({ "shard-key-count": node.store().len() })).into_response();
    }
    if id >= node.placement().shard_count() {
        return error_response(Error::ShardNotFound(id));
    }

    let path = format!("/shard/key-count/{}", id);
    match node.forward(id, Method::GET, &path, Bytes::new()).await {
        Ok(response) => relay(response),
        Err(e) => error_response(e),
    }
}

async fn shard_add_member(
    State(node): NodeState,
    Path(id): Path<usize>,
    body: Bytes,
) -> Response {
    let change: ViewChange = match parse(&body) {
        Ok(change) => change,
        Err(e) => return error_response(e),
    };

    match node.add_member(id, &change.socket_address) {
        Ok(()) => Json(json!({ "result": "node added to shard" })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn shard_reshard(State(node): NodeState, body: Bytes) -> Response {
    let request: ReshardRequest = match parse(&body) {
        Ok(request) => request,
        Err(e) => return error_response(e),
    };

    match node.reshard(request.shard_count) {
        Ok(()) => Json(json!({ "result": "resharded" })).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Node to node
// ============================================================================

async fn rep_kvs_put(State(node): NodeState, body: Bytes) -> Response {
    let message: ReplicatedPut = match parse(&body) {
        Ok(message) => message,
        Err(e) => return error_response(e),
    };

    match node.apply_replicated_put(message) {
        Ok(()) => Json(json!({ "result": "added" })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn rep_kvs_delete(State(node): NodeState, body: Bytes) -> Response {
    let message: ReplicatedDelete = match parse(&body) {
        Ok(message) => message,
        Err(e) => return error_response(e),
    };

    match node.apply_replicated_delete(message) {
        Ok(()) => Json(json!({ "result": "deleted" })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn rep_add_member(State(node): NodeState, body: Bytes) -> Response {
    let change: ShardMemberChange = match parse(&body) {
        Ok(change) => change,
        Err(e) => return error_response(e),
    };

    match node.apply_add_member(change.shard_id, &change.socket_address) {
        Ok(()) => Json(json!({ "result": "added" })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn rep_reshard(State(node): NodeState, body: Bytes) -> Response {
    let ring: Ring = match parse(&body) {
        Ok(ring) => ring,
        Err(e) => return error_response(e),
    };

    node.apply_ring(ring);
    Json(json!({ "result": "resharded" })).into_response()
}

async fn rep_transfer(State(node): NodeState, body: Bytes) -> Response {
    let message: KeyTransfer = match parse(&body) {
        Ok(message) => message,
        Err(e) => return error_response(e),
    };

    node.apply_transfer(message);
    Json(json!({ "result": "added" })).into_response()
}

async fn rep_clone_ring(State(node): NodeState) -> impl IntoResponse {
    Json(node.placement().snapshot())
}

async fn rep_clone_data(State(node): NodeState) -> impl IntoResponse {
    Json(node.store().snapshot())
}
