//! HTTP API of a replica
//!
//! Client routes live under `/key-value-store*`; everything else is spoken
//! only between replicas. Key operations arriving on the client route are
//! served locally when we belong to the owning shard and relayed verbatim to
//! a member of that shard otherwise.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result};
use crate::replica::node::{Replica, Route};
use crate::replica::peer_client::ViewChange;
use crate::replica::protocol::{
    AliveResponse, ClockUpdate, DeleteRequest, DeleteResponse, GetResponse, MessageResponse,
    NodeShardIdResponse, PutRequest, PutResponse, RehashRequest, ReplicaAck, ReplicaAddress,
    ReshardRequest, ReshardResponse, ShardIdsResponse, ShardKeyCountResponse,
    ShardMembersResponse, ViewResponse,
};
use crate::replica::store::{Entry, WriteKind};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

type AppState = Arc<Replica>;

pub fn create_router(replica: AppState) -> Router {
    Router::new()
        // Client key operations
        .route("/key-value-store/", get(dump_entries))
        .route(
            "/key-value-store/:key",
            get(client_key).put(client_key).delete(client_key),
        )
        // Membership
        .route(
            "/key-value-store-view",
            get(get_view).put(add_view_member).delete(remove_view_member),
        )
        .route("/key-value-store-view/alive", get(get_alive))
        // Shards
        .route("/key-value-store-shard/shard-ids", get(get_shard_ids))
        .route("/key-value-store-shard/node-shard-id", get(get_node_shard_id))
        .route(
            "/key-value-store-shard/shard-id-members/:id",
            get(get_shard_members),
        )
        .route(
            "/key-value-store-shard/shard-id-key-count/:id",
            get(get_shard_key_count),
        )
        .route("/key-value-store-shard/add-member/:id", put(add_shard_member))
        .route("/key-value-store-shard/reshard", put(reshard))
        .route("/key-value-store-shard/get-info", get(get_info))
        // Replica to replica
        .route(
            "/kvs/:key",
            get(routed_key).put(routed_key).delete(routed_key),
        )
        .route(
            "/replicate/:key",
            put(replicate_put).delete(replicate_delete),
        )
        .route(
            "/replicate-view",
            put(replicate_view_add).delete(replicate_view_remove),
        )
        .route("/replicate-add-member/:id", put(replicate_shard_member))
        .route("/update", put(clock_update))
        .route("/rehash", put(rehash))
        .route("/fill", put(fill))
        .route("/fill-replica", put(fill_replica))
        .route("/forward/key-count/:id", get(forward_key_count))
        .route("/gossip", get(gossip))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_tracing_middleware))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(replica)
}

// === Key operations ===

async fn client_key(
    State(replica): State<AppState>,
    Path(key): Path<String>,
    method: Method,
    body: Bytes,
) -> Result<Response> {
    match replica.route_for(&key).await? {
        Route::Local { .. } => handle_key(&replica, method, &key, &body).await,
        Route::Remote { shard_id, addr } => {
            tracing::debug!(key = %key, shard = shard_id, peer = %addr, "Forwarding request");
            let (status, bytes) = replica.peers().forward(&addr, method, &key, body).await?;
            Ok((status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response())
        }
    }
}

async fn routed_key(
    State(replica): State<AppState>,
    Path(key): Path<String>,
    method: Method,
    body: Bytes,
) -> Result<Response> {
    handle_key(&replica, method, &key, &body).await
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice::<Option<T>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| Error::Validation(format!("Malformed request body: {}", e)))
}

/// Serve a key operation against our own store.
///
/// An absent body (or JSON `null`) counts as empty, so a PUT without one
/// reports a missing value. A body that does not parse is rejected.
async fn handle_key(replica: &Replica, method: Method, key: &str, body: &[u8]) -> Result<Response> {
    match method {
        Method::GET => {
            let entry = replica.get(key).await?;
            Ok((
                StatusCode::OK,
                Json(GetResponse {
                    message: "Retrieved successfully".to_string(),
                    value: entry.value,
                    version: entry.version,
                    causal_metadata: entry.causal_history,
                }),
            )
                .into_response())
        }
        Method::PUT => {
            let request: PutRequest = parse_body(body)?;
            let outcome = replica
                .put(key, request.value.as_deref(), &request.causal_metadata)
                .await?;
            let (status, message) = if outcome.replaced {
                (StatusCode::OK, "Updated successfully")
            } else {
                (StatusCode::CREATED, "Added successfully")
            };
            Ok((
                status,
                Json(PutResponse {
                    message: message.to_string(),
                    replaced: outcome.replaced,
                    version: outcome.version,
                    causal_metadata: outcome.causal_history,
                    shard_id: outcome.shard_id,
                }),
            )
                .into_response())
        }
        Method::DELETE => {
            let request: DeleteRequest = parse_body(body)?;
            let outcome = replica.delete(key, &request.causal_metadata).await?;
            Ok((
                StatusCode::OK,
                Json(DeleteResponse {
                    does_exist: true,
                    message: "Deleted successfully".to_string(),
                    version: outcome.version,
                    causal_metadata: outcome.causal_history,
                }),
            )
                .into_response())
        }
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}

async fn dump_entries(State(replica): State<AppState>) -> impl IntoResponse {
    Json(replica.snapshot().await)
}

// === Membership ===

async fn get_view(State(replica): State<AppState>) -> impl IntoResponse {
    Json(ViewResponse {
        message: "View retrieved successfully".to_string(),
        view: replica.view_string().await,
    })
}

async fn add_view_member(
    State(replica): State<AppState>,
    Json(body): Json<ReplicaAddress>,
) -> Result<Response> {
    replica.add_member(&body.address).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Replica added successfully to the view")),
    )
        .into_response())
}

async fn remove_view_member(
    State(replica): State<AppState>,
    Json(body): Json<ReplicaAddress>,
) -> Result<Response> {
    replica.remove_member(&body.address).await?;
    Ok(Json(MessageResponse::new("Replica deleted successfully from the view")).into_response())
}

async fn get_alive(State(replica): State<AppState>) -> impl IntoResponse {
    Json(AliveResponse {
        alive: replica.alive_peers().await,
    })
}

// === Shards ===

async fn get_shard_ids(State(replica): State<AppState>) -> impl IntoResponse {
    Json(ShardIdsResponse {
        message: "Shard IDs retrieved successfully".to_string(),
        shard_ids: replica.shard_ids().await,
    })
}

async fn get_node_shard_id(State(replica): State<AppState>) -> impl IntoResponse {
    Json(NodeShardIdResponse {
        message: "Shard ID of the node retrieved successfully".to_string(),
        shard_id: replica.self_shard_id().await,
    })
}

async fn get_shard_members(
    State(replica): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ShardMembersResponse>> {
    let members = replica.shard_members(id).await?;
    Ok(Json(ShardMembersResponse {
        message: "Members of shard ID retrieved successfully".to_string(),
        members: members.join(","),
    }))
}

async fn get_shard_key_count(
    State(replica): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ShardKeyCountResponse>> {
    let key_count = replica.shard_key_count(id).await?;
    Ok(Json(ShardKeyCountResponse {
        message: "Key count of shard ID retrieved successfully".to_string(),
        key_count,
    }))
}

async fn add_shard_member(
    State(replica): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<ReplicaAddress>,
) -> Result<Json<MessageResponse>> {
    replica.add_member_to_shard(id, &body.address).await?;
    Ok(Json(MessageResponse::new("Node added successfully to shard")))
}

async fn reshard(
    State(replica): State<AppState>,
    Json(body): Json<ReshardRequest>,
) -> Result<Json<ReshardResponse>> {
    let report = replica.reshard(body.shard_count).await?;
    Ok(Json(ReshardResponse {
        message: "Resharding done successfully".to_string(),
        shard_count: report.shard_count,
        harvested: report.harvested,
        redistributed: report.redistributed,
    }))
}

async fn get_info(State(replica): State<AppState>) -> impl IntoResponse {
    Json(replica.shard_info().await)
}

// === Replica to replica ===

async fn replicate_put(
    State(replica): State<AppState>,
    Path(key): Path<String>,
    Json(entry): Json<Entry>,
) -> Result<Json<ReplicaAck>> {
    replicate(&replica, WriteKind::Put, key, entry).await
}

async fn replicate_delete(
    State(replica): State<AppState>,
    Path(key): Path<String>,
    Json(entry): Json<Entry>,
) -> Result<Json<ReplicaAck>> {
    replicate(&replica, WriteKind::Delete, key, entry).await
}

async fn replicate(
    replica: &Replica,
    kind: WriteKind,
    key: String,
    mut entry: Entry,
) -> Result<Json<ReplicaAck>> {
    entry.key = key;
    let version = replica.apply_forwarded(kind, entry).await?;
    Ok(Json(ReplicaAck {
        message: "Replicated successfully".to_string(),
        version,
    }))
}

async fn replicate_view_add(
    State(replica): State<AppState>,
    Json(body): Json<ReplicaAddress>,
) -> impl IntoResponse {
    replica.apply_view_change(ViewChange::Add, &body.address).await;
    Json(MessageResponse::new("View updated"))
}

async fn replicate_view_remove(
    State(replica): State<AppState>,
    Json(body): Json<ReplicaAddress>,
) -> impl IntoResponse {
    replica
        .apply_view_change(ViewChange::Remove, &body.address)
        .await;
    Json(MessageResponse::new("View updated"))
}

async fn replicate_shard_member(
    State(replica): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<ReplicaAddress>,
) -> Result<Json<MessageResponse>> {
    replica.apply_shard_member(id, &body.address).await?;
    Ok(Json(MessageResponse::new("Shard updated")))
}

async fn clock_update(
    State(replica): State<AppState>,
    Json(body): Json<ClockUpdate>,
) -> Result<Json<ReplicaAck>> {
    let version = replica.clock_update(body.version).await?;
    Ok(Json(ReplicaAck {
        message: "Clock updated".to_string(),
        version,
    }))
}

async fn rehash(
    State(replica): State<AppState>,
    Json(body): Json<RehashRequest>,
) -> Result<Json<MessageResponse>> {
    replica
        .rebuild_and_wipe(body.shard_count, body.resume_version)
        .await?;
    Ok(Json(MessageResponse::new("Rehashed")))
}

async fn fill(
    State(replica): State<AppState>,
    Json(entry): Json<Entry>,
) -> Result<Json<MessageResponse>> {
    replica.fill(entry, true).await?;
    Ok(Json(MessageResponse::new("Filled")))
}

async fn fill_replica(
    State(replica): State<AppState>,
    Json(entry): Json<Entry>,
) -> Result<Json<MessageResponse>> {
    replica.fill(entry, false).await?;
    Ok(Json(MessageResponse::new("Filled")))
}

async fn forward_key_count(
    State(replica): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ShardKeyCountResponse>> {
    let key_count = replica.local_key_count(id).await?;
    Ok(Json(ShardKeyCountResponse {
        message: "Key count of shard ID retrieved successfully".to_string(),
        key_count,
    }))
}

async fn gossip() -> &'static str {
    "Alive"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::node::tests::test_replica;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Alone in its view and shard, so no request ever reaches a peer.
    async fn solo_router() -> Router {
        let replica = test_replica("a:1", &["a:1", "b:1"], 1);
        replica.apply_view_change(ViewChange::Remove, "b:1").await;
        create_router(Arc::new(replica))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let router = solo_router().await;

        let (status, body) = call(&router, "PUT", "/key-value-store/a", json!({"value": "1"})).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Added successfully");
        assert_eq!(body["version"], 1);
        assert_eq!(body["causal-metadata"], json!([1]));
        assert_eq!(body["shard-id"], 1);

        let (status, body) = call(
            &router,
            "PUT",
            "/key-value-store/a",
            json!({"value": "2", "causal-metadata": [1]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["replaced"], true);

        let (status, body) = call(&router, "GET", "/key-value-store/a", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "2");
        assert_eq!(body["causal-metadata"], json!([1, 2]));

        let (status, body) = call(&router, "DELETE", "/key-value-store/a", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["doesExist"], true);
        assert_eq!(body["version"], 3);

        let (status, body) = call(&router, "GET", "/key-value-store/a", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_validation_and_stall_statuses() {
        let router = solo_router().await;

        let (status, body) = call(&router, "PUT", "/key-value-store/a", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Value is missing");

        let long_key = "k".repeat(51);
        let (status, body) = call(
            &router,
            "PUT",
            &format!("/key-value-store/{}", long_key),
            json!({"value": "v"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Key is too long");

        let (status, body) = call(
            &router,
            "PUT",
            "/key-value-store/a",
            json!({"value": "v", "causal-metadata": [7]}),
        )
        .await;
        assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
        assert_eq!(body["error"], "stalled");
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let router = solo_router().await;
        call(&router, "PUT", "/key-value-store/a", json!({"value": "1"})).await;

        let (status, body) = call(
            &router,
            "DELETE",
            "/key-value-store/a",
            json!({"causal-metadata": "5"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, body) = call(
            &router,
            "PUT",
            "/key-value-store/a",
            json!({"value": 2, "causal-metadata": [1]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        // nothing was applied
        let (status, body) = call(&router, "GET", "/key-value-store/a", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "1");
        assert_eq!(body["version"], 1);

        // an empty body is still an empty request
        let request = Request::builder()
            .method("DELETE")
            .uri("/key-value-store/a")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_causal_metadata_at_version_ceiling() {
        let router = solo_router().await;
        let (status, body) = call(
            &router,
            "PUT",
            "/key-value-store/a",
            json!({"value": "1", "causal-metadata": [u64::MAX]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "causal metadata out of range");
    }

    #[tokio::test]
    async fn test_peer_routes() {
        let router = solo_router().await;

        let entry = json!({"key": "x", "value": "1", "version": 1, "causal-metadata": [1]});
        let (status, body) = call(&router, "PUT", "/replicate/x", entry.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);
        // redelivery is acknowledged
        let (status, _) = call(&router, "PUT", "/replicate/x", entry).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&router, "PUT", "/update", json!({"version": 5})).await;
        assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
        let (status, _) = call(&router, "PUT", "/update", json!({"version": 2})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&router, "GET", "/key-value-store/", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);
        assert_eq!(body["entries"][0]["key"], "x");

        let fill = json!({"key": "y", "value": "2", "version": 9});
        let (status, _) = call(&router, "PUT", "/fill-replica", fill).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&router, "GET", "/kvs/y", Value::Null).await;
        assert_eq!(body["value"], "2");
        assert_eq!(body["version"], 9);
    }

    #[tokio::test]
    async fn test_view_and_shard_introspection() {
        let router = solo_router().await;

        let (status, body) = call(&router, "GET", "/key-value-store-view", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["view"], "a:1");

        let (status, _) = call(
            &router,
            "PUT",
            "/replicate-view",
            json!({"socket-address": "c:1"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&router, "GET", "/key-value-store-view", Value::Null).await;
        assert_eq!(body["view"], "a:1,c:1");

        let (_, body) = call(&router, "GET", "/key-value-store-shard/shard-ids", Value::Null).await;
        assert_eq!(body["shard-ids"], json!([1]));
        let (_, body) = call(&router, "GET", "/key-value-store-shard/node-shard-id", Value::Null).await;
        assert_eq!(body["shard-id"], 1);
        let (_, body) = call(
            &router,
            "GET",
            "/key-value-store-shard/shard-id-members/1",
            Value::Null,
        )
        .await;
        assert_eq!(body["shard-id-members"], "a:1");
        let (status, _) = call(
            &router,
            "GET",
            "/key-value-store-shard/shard-id-members/4",
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (_, body) = call(&router, "GET", "/key-value-store-shard/get-info", Value::Null).await;
        assert_eq!(body["shard-count"], 1);
    }

    #[tokio::test]
    async fn test_gossip_and_request_id() {
        let router = solo_router().await;
        let request = Request::builder()
            .uri("/gossip")
            .header("X-Request-ID", "abc")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-Request-ID"], "abc");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Alive");
    }
}
