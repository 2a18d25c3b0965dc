//! HTTP status API. Every handler goes through [`NodeHandle`], so the owner
//! loop stays the only writer of node state.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ledger_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{NodeError, NodeResult};
use crate::node::{ChainHead, NodeHandle};
use crate::protocol::PeerAddress;

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct BlocksParams {
    pub from: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    pub accepted: bool,
}

struct ApiError(NodeError);

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            NodeError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(node: NodeHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain/head", get(head))
        .route("/chain/blocks", get(blocks))
        .route("/peers", get(peers))
        .route("/tx", post(submit_transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serves the API until the node's owner loop stops.
pub async fn serve(listener: TcpListener, node: NodeHandle) -> NodeResult<()> {
    let addr = listener.local_addr()?;
    info!("HTTP API listening on http://{addr}");
    let stopped = node.clone();
    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move { stopped.stopped().await })
        .await?;
    Ok(())
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn head(State(node): State<NodeHandle>) -> ApiResult<ChainHead> {
    Ok(Json(node.head().await?))
}

async fn blocks(
    State(node): State<NodeHandle>,
    Query(params): Query<BlocksParams>,
) -> ApiResult<Vec<Block>> {
    Ok(Json(node.blocks(params.from).await?))
}

async fn peers(State(node): State<NodeHandle>) -> ApiResult<Vec<PeerAddress>> {
    Ok(Json(node.peers().await?))
}

async fn submit_transaction(
    State(node): State<NodeHandle>,
    Json(tx): Json<Transaction>,
) -> ApiResult<Accepted> {
    let accepted = node.submit_transaction(tx).await?;
    Ok(Json(Accepted { accepted }))
}
