use super::Transport;
use crate::error::KvError;
use crate::replication::{GossipEcho, GossipPush, Node, VectorClock, ViewChangeRequest};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Request/response body for /read and /write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvPayload {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(
        rename = "causal-context",
        default,
        deserialize_with = "lenient_context",
        skip_serializing_if = "VectorClock::is_empty"
    )]
    pub context: VectorClock,
}

/// Error body. Carries the existing column for AlreadyExists and the
/// preserved context for NotFound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(
        rename = "causal-context",
        default,
        deserialize_with = "lenient_context",
        skip_serializing_if = "VectorClock::is_empty"
    )]
    pub context: VectorClock,
}

/// The causal context is opaque to callers: null, absent, and unknown
/// shapes all fall back to the empty clock.
fn lenient_context<'de, D: Deserializer<'de>>(d: D) -> Result<VectorClock, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn error_response(err: &KvError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match err {
        KvError::NotFound { key, context } => ErrorBody {
            error: err.to_string(),
            key: key.clone(),
            context: context.clone(),
            ..ErrorBody::default()
        },
        KvError::AlreadyExists {
            key,
            value,
            context,
        } => ErrorBody {
            error: err.to_string(),
            key: key.clone(),
            value: value.clone(),
            context: context.clone(),
        },
        _ => ErrorBody {
            error: err.to_string(),
            ..ErrorBody::default()
        },
    };
    (status, Json(body)).into_response()
}

async fn read_handler(State(node): State<Arc<Node>>, Json(req): Json<KvPayload>) -> Response {
    match node.replica().read(&req.key, &req.context) {
        Ok((value, context)) => Json(KvPayload {
            key: req.key,
            value,
            context,
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn write_handler(State(node): State<Arc<Node>>, Json(req): Json<KvPayload>) -> Response {
    match node.replica().write(&req.key, &req.value, &req.context) {
        Ok(context) => Json(KvPayload {
            key: req.key,
            value: req.value,
            context,
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn view_change_handler(
    State(node): State<Arc<Node>>,
    Json(req): Json<ViewChangeRequest>,
) -> Response {
    match node.handle_view_change(req).await {
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn gossip_handler(State(node): State<Arc<Node>>, Json(push): Json<GossipPush>) -> Response {
    Json(node.handle_gossip(push)).into_response()
}

/// The four-endpoint router over a node.
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/read", get(read_handler))
        .route("/write", put(write_handler))
        .route("/view-change", put(view_change_handler))
        .route("/gossip", put(gossip_handler))
        .with_state(node)
}

/// Bind and serve until the token is cancelled.
pub async fn serve(
    node: Arc<Node>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, replica = %node.name(), "listening");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

/// HTTP transport speaking the §6 wire protocol to peers.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
        }
    }

    fn url(target: &str, path: &str) -> String {
        format!("{}{}", target.trim_end_matches('/'), path)
    }

    /// Decode a non-2xx response into the typed error the remote raised.
    async fn decode_error(key: &str, response: reqwest::Response) -> KvError {
        let status = response.status().as_u16();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        match status {
            503 => KvError::ContextUnsatisfied,
            404 => KvError::NotFound {
                key: if body.key.is_empty() {
                    key.to_string()
                } else {
                    body.key
                },
                context: body.context,
            },
            400 if !body.value.is_empty() => KvError::AlreadyExists {
                key: body.key,
                value: body.value,
                context: body.context,
            },
            400 => KvError::BadRequest(body.error),
            _ => KvError::Transport(format!("status {}: {}", status, body.error)),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn read(
        &self,
        origin: &str,
        target: &str,
        key: &str,
        ctx: &VectorClock,
    ) -> Result<(String, VectorClock), KvError> {
        let request = KvPayload {
            key: key.to_string(),
            value: String::new(),
            context: ctx.clone(),
        };
        let response = self
            .client
            .get(Self::url(target, "/read"))
            .header(reqwest::header::USER_AGENT, origin)
            .json(&request)
            .send()
            .await
            .map_err(|err| KvError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::decode_error(key, response).await);
        }
        let body: KvPayload = response
            .json()
            .await
            .map_err(|err| KvError::Transport(err.to_string()))?;
        Ok((body.value, body.context))
    }

    async fn write(
        &self,
        origin: &str,
        target: &str,
        key: &str,
        value: &str,
        ctx: &VectorClock,
    ) -> Result<VectorClock, KvError> {
        let request = KvPayload {
            key: key.to_string(),
            value: value.to_string(),
            context: ctx.clone(),
        };
        let response = self
            .client
            .put(Self::url(target, "/write"))
            .header(reqwest::header::USER_AGENT, origin)
            .json(&request)
            .send()
            .await
            .map_err(|err| KvError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::decode_error(key, response).await);
        }
        let body: KvPayload = response
            .json()
            .await
            .map_err(|err| KvError::Transport(err.to_string()))?;
        Ok(body.context)
    }

    async fn gossip(
        &self,
        origin: &str,
        target: &str,
        push: GossipPush,
    ) -> Result<GossipEcho, KvError> {
        let response = self
            .client
            .put(Self::url(target, "/gossip"))
            .header(reqwest::header::USER_AGENT, origin)
            .json(&push)
            .send()
            .await
            .map_err(|err| KvError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::decode_error("", response).await);
        }
        response
            .json()
            .await
            .map_err(|err| KvError::Transport(err.to_string()))
    }

    async fn view_change(
        &self,
        origin: &str,
        target: &str,
        req: ViewChangeRequest,
    ) -> Result<(), KvError> {
        let response = self
            .client
            .put(Self::url(target, "/view-change"))
            .header(reqwest::header::USER_AGENT, origin)
            .json(&req)
            .send()
            .await
            .map_err(|err| KvError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::decode_error("", response).await);
        }
        Ok(())
    }
}
