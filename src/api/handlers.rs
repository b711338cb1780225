//! Request handlers for the admin API.
//!
//! Conventions: 201 on create, 204 on update/delete, 200 with the entity
//! JSON on read. Malformed bodies, identifier length mismatches and
//! URL/body identifier disagreements are 400; missing objects are 404.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::client::Client;
use crate::error::Error;
use crate::lorawan::{DevAddr, Eui64};
use crate::store::{Application, Gateway, Node, NodeSession};

/// Error body: `{"code": <status>, "message": <string>}`.
pub struct ApiError {
    code: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code.as_u16(),
            "message": self.message,
        });
        (self.code, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let code = match e {
            Error::ObjectExists | Error::InvalidId(_) => StatusCode::BAD_REQUEST,
            Error::ObjectDoesNotExist => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn entity<T: Serialize>(value: T) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

// --- applications

pub async fn create_application(
    State(client): State<Arc<Client>>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let app: Application = parse_body(&body)?;
    client.applications().create(&app).await?;
    info!(app_eui = %app.app_eui, "application created");
    Ok(StatusCode::CREATED)
}

pub async fn get_application(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let app_eui: Eui64 = id.parse()?;
    Ok(entity(client.applications().get(app_eui).await?))
}

pub async fn update_application(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let app_eui: Eui64 = id.parse()?;
    let app: Application = parse_body(&body)?;
    if app.app_eui != app_eui {
        return Err(ApiError::bad_request(
            "AppEUI in url should match AppEUI in request body",
        ));
    }
    client.applications().update(&app).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_application(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let app_eui: Eui64 = id.parse()?;
    client.applications().delete(app_eui).await?;
    info!(app_eui = %app_eui, "application deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- nodes

pub async fn create_node(
    State(client): State<Arc<Client>>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let node: Node = parse_body(&body)?;
    client.nodes().create(&node).await?;
    info!(dev_eui = %node.dev_eui, "node created");
    Ok(StatusCode::CREATED)
}

pub async fn get_node(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let dev_eui: Eui64 = id.parse()?;
    Ok(entity(client.nodes().get(dev_eui).await?))
}

pub async fn update_node(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let dev_eui: Eui64 = id.parse()?;
    let node: Node = parse_body(&body)?;
    if node.dev_eui != dev_eui {
        return Err(ApiError::bad_request(
            "DevEUI in url should match DevEUI in request body",
        ));
    }
    client.nodes().update(&node).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_node(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let dev_eui: Eui64 = id.parse()?;
    client.nodes().delete(dev_eui).await?;
    info!(dev_eui = %dev_eui, "node deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- node-sessions

pub async fn create_node_session(
    State(client): State<Arc<Client>>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let session: NodeSession = parse_body(&body)?;
    client.node_sessions().create(&session).await?;
    info!(dev_addr = %session.dev_addr, "node-session created");
    Ok(StatusCode::CREATED)
}

pub async fn get_node_session(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let dev_addr: DevAddr = id.parse()?;
    Ok(entity(client.node_sessions().get(dev_addr).await?))
}

pub async fn update_node_session(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let dev_addr: DevAddr = id.parse()?;
    let session: NodeSession = parse_body(&body)?;
    if session.dev_addr != dev_addr {
        return Err(ApiError::bad_request(
            "DevAddr in url should match DevAddr in request body",
        ));
    }
    client.node_sessions().update(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_node_session(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let dev_addr: DevAddr = id.parse()?;
    client.node_sessions().delete(dev_addr).await?;
    info!(dev_addr = %dev_addr, "node-session deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- gateways (read-only, written by the gateway back-end)

pub async fn get_gateway(
    State(client): State<Arc<Client>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let mac: Eui64 = id.parse()?;
    let gw: Gateway = client.gateways().get(mac).await?;
    Ok(entity(gw))
}
