//! Admin HTTP API: CRUD on applications, nodes and node-sessions, plus
//! read-only gateway state.

mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::client::Client;
use crate::error::Result;

pub fn router(client: Arc<Client>) -> Router {
    Router::new()
        .route("/api/application", post(handlers::create_application))
        .route(
            "/api/application/:id",
            get(handlers::get_application)
                .put(handlers::update_application)
                .delete(handlers::delete_application),
        )
        .route("/api/node", post(handlers::create_node))
        .route(
            "/api/node/:id",
            get(handlers::get_node)
                .put(handlers::update_node)
                .delete(handlers::delete_node),
        )
        .route("/api/nodesession", post(handlers::create_node_session))
        .route(
            "/api/nodesession/:id",
            get(handlers::get_node_session)
                .put(handlers::update_node_session)
                .delete(handlers::delete_node_session),
        )
        .route("/api/gateway/:id", get(handlers::get_gateway))
        .with_state(client)
}

/// Serve the admin API on all interfaces.
pub async fn serve(client: Arc<Client>, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "admin http api started");
    axum::serve(listener, router(client)).await?;
    Ok(())
}
