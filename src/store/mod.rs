//! Durable entities and their storage-backed repositories.

mod application;
mod gateway;
mod node;
mod node_session;

pub use application::{Application, ApplicationStore};
pub use gateway::{Gateway, GatewayStore, UDP_ADDR_CONFIG_KEY};
pub use node::{Node, NodeStore};
pub use node_session::{NodeSession, NodeSessionStore, MAX_FCNT_GAP};
