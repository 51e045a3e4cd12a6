//! A running node: cluster state, HTTP API and server

pub mod cluster;
pub mod http;
pub mod server;

pub use cluster::{ClusterNode, Route};
pub use http::create_router;
pub use server::{app, serve_on, NodeServer};
