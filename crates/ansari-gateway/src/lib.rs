//! HTTP API gateway for Ansari.
//!
//! Exposes thread CRUD plus a streaming message endpoint. Each request
//! builds a fresh agent from the shared read-only state and streams the
//! answer back as a chunked body.

pub mod routes;
pub mod server;
pub mod state;

pub use server::start_gateway;
pub use state::AppState;
