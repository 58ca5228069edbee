#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! hookline server: the management HTTP surface.
//!
//! Exposes subscription CRUD, test deliveries, delivery history and
//! statistics, the event log with replay, dead-letter operations and
//! health probes over axum. Authentication and rate limiting belong to
//! the embedding deployment (reverse proxy or gateway); this crate owns
//! the handlers and the structured error body.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
