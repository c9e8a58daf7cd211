//! The daemon's HTTP API, served over a UNIX socket, and the client
//! the CLI uses to reach it. Error responses are `{kind, message}`
//! with 400/404/500 statuses per the error taxonomy.

pub mod client;
pub mod error;
pub mod server;

pub use client::Client;
pub use error::{status_of, ApiError, ErrorBody};
pub use server::{router, serve, AppState, FindBody, FindOptions};
