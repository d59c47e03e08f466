//! HTTP API for querying the copilot and managing conversation history.

mod history;
mod query;
mod server;
mod state;

pub use server::{router, start_http_server};
pub use state::ApiState;
