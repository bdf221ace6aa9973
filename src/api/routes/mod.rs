//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`operations`] - Operation inspection, cancellation, waiting and streams
//! - [`system`] - Health, events, OpenAPI

use serde::{Deserialize, Serialize};

mod operations;
mod system;

pub use operations::*;
pub use system::*;

/// Query parameters for GET /1.0/operations/:id/wait
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WaitQuery {
    /// Seconds to wait; absent or negative waits until the operation finishes
    pub timeout: Option<i64>,
}

impl WaitQuery {
    /// The timeout as a duration, `None` meaning no limit
    pub fn duration(&self) -> Option<std::time::Duration> {
        match self.timeout {
            Some(seconds) if seconds >= 0 => {
                Some(std::time::Duration::from_secs(seconds.unsigned_abs()))
            }
            _ => None,
        }
    }
}

/// Query parameters for GET /1.0/operations/:id/websocket
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WebsocketQuery {
    /// One of the channel secrets advertised in the operation metadata
    pub secret: String,
}
