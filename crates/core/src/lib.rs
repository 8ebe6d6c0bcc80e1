pub mod config;
pub mod models;
pub mod util;

use serde::Serialize;

/// JSON body returned by the webhook endpoint, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct ApiMessage {
    pub error: bool,
    pub message: String,
}

impl ApiMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { error: false, message: message.into() }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { error: true, message: message.into() }
    }
}
