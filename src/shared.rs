use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::ChatConfig;
use crate::event::EventBus;
use crate::room::ChatroomRegistry;
use crate::session::IdentityResolver;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChatroomRegistry>,
    pub event_bus: Arc<dyn EventBus>,
    pub identity_resolver: Arc<dyn IdentityResolver>,
    pub config: Arc<ChatConfig>,
    /// Flips to `true` when the process is shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        registry: Arc<ChatroomRegistry>,
        event_bus: Arc<dyn EventBus>,
        identity_resolver: Arc<dyn IdentityResolver>,
        config: Arc<ChatConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            event_bus,
            identity_resolver,
            config,
            shutdown,
        }
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    /// Malformed or unrecognized frame, either from a client or off the bus
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Presence store error: {0}")]
    Presence(String),

    #[error("Event bus unavailable after {attempts} attempts")]
    BusUnavailable { attempts: u32 },

    #[error("Forbidden")]
    Forbidden,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JWT error: {0}")]
    JwtError(String),
}

impl ChatError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ChatError::Protocol(msg.into())
    }

    pub fn bus(msg: impl Into<String>) -> Self {
        ChatError::Bus(msg.into())
    }

    pub fn presence(msg: impl Into<String>) -> Self {
        ChatError::Presence(msg.into())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ChatError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            ChatError::Protocol(msg) | ChatError::JwtError(msg) => (StatusCode::BAD_REQUEST, msg),
            ChatError::Bus(_) | ChatError::BusUnavailable { .. } | ChatError::Presence(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Chat backend unavailable".to_string(),
            ),
            ChatError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
