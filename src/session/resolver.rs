use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use tracing::{debug, warn};

use super::token::TokenConfig;
use super::types::Identity;

/// Maps an incoming request to the identity it is authenticated as
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `None` means the request is not authenticated
    async fn resolve(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// Resolves identities from a JWT in `Authorization: Bearer <token>`, or in
/// `Sec-WebSocket-Protocol` for browser clients that cannot set headers.
pub struct JwtIdentityResolver {
    tokens: TokenConfig,
}

impl JwtIdentityResolver {
    pub fn new(tokens: TokenConfig) -> Self {
        Self { tokens }
    }

    fn extract_token(headers: &HeaderMap) -> Option<&str> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        bearer.or_else(|| {
            headers
                .get(header::SEC_WEBSOCKET_PROTOCOL)
                .and_then(|h| h.to_str().ok())
        })
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Identity> {
        let Some(token) = Self::extract_token(headers) else {
            debug!("No identity token on request");
            return None;
        };

        match self.tokens.validate_token(token.trim()) {
            Ok(claims) => Identity::new(claims.username),
            Err(e) => {
                warn!(error = %e, "Rejected identity token");
                None
            }
        }
    }
}
