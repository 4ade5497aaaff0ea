use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::presence::PresenceStore;
use crate::shared::ChatError;

/// Presence store backed by one Redis sorted set per room.
///
/// Members are identities, scores are last-touch unix timestamps. The
/// connection is opened on first use, so an unreachable Redis surfaces as a
/// presence error on that call rather than at construction.
pub struct RedisPresenceStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
}

impl RedisPresenceStore {
    /// Validates `url` without connecting
    pub fn new(url: &str, key_prefix: impl Into<String>) -> Result<Self, ChatError> {
        let client = redis::Client::open(url)
            .map_err(|e| ChatError::Config(format!("Invalid Redis URL: {e}")))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, room: &str) -> String {
        format!("{}{}", self.key_prefix, room)
    }

    async fn connection(&self) -> Result<ConnectionManager, ChatError> {
        self.connection
            .get_or_try_init(|| async {
                let connection = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| ChatError::presence(format!("Failed to connect: {e}")))?;
                info!(key_prefix = %self.key_prefix, "Connected Redis presence store");
                Ok::<_, ChatError>(connection)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    #[instrument(skip(self))]
    async fn touch(&self, room: &str, identity: &str, at: i64) -> Result<(), ChatError> {
        let mut connection = self.connection().await?;
        connection
            .zadd::<_, _, _, ()>(self.key(room), identity, at)
            .await
            .map_err(|e| ChatError::presence(format!("ZADD failed: {e}")))?;

        debug!(room = %room, username = %identity, at, "Presence touched");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn expire(&self, room: &str, identity: &str, at: i64) -> Result<(), ChatError> {
        let mut connection = self.connection().await?;
        // XX: only rescore a member that is already there
        let _: i64 = redis::cmd("ZADD")
            .arg(self.key(room))
            .arg("XX")
            .arg(at)
            .arg(identity)
            .query_async(&mut connection)
            .await
            .map_err(|e| ChatError::presence(format!("ZADD XX failed: {e}")))?;

        debug!(room = %room, username = %identity, at, "Presence expired");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn members_since(&self, room: &str, since: i64) -> Result<Vec<String>, ChatError> {
        let mut connection = self.connection().await?;
        connection
            .zrangebyscore(self.key(room), since, "+inf")
            .await
            .map_err(|e| ChatError::presence(format!("ZRANGEBYSCORE failed: {e}")))
    }
}
