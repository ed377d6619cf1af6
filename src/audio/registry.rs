use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    session::{Announcer, SessionScheduler, SessionStatus},
    transport::TransportConnector,
};
use crate::sources::TrackResolver;

/// One session per guild, created on first use and kept for the life of the
/// process.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionScheduler>,
    resolver: TrackResolver,
    connector: Arc<dyn TransportConnector>,
    announcer: Arc<dyn Announcer>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(
        resolver: TrackResolver,
        connector: Arc<dyn TransportConnector>,
        announcer: Arc<dyn Announcer>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            resolver,
            connector,
            announcer,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the guild's session, starting it if this is the first request.
    pub fn get(&self, guild_id: GuildId) -> SessionScheduler {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Starting music session for guild {}", guild_id);
                SessionScheduler::spawn(
                    guild_id,
                    self.resolver.clone(),
                    Arc::clone(&self.connector),
                    Arc::clone(&self.announcer),
                    self.shutdown.child_token(),
                )
            })
            .clone()
    }

    /// The session for `guild_id` if one was ever started.
    pub fn existing(&self, guild_id: GuildId) -> Option<SessionScheduler> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of every session, skipping any whose task is gone.
    pub async fn statuses(&self) -> Vec<SessionStatus> {
        // Clone the handles first; no map guard may be held across an await.
        let sessions: Vec<SessionScheduler> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();

        let mut statuses = Vec::with_capacity(sessions.len());
        for session in sessions {
            match session.status().await {
                Ok(status) => statuses.push(status),
                Err(e) => warn!("Session for guild {} unavailable: {}", session.guild_id(), e),
            }
        }
        statuses.sort_by_key(|s| s.guild_id);
        statuses
    }

    /// Stops every session driver.
    pub fn shutdown(&self) {
        info!("🛑 Shutting down {} music sessions", self.session_count());
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{session::Notice, transport::Transport},
        error::{MusicError, MusicResult},
        sources::{MockMediaFetcher, MockSearchBackend},
    };
    use async_trait::async_trait;
    use serenity::model::id::ChannelId;

    struct NoVoice;

    #[async_trait]
    impl TransportConnector for NoVoice {
        async fn connect(
            &self,
            _guild_id: GuildId,
            _destination: ChannelId,
        ) -> MusicResult<Box<dyn Transport>> {
            Err(MusicError::Transport("no voice in tests".to_string()))
        }
    }

    struct Silent;

    #[async_trait]
    impl Announcer for Silent {
        async fn announce(&self, _channel: ChannelId, _notice: Notice) {}
    }

    fn registry() -> SessionRegistry {
        let resolver = TrackResolver::new(
            Arc::new(MockSearchBackend::new()),
            Arc::new(MockMediaFetcher::new()),
        );
        SessionRegistry::new(resolver, Arc::new(NoVoice), Arc::new(Silent))
    }

    #[tokio::test]
    async fn one_session_per_guild() {
        let registry = registry();
        let first = registry.get(GuildId::new(1));
        let again = registry.get(GuildId::new(1));
        registry.get(GuildId::new(2));

        assert_eq!(registry.session_count(), 2);
        assert_eq!(first.guild_id(), again.guild_id());
        assert!(registry.existing(GuildId::new(3)).is_none());

        // Both handles reach the same driver.
        assert!(first.toggle_loop().await.is_err());
        assert!(again.current_track().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn statuses_cover_every_session() {
        let registry = registry();
        registry.get(GuildId::new(7));
        registry.get(GuildId::new(3));

        let guilds: Vec<GuildId> = registry
            .statuses()
            .await
            .into_iter()
            .map(|s| s.guild_id)
            .collect();
        assert_eq!(guilds, vec![GuildId::new(3), GuildId::new(7)]);
    }

    #[tokio::test]
    async fn shutdown_closes_sessions() {
        let registry = registry();
        let session = registry.get(GuildId::new(1));

        registry.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(matches!(
            session.current_track().await,
            Err(MusicError::SessionClosed)
        ));
        assert!(registry.statuses().await.is_empty());
    }
}
