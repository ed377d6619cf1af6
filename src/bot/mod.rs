//! # Bot Module
//!
//! Discord front end for blothera.
//!
//! - Prefix commands (`b!play`, `b!queue`, ...) read from `message` events
//! - Voice state tracking to pause a session nobody is listening to
//! - Session notices posted back to text channels
//!
//! All playback state lives in the per-guild sessions of
//! [`SessionRegistry`]; this module only translates between Discord and them.

use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info};

pub mod announcer;
pub mod commands;
pub mod handlers;

use crate::{audio::registry::SessionRegistry, config::Config, sources::TrackResolver};

/// Main Discord event handler.
pub struct Blothera {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    /// One playback session per guild
    sessions: Arc<SessionRegistry>,
    /// Turns command arguments into tracks
    resolver: TrackResolver,
}

impl Blothera {
    pub fn new(config: Arc<Config>, sessions: Arc<SessionRegistry>, resolver: TrackResolver) -> Self {
        Self {
            config,
            sessions,
            resolver,
        }
    }

    /// Listeners (everyone but the bot) in the bot's voice channel, when this
    /// update concerns that channel.
    fn listeners_in_bot_channel(
        ctx: &Context,
        guild_id: GuildId,
        bot_id: UserId,
        touched: [Option<ChannelId>; 2],
    ) -> Option<usize> {
        let bot_channel = handlers::author_voice_channel(ctx, guild_id, bot_id)?;
        if !touched.contains(&Some(bot_channel)) {
            return None;
        }

        let guild = ctx.cache.guild(guild_id)?;
        let listeners = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(bot_channel) && state.user_id != bot_id)
            .count();
        Some(listeners)
    }
}

#[async_trait]
impl EventHandler for Blothera {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!(
            "📊 Connected to {} servers, listening for '{}' commands",
            ready.guilds.len(),
            self.config.command_prefix
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.guild_id.is_none() {
            return;
        }

        let Some(parsed) = commands::parse(&msg.content, &self.config.command_prefix) else {
            return;
        };

        let result = match parsed {
            Ok(command) => handlers::handle_command(&ctx, &msg, command, self).await,
            Err(usage) => msg
                .channel_id
                .say(&ctx.http, usage.to_string())
                .await
                .map(|_| ())
                .map_err(Into::into),
        };

        if let Err(e) = result {
            error!("Error handling command: {:?}", e);
        }
    }

    /// Pauses playback when the bot is left alone in its voice channel and
    /// resumes it when someone joins again.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(session) = self.sessions.existing(guild_id) else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id {
            return;
        }

        let touched = [old.and_then(|state| state.channel_id), new.channel_id];
        let Some(listeners) = Self::listeners_in_bot_channel(&ctx, guild_id, bot_id, touched) else {
            return;
        };

        debug!("👥 {} listeners left in guild {}", listeners, guild_id);
        handlers::sync_listeners(&session, listeners).await;
    }
}
