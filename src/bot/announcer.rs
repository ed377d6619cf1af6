use serenity::{
    async_trait,
    builder::CreateMessage,
    http::Http,
    model::id::ChannelId,
};
use std::sync::Arc;
use tracing::warn;

use crate::{
    audio::session::{Announcer, Notice},
    ui::embeds,
};

/// Posts session notices to Discord text channels.
pub struct ChannelAnnouncer {
    http: Arc<Http>,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn render(notice: Notice) -> CreateMessage {
    match notice {
        Notice::NowPlaying(track) => {
            CreateMessage::new().embed(embeds::create_now_playing_embed(&track))
        }
        Notice::TrackFailed { track, reason } => CreateMessage::new().embed(
            embeds::create_error_embed(&format!("Could not play **{}**: {}", track.title(), reason)),
        ),
        Notice::QueueConcluded => CreateMessage::new().content("Queue concluded."),
    }
}

#[async_trait]
impl Announcer for ChannelAnnouncer {
    async fn announce(&self, channel: ChannelId, notice: Notice) {
        if let Err(e) = channel.send_message(&*self.http, render(notice)).await {
            warn!("❌ Could not post to channel {}: {:?}", channel, e);
        }
    }
}
