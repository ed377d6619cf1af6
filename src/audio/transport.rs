use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::HttpRequest,
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
    error::{MusicError, MusicResult},
    sources::Playable,
};

/// One-shot "track finished" signal handed to the transport.
///
/// The transport may fire it from any thread; it only forwards a message to
/// the owning session and never touches session state itself.
pub struct CompletionNotifier {
    notify: Box<dyn FnOnce() + Send + 'static>,
}

impl CompletionNotifier {
    pub fn new(notify: impl FnOnce() + Send + 'static) -> Self {
        Self {
            notify: Box::new(notify),
        }
    }

    pub fn notify(self) {
        (self.notify)()
    }
}

impl std::fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompletionNotifier")
    }
}

/// A voice connection that can stream one source at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    fn destination(&self) -> ChannelId;

    /// Moves the connection to another voice channel of the same guild.
    async fn migrate(&mut self, destination: ChannelId) -> MusicResult<()>;

    /// Starts streaming `source`; `on_complete` fires once when it ends,
    /// whether naturally, by error, or because of [`Transport::stop`].
    async fn play(&mut self, source: &Playable, on_complete: CompletionNotifier) -> MusicResult<()>;

    async fn stop(&mut self);

    async fn pause(&mut self);

    async fn resume(&mut self);

    async fn is_active(&self) -> bool;
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        destination: ChannelId,
    ) -> MusicResult<Box<dyn Transport>>;
}

/// Connects through the songbird voice manager registered on the client.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    volume: f32,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, volume: f32) -> Self {
        Self {
            manager,
            http,
            volume,
        }
    }
}

#[async_trait]
impl TransportConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        destination: ChannelId,
    ) -> MusicResult<Box<dyn Transport>> {
        let call = self
            .manager
            .join(guild_id, destination)
            .await
            .map_err(|e| {
                error!("❌ Could not join voice channel {}: {:?}", destination, e);
                MusicError::Transport(e.to_string())
            })?;

        info!("🔊 Connected to voice channel {} in guild {}", destination, guild_id);
        Ok(Box::new(SongbirdTransport {
            manager: Arc::clone(&self.manager),
            guild_id,
            destination,
            call,
            current: None,
            http: self.http.clone(),
            volume: self.volume,
        }))
    }
}

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    destination: ChannelId,
    call: Arc<Mutex<Call>>,
    current: Option<TrackHandle>,
    http: reqwest::Client,
    volume: f32,
}

#[async_trait]
impl Transport for SongbirdTransport {
    fn destination(&self) -> ChannelId {
        self.destination
    }

    async fn migrate(&mut self, destination: ChannelId) -> MusicResult<()> {
        self.call = self
            .manager
            .join(self.guild_id, destination)
            .await
            .map_err(|e| MusicError::Transport(e.to_string()))?;
        self.destination = destination;
        info!("🔀 Moved to voice channel {} in guild {}", destination, self.guild_id);
        Ok(())
    }

    async fn play(&mut self, source: &Playable, on_complete: CompletionNotifier) -> MusicResult<()> {
        let input = HttpRequest::new(self.http.clone(), source.stream_url.clone());
        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input.into())
        };
        let _ = handle.set_volume(self.volume);

        // End and Error both finish the slot; whichever fires first wins.
        let notifier = Arc::new(SyncMutex::new(Some(on_complete)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackCompletion {
                        guild_id: self.guild_id,
                        notifier: Arc::clone(&notifier),
                    },
                )
                .map_err(|e| MusicError::Transport(e.to_string()))?;
        }

        self.current = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(track) = self.current.take() {
            let _ = track.stop();
            info!("⏹️ Playback stopped in guild {}", self.guild_id);
        }
    }

    async fn pause(&mut self) {
        if let Some(track) = &self.current {
            let _ = track.pause();
            info!("⏸️ Playback paused in guild {}", self.guild_id);
        }
    }

    async fn resume(&mut self) {
        if let Some(track) = &self.current {
            let _ = track.play();
            info!("▶️ Playback resumed in guild {}", self.guild_id);
        }
    }

    async fn is_active(&self) -> bool {
        match &self.current {
            Some(track) => track
                .get_info()
                .await
                .map(|info| !info.playing.is_done())
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Runs on songbird's event task when the current track ends.
struct TrackCompletion {
    guild_id: GuildId,
    notifier: Arc<SyncMutex<Option<CompletionNotifier>>>,
}

impl TrackCompletion {
    fn complete(&self) {
        let notifier = self.notifier.lock().take();
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

#[async_trait]
impl VoiceEventHandler for TrackCompletion {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track finished in guild {}", self.guild_id);
        self.complete();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn shared_notifier_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let shared = Arc::new(SyncMutex::new(Some(CompletionNotifier::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))));
        let handler = |shared: &Arc<SyncMutex<Option<CompletionNotifier>>>| TrackCompletion {
            guild_id: GuildId::new(1),
            notifier: Arc::clone(shared),
        };

        // End and Error both fire for a failed track.
        handler(&shared).complete();
        handler(&shared).complete();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(shared.lock().is_none());
    }
}
