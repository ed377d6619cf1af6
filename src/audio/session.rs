//! Per-guild playback session.
//!
//! A session is a single tokio task that owns the queue, the current track and
//! the voice transport. Everything that wants to touch that state sends a
//! [`Message`]: command handlers through [`SessionScheduler`], the blocking
//! fetch when a track is materialized, and the transport when a track ends.
//! Nothing else holds a reference to the state, so no locking is needed.
//!
//! The driver is an explicit state machine:
//!
//! - **Idle**: nothing is current. Adding a song starts the next slot.
//! - **Playing**: a track is current, either still being materialized or
//!   streaming through the transport.
//! - **Draining**: the queue ran dry after a completion; the last channel is
//!   told and the session falls back to Idle.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    queue::{PlayQueue, QueuePage},
    transport::{CompletionNotifier, Transport, TransportConnector},
};
use crate::{
    error::{MusicError, MusicResult, ResolutionError},
    sources::{Requester, Track, TrackResolver},
};

/// Where a request came from: who asked, and which text channel hears about it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub channel: ChannelId,
    pub requester: Requester,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Draining,
}

/// Status updates a session posts to text channels.
#[derive(Debug, Clone)]
pub enum Notice {
    NowPlaying(Arc<Track>),
    TrackFailed { track: Arc<Track>, reason: String },
    QueueConcluded,
}

#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, channel: ChannelId, notice: Notice);
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub guild_id: GuildId,
    pub state: PlaybackState,
    pub queued: usize,
    pub shuffled: bool,
    pub looping: bool,
    pub transport_active: bool,
}

type Reply<T> = oneshot::Sender<T>;

enum Message {
    Join {
        destination: ChannelId,
        reply: Reply<MusicResult<()>>,
    },
    AddSong {
        track: Track,
        bulk: bool,
        context: RequestContext,
        reply: Reply<bool>,
    },
    FinishBatch,
    Skip(Reply<MusicResult<()>>),
    Stop(Reply<MusicResult<()>>),
    Pause(Reply<MusicResult<()>>),
    Resume(Reply<MusicResult<()>>),
    Shuffle(Reply<MusicResult<bool>>),
    Loop(Reply<MusicResult<bool>>),
    Current(Reply<Option<Arc<Track>>>),
    Visible(Reply<Vec<Arc<Track>>>),
    Page {
        page: usize,
        reply: Reply<MusicResult<QueuePage>>,
    },
    Status(Reply<SessionStatus>),
    Materialized {
        ticket: u64,
        result: Result<(), ResolutionError>,
    },
    TrackEnded {
        ticket: u64,
    },
}

/// The single playback slot. Tickets tie late messages to the slot they
/// were issued for; anything carrying an older ticket is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Loading { ticket: u64, cancelled: bool },
    Streaming { ticket: u64 },
}

/// Cheap handle to a running session.
#[derive(Clone)]
pub struct SessionScheduler {
    guild_id: GuildId,
    mailbox: mpsc::UnboundedSender<Message>,
}

impl SessionScheduler {
    /// Starts the session task for `guild_id`.
    ///
    /// The task runs until `shutdown` is cancelled or every handle is dropped.
    pub fn spawn(
        guild_id: GuildId,
        resolver: TrackResolver,
        connector: Arc<dyn TransportConnector>,
        announcer: Arc<dyn Announcer>,
        shutdown: CancellationToken,
    ) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();

        // Notices are posted in order from their own task, off the driver.
        let (notices, mut outbox) = mpsc::unbounded_channel::<(ChannelId, Notice)>();
        tokio::spawn(async move {
            while let Some((channel, notice)) = outbox.recv().await {
                announcer.announce(channel, notice).await;
            }
        });

        let driver = SessionDriver {
            guild_id,
            state: PlaybackState::Idle,
            queue: PlayQueue::new(),
            current: None,
            slot: Slot::Empty,
            last_ticket: 0,
            transport: None,
            allow_bulk: true,
            batch_in_flight: false,
            failed: Vec::new(),
            resolver,
            connector,
            notices,
            mailbox: mailbox.downgrade(),
        };
        tokio::spawn(driver.run(inbox, shutdown));

        Self { guild_id, mailbox }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    async fn request<T>(&self, message: impl FnOnce(Reply<T>) -> Message) -> MusicResult<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(message(reply))
            .map_err(|_| MusicError::SessionClosed)?;
        response.await.map_err(|_| MusicError::SessionClosed)
    }

    /// Connects to `destination`, moving an existing connection if needed.
    pub async fn join_channel(&self, destination: ChannelId) -> MusicResult<()> {
        self.request(|reply| Message::Join { destination, reply })
            .await?
    }

    /// Queues `track` on behalf of `context`.
    ///
    /// Returns `false` when a bulk add was vetoed by a `stop()` issued during
    /// the batch; bulk callers should abandon the rest of it and then call
    /// [`SessionScheduler::finish_batch`].
    pub async fn add_song(
        &self,
        track: Track,
        bulk: bool,
        context: RequestContext,
    ) -> MusicResult<bool> {
        self.request(|reply| Message::AddSong {
            track,
            bulk,
            context,
            reply,
        })
        .await
    }

    /// Marks the end of a bulk add, so a later `stop()` no longer vetoes it.
    pub fn finish_batch(&self) -> MusicResult<()> {
        self.mailbox
            .send(Message::FinishBatch)
            .map_err(|_| MusicError::SessionClosed)
    }

    pub async fn skip(&self) -> MusicResult<()> {
        self.request(Message::Skip).await?
    }

    /// Clears the queue and stops the current track.
    pub async fn stop(&self) -> MusicResult<()> {
        self.request(Message::Stop).await?
    }

    pub async fn pause(&self) -> MusicResult<()> {
        self.request(Message::Pause).await?
    }

    pub async fn resume(&self) -> MusicResult<()> {
        self.request(Message::Resume).await?
    }

    pub async fn shuffle(&self) -> MusicResult<bool> {
        self.request(Message::Shuffle).await?
    }

    pub async fn toggle_loop(&self) -> MusicResult<bool> {
        self.request(Message::Loop).await?
    }

    pub async fn current_track(&self) -> MusicResult<Option<Arc<Track>>> {
        self.request(Message::Current).await
    }

    pub async fn visible_queue(&self) -> MusicResult<Vec<Arc<Track>>> {
        self.request(Message::Visible).await
    }

    pub async fn page(&self, page: usize) -> MusicResult<QueuePage> {
        self.request(|reply| Message::Page { page, reply }).await?
    }

    pub async fn status(&self) -> MusicResult<SessionStatus> {
        self.request(Message::Status).await
    }
}

struct SessionDriver {
    guild_id: GuildId,
    state: PlaybackState,
    queue: PlayQueue,
    current: Option<Arc<Track>>,
    slot: Slot,
    last_ticket: u64,
    transport: Option<Box<dyn Transport>>,
    allow_bulk: bool,
    batch_in_flight: bool,
    /// Tracks that failed since the last one that actually started.
    failed: Vec<Arc<Track>>,
    resolver: TrackResolver,
    connector: Arc<dyn TransportConnector>,
    notices: mpsc::UnboundedSender<(ChannelId, Notice)>,
    /// Weak so the session's own pending work does not keep it alive.
    mailbox: mpsc::WeakUnboundedSender<Message>,
}

impl SessionDriver {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>, shutdown: CancellationToken) {
        debug!("Session driver started for guild {}", self.guild_id);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
            }
        }

        if let Some(transport) = self.transport.as_mut() {
            transport.stop().await;
        }
        info!("👋 Session for guild {} shut down", self.guild_id);
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Join { destination, reply } => {
                let _ = reply.send(self.join_channel(destination).await);
            }
            Message::AddSong {
                track,
                bulk,
                context,
                reply,
            } => {
                let accepted = self.add_song(track, bulk, context).await;
                let _ = reply.send(accepted);
            }
            Message::FinishBatch => self.batch_in_flight = false,
            Message::Skip(reply) => {
                let _ = reply.send(self.skip().await);
            }
            Message::Stop(reply) => {
                let _ = reply.send(self.stop().await);
            }
            Message::Pause(reply) => {
                let _ = reply.send(self.pause().await);
            }
            Message::Resume(reply) => {
                let _ = reply.send(self.resume().await);
            }
            Message::Shuffle(reply) => {
                let _ = reply.send(self.shuffle());
            }
            Message::Loop(reply) => {
                let _ = reply.send(self.toggle_loop());
            }
            Message::Current(reply) => {
                let _ = reply.send(self.current.clone());
            }
            Message::Visible(reply) => {
                let _ = reply.send(self.queue.visible().to_vec());
            }
            Message::Page { page, reply } => {
                let _ = reply.send(self.queue.page(page));
            }
            Message::Status(reply) => {
                let _ = reply.send(self.status().await);
            }
            Message::Materialized { ticket, result } => self.on_materialized(ticket, result).await,
            Message::TrackEnded { ticket } => self.on_track_ended(ticket).await,
        }
    }

    async fn join_channel(&mut self, destination: ChannelId) -> MusicResult<()> {
        match self.transport.as_mut() {
            Some(transport) if transport.destination() == destination => Ok(()),
            Some(transport) => transport.migrate(destination).await,
            None => {
                let transport = self.connector.connect(self.guild_id, destination).await?;
                self.transport = Some(transport);
                Ok(())
            }
        }
    }

    async fn add_song(&mut self, mut track: Track, bulk: bool, context: RequestContext) -> bool {
        if bulk && !self.allow_bulk {
            // The rejected attempt re-arms the latch for the next batch.
            self.allow_bulk = true;
            self.batch_in_flight = false;
            info!("🚫 Bulk add vetoed by stop in guild {}", self.guild_id);
            return false;
        }
        self.allow_bulk = true;
        if bulk {
            self.batch_in_flight = true;
        }

        track.stamp(context.channel, context.requester);
        let track = Arc::new(track);
        info!("➕ Added to queue: {}", track.title());
        self.queue.add(track);

        if self.current.is_none() {
            self.advance().await;
        }
        true
    }

    async fn skip(&mut self) -> MusicResult<()> {
        match &mut self.slot {
            Slot::Streaming { .. } => {
                // The transport reports the end like any other completion.
                if let Some(transport) = self.transport.as_mut() {
                    transport.stop().await;
                }
                Ok(())
            }
            Slot::Loading { cancelled, .. } => {
                *cancelled = true;
                Ok(())
            }
            Slot::Empty => Err(MusicError::MusicNotPlaying),
        }
    }

    async fn stop(&mut self) -> MusicResult<()> {
        if self.slot == Slot::Empty {
            return Err(MusicError::MusicNotPlaying);
        }

        if self.batch_in_flight {
            self.allow_bulk = false;
        }
        self.queue.clear();
        self.skip().await
    }

    async fn pause(&mut self) -> MusicResult<()> {
        match (self.slot, self.transport.as_mut()) {
            (Slot::Streaming { .. }, Some(transport)) => {
                transport.pause().await;
                Ok(())
            }
            _ => Err(MusicError::MusicNotPlaying),
        }
    }

    async fn resume(&mut self) -> MusicResult<()> {
        match (self.slot, self.transport.as_mut()) {
            (Slot::Streaming { .. }, Some(transport)) => {
                transport.resume().await;
                Ok(())
            }
            _ => Err(MusicError::MusicNotPlaying),
        }
    }

    fn shuffle(&mut self) -> MusicResult<bool> {
        if self.queue.is_empty() && self.current.is_none() {
            return Err(MusicError::QueueEmpty);
        }
        Ok(self.queue.toggle_shuffle())
    }

    fn toggle_loop(&mut self) -> MusicResult<bool> {
        if self.queue.is_empty() && self.current.is_none() {
            return Err(MusicError::QueueEmpty);
        }
        self.queue.toggle_loop(self.current.as_ref())
    }

    async fn status(&self) -> SessionStatus {
        let transport_active = match &self.transport {
            Some(transport) => transport.is_active().await,
            None => false,
        };

        SessionStatus {
            guild_id: self.guild_id,
            state: self.state,
            queued: self.queue.len(),
            shuffled: self.queue.is_shuffled(),
            looping: self.queue.is_looping(),
            transport_active,
        }
    }

    /// Fills the playback slot with the next track, or drains.
    async fn advance(&mut self) {
        self.queue.refill_from_loop();
        let Some(next) = self.queue.peek_next().cloned() else {
            return self.drain().await;
        };
        if self.failed.iter().any(|t| Arc::ptr_eq(t, &next)) {
            // Came round the loop without a single track starting.
            warn!(
                "🔁 Nothing in the loop of guild {} could be played, stopping",
                self.guild_id
            );
            self.queue.clear();
            return self.drain().await;
        }

        self.last_ticket += 1;
        let ticket = self.last_ticket;
        self.state = PlaybackState::Playing;
        self.current = Some(Arc::clone(&next));
        self.slot = Slot::Loading {
            ticket,
            cancelled: false,
        };
        debug!(
            "Loading '{}' ({:?}) in guild {} (ticket {})",
            next.title(),
            next.state(),
            self.guild_id,
            ticket
        );

        let resolver = self.resolver.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let result = resolver.materialize(&next).await;
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Message::Materialized { ticket, result });
            }
        });
    }

    async fn drain(&mut self) {
        self.state = PlaybackState::Draining;
        self.slot = Slot::Empty;

        if let Some(channel) = self.current.as_ref().and_then(|t| t.channel()) {
            self.announce(channel, Notice::QueueConcluded);
        }
        info!("📭 Queue concluded in guild {}", self.guild_id);

        self.current = None;
        self.failed.clear();
        self.state = PlaybackState::Idle;
    }

    async fn on_materialized(&mut self, ticket: u64, result: Result<(), ResolutionError>) {
        let Slot::Loading {
            ticket: expected,
            cancelled,
        } = self.slot
        else {
            return;
        };
        if expected != ticket {
            return;
        }
        let Some(track) = self.current.clone() else {
            return;
        };

        self.queue.remove(&track);

        if cancelled {
            info!("⏭️ Skipped '{}' before it started", track.title());
            return self.advance().await;
        }

        if let Err(e) = result {
            warn!("❌ Could not resolve '{}': {}", track.title(), e);
            self.report_failure(&track, e.to_string());
            return self.advance().await;
        }

        match self.start_stream(&track, ticket).await {
            Ok(()) => {
                self.slot = Slot::Streaming { ticket };
                self.failed.clear();
                info!("🎵 Now playing: {}", track.title());
                if let Some(channel) = track.channel() {
                    self.announce(channel, Notice::NowPlaying(Arc::clone(&track)));
                }
            }
            Err(e) => {
                error!("❌ Could not play '{}': {}", track.title(), e);
                self.report_failure(&track, e.to_string());
                self.advance().await;
            }
        }
    }

    async fn start_stream(&mut self, track: &Track, ticket: u64) -> MusicResult<()> {
        let playable = track
            .playable()
            .ok_or_else(|| MusicError::Transport("track has no playable source".to_string()))?;

        let mailbox = self.mailbox.clone();
        let on_complete = CompletionNotifier::new(move || {
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Message::TrackEnded { ticket });
            }
        });

        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| MusicError::Transport("not connected to a voice channel".to_string()))?;
        transport.play(playable, on_complete).await
    }

    async fn on_track_ended(&mut self, ticket: u64) {
        if self.slot != (Slot::Streaming { ticket }) {
            debug!("Ignoring stale completion (ticket {})", ticket);
            return;
        }
        self.slot = Slot::Empty;
        self.advance().await;
    }

    fn report_failure(&mut self, track: &Arc<Track>, reason: String) {
        self.failed.push(Arc::clone(track));
        if let Some(channel) = track.channel() {
            self.announce(
                channel,
                Notice::TrackFailed {
                    track: Arc::clone(track),
                    reason,
                },
            );
        }
    }

    fn announce(&self, channel: ChannelId, notice: Notice) {
        if self.notices.send((channel, notice)).is_err() {
            warn!("Announcer for guild {} is gone", self.guild_id);
        }
    }
}
