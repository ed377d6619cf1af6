//! # Audio Module
//!
//! Per-guild music playback for blothera.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One [`session::SessionScheduler`] per guild, created on first use
//! - Snapshot of all sessions and process-wide shutdown
//!
//! ### [`session`] - Playback Session
//! - A single task per guild owns the queue, current track and voice transport
//! - Commands, fetch results and track completions all arrive as messages
//!
//! ### [`queue`] - Queue Management
//! - Insertion order with an optional shuffled view and loop buffer
//! - Paging for the queue listing
//!
//! ### [`transport`] - Voice Transport
//! - Songbird-backed streaming of resolved sources
//! - Completion notification back to the owning session
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! # use crate::audio::{registry::SessionRegistry, session::RequestContext};
//! # use crate::sources::Track;
//! # use serenity::all::{ChannelId, GuildId};
//! # async fn example(registry: &SessionRegistry, context: RequestContext) -> anyhow::Result<()> {
//! let session = registry.get(GuildId::new(123456789));
//! session.join_channel(ChannelId::new(987654321)).await?;
//!
//! session
//!     .add_song(Track::new("https://youtu.be/dQw4w9WgXcQ"), false, context)
//!     .await?;
//! session.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;
