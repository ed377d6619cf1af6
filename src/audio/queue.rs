use rand::seq::SliceRandom;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    error::{MusicError, MusicResult},
    sources::Track,
};

/// Tracks per page when the queue is listed.
pub const PAGE_SIZE: usize = 10;

/// Song queue with an optional shuffled view and an optional loop buffer.
///
/// `primary` always holds insertion order. When `shuffled` is present it is
/// the visible ordering, and every add/remove is mirrored into both. Tracks
/// are compared by allocation, so the same `Arc<Track>` may appear in the
/// loop buffer and be replayed many times.
#[derive(Debug, Default)]
pub struct PlayQueue {
    primary: Vec<Arc<Track>>,
    shuffled: Option<Vec<Arc<Track>>>,
    loop_buffer: Option<Vec<Arc<Track>>>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track to every active ordering.
    pub fn add(&mut self, track: Arc<Track>) {
        if let Some(shuffled) = self.shuffled.as_mut() {
            shuffled.push(Arc::clone(&track));
        }
        if let Some(looping) = self.loop_buffer.as_mut() {
            looping.push(Arc::clone(&track));
        }
        debug!("➕ Queued: {}", track.title());
        self.primary.push(track);
    }

    /// Removes the first occurrence of `track`.
    ///
    /// When this empties the queue while looping, the loop buffer is copied
    /// back in so the queue keeps replaying.
    pub fn remove(&mut self, track: &Arc<Track>) {
        remove_first(&mut self.primary, track);
        if let Some(shuffled) = self.shuffled.as_mut() {
            remove_first(shuffled, track);
        }

        if self.primary.is_empty() {
            self.refill_from_loop();
        }
    }

    /// Copies the loop buffer back into an empty queue.
    ///
    /// Returns `true` when the queue was refilled.
    pub fn refill_from_loop(&mut self) -> bool {
        let Some(looping) = self.loop_buffer.as_ref().filter(|l| !l.is_empty()) else {
            return false;
        };
        if !self.visible().is_empty() {
            return false;
        }

        self.primary = looping.clone();
        if let Some(shuffled) = self.shuffled.as_mut() {
            *shuffled = looping.clone();
        }
        info!("🔁 Queue refilled from loop ({} tracks)", self.primary.len());
        true
    }

    pub fn peek_next(&self) -> Option<&Arc<Track>> {
        self.visible().first()
    }

    /// Enables or disables the shuffled view.
    ///
    /// Enabling snapshots the visible ordering in random order; primary is
    /// never reordered, so toggling twice restores the original view.
    pub fn toggle_shuffle(&mut self) -> bool {
        if self.shuffled.take().is_some() {
            info!("➡️ Shuffle disabled");
            return false;
        }

        let mut snapshot = self.visible().to_vec();
        snapshot.shuffle(&mut rand::thread_rng());
        self.shuffled = Some(snapshot);
        info!("🔀 Shuffle enabled");
        true
    }

    /// Enables or disables looping.
    ///
    /// Enabling captures `[current] + visible` as the replay buffer. A current
    /// track that is still queued (not yet started) is only captured once.
    pub fn toggle_loop(&mut self, current: Option<&Arc<Track>>) -> MusicResult<bool> {
        if self.loop_buffer.take().is_some() {
            info!("➡️ Loop disabled");
            return Ok(false);
        }

        if current.is_none() && self.visible().is_empty() {
            return Err(MusicError::QueueEmpty);
        }

        let current = current.filter(|c| !self.visible().iter().any(|t| Arc::ptr_eq(t, c)));
        let buffer: Vec<Arc<Track>> = current
            .into_iter()
            .chain(self.visible().iter())
            .cloned()
            .collect();
        info!("🔁 Loop enabled ({} tracks)", buffer.len());
        self.loop_buffer = Some(buffer);
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        self.shuffled = None;
        self.loop_buffer = None;
        info!("🗑️ Queue cleared");
    }

    /// The ordering shown to users and used to pick the next track.
    pub fn visible(&self) -> &[Arc<Track>] {
        self.shuffled.as_deref().unwrap_or(&self.primary)
    }

    pub fn len(&self) -> usize {
        self.visible().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible().is_empty()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled.is_some()
    }

    pub fn is_looping(&self) -> bool {
        self.loop_buffer.is_some()
    }

    pub fn total_duration(&self) -> Duration {
        self.visible().iter().filter_map(|t| t.duration()).sum()
    }

    /// Slices the visible ordering into pages of [`PAGE_SIZE`].
    ///
    /// Page 1 is always valid, even for an empty queue.
    pub fn page(&self, page: usize) -> MusicResult<QueuePage> {
        let visible = self.visible();
        let total_pages = visible.len().div_ceil(PAGE_SIZE);

        if page == 0 || (page > total_pages && page != 1) {
            return Err(MusicError::PageOutOfRange { pages: total_pages });
        }

        let offset = (page - 1) * PAGE_SIZE;
        let end = (offset + PAGE_SIZE).min(visible.len());
        Ok(QueuePage {
            items: visible.get(offset..end).unwrap_or_default().to_vec(),
            offset,
            current_page: page,
            total_pages,
            total_items: visible.len(),
            total_duration: self.total_duration(),
        })
    }
}

fn remove_first(list: &mut Vec<Arc<Track>>, track: &Arc<Track>) {
    if let Some(index) = list.iter().position(|t| Arc::ptr_eq(t, track)) {
        list.remove(index);
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Arc<Track>>,
    /// Zero-based position of `items[0]` in the visible ordering.
    pub offset: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    /// Known duration of the whole visible queue.
    pub total_duration: Duration,
}
