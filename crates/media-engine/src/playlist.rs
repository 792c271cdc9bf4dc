//! Playlist state: natural order, shuffle permutation and position pointer.
//!
//! The position pointer always indexes the *active* order: the shuffle permutation
//! when shuffle is on, the natural order otherwise. `effective_index` maps it back
//! to the natural-order slot of the track that should be playing.
//!
//! This type holds no lock of its own; the engine wraps it in a mutex and performs
//! every operation inside one critical section.

use rand::Rng;
use rand::seq::SliceRandom;

use media_types::{TrackId, TrackInfo};

/// Progress (seconds) from which "previous" is meaningful even at the first slot,
/// because it restarts the current track.
pub const RESTART_THRESHOLD_SECS: u32 = 5;

#[derive(Debug, Default)]
pub struct Playlist {
    tracks: Vec<TrackInfo>,
    order: Vec<usize>,
    position: usize,
    shuffle: bool,
    repeat: bool,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    /// Shuffle permutation over natural-order indices.
    pub fn shuffle_order(&self) -> &[usize] {
        &self.order
    }

    /// Tracks in append order.
    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    /// Append tracks using the thread-local RNG. See [`Playlist::add_with_rng`].
    pub fn add(&mut self, tracks: impl IntoIterator<Item = TrackInfo>) -> bool {
        self.add_with_rng(tracks, &mut rand::thread_rng())
    }

    /// Append tracks and regenerate the shuffle permutation from scratch.
    ///
    /// When shuffle is on, the position pointer is moved to wherever the current
    /// track landed in the new permutation, so appending never changes what is
    /// playing. Returns `true` when the playlist was empty before the call; the
    /// caller is expected to start playback in that case.
    pub fn add_with_rng<R: Rng + ?Sized>(
        &mut self,
        tracks: impl IntoIterator<Item = TrackInfo>,
        rng: &mut R,
    ) -> bool {
        let was_empty = self.tracks.is_empty();
        let current = self.effective_index();

        self.tracks.extend(tracks);
        self.order = (0..self.tracks.len()).collect();
        self.order.shuffle(rng);

        if self.shuffle {
            if let Some(current) = current {
                self.position = self
                    .order
                    .iter()
                    .position(|&idx| idx == current)
                    .unwrap_or(0);
            }
        }
        was_empty
    }

    /// Drop every track and reset the pointer. Mode flags are kept.
    ///
    /// Returns `true` when the caller must stop the decoder: either there was
    /// something queued or playback is still active.
    pub fn clear(&mut self, is_playing: bool) -> bool {
        let requires_stop = !self.tracks.is_empty() || is_playing;
        self.tracks.clear();
        self.order.clear();
        self.position = 0;
        requires_stop
    }

    /// Flip shuffle mode, translating the pointer so the same track stays current.
    pub fn toggle_shuffle(&mut self) -> bool {
        if !self.tracks.is_empty() {
            if self.shuffle {
                self.position = self.order[self.position];
            } else if let Some(slot) = self.order.iter().position(|&idx| idx == self.position) {
                self.position = slot;
            }
        }
        self.shuffle = !self.shuffle;
        self.shuffle
    }

    pub fn toggle_repeat(&mut self) -> bool {
        self.repeat = !self.repeat;
        self.repeat
    }

    /// Natural-order index of the track the pointer refers to.
    pub fn effective_index(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        Some(if self.shuffle {
            self.order[self.position]
        } else {
            self.position
        })
    }

    /// Track the pointer refers to, if any.
    pub fn current(&self) -> Option<&TrackInfo> {
        self.effective_index().map(|idx| &self.tracks[idx])
    }

    /// Move the pointer to `position` in the active order.
    ///
    /// Out-of-range requests are ignored unless repeat is on, in which case
    /// negative positions clamp to the last slot and overflowing ones to the first.
    pub fn jump_to(&mut self, position: i64) -> bool {
        let count = self.tracks.len();
        if count == 0 {
            return false;
        }
        let in_range = position >= 0 && (position as u64) < count as u64;
        if !in_range && !self.repeat {
            return false;
        }
        self.position = if position < 0 {
            count - 1
        } else if !in_range {
            0
        } else {
            position as usize
        };
        true
    }

    pub fn next(&mut self) -> bool {
        let count = self.tracks.len();
        if count == 0 {
            return false;
        }
        if self.position >= count - 1 {
            if !self.repeat {
                return false;
            }
            self.position = 0;
        } else {
            self.position += 1;
        }
        true
    }

    pub fn previous(&mut self) -> bool {
        let count = self.tracks.len();
        if count == 0 {
            return false;
        }
        if self.position == 0 {
            if !self.repeat {
                return false;
            }
            self.position = count - 1;
        } else {
            self.position -= 1;
        }
        true
    }

    pub fn can_move_next(&self) -> bool {
        self.repeat || self.position + 1 < self.tracks.len()
    }

    pub fn can_move_previous(&self, progress_secs: u32) -> bool {
        self.repeat || self.position > 0 || progress_secs >= RESTART_THRESHOLD_SECS
    }

    /// Track ids in the active order.
    pub fn active_ids(&self) -> Vec<TrackId> {
        if self.shuffle {
            self.order.iter().map(|&idx| self.tracks[idx].id).collect()
        } else {
            self.tracks.iter().map(|t| t.id).collect()
        }
    }
}
