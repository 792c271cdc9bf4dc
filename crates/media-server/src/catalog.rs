//! Track catalog lookup.
//!
//! The catalog is produced by the library indexer; this daemon only reads it.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use media_types::{TrackId, TrackInfo};

/// Resolves track ids to track references.
pub trait TrackCatalog: Send + Sync {
    /// `None` for ids that are not (or no longer) in the catalog.
    fn track(&self, id: TrackId) -> Option<TrackInfo>;

    /// Every entry, ordered by id.
    fn tracks(&self) -> Vec<TrackInfo>;
}

/// Catalog loaded from a JSON array of [`TrackInfo`].
#[derive(Debug, Default)]
pub struct JsonCatalog {
    tracks: HashMap<TrackId, TrackInfo>,
}

impl JsonCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).with_context(|| format!("read catalog {:?}", path))?;
        let tracks: Vec<TrackInfo> =
            serde_json::from_slice(&raw).with_context(|| format!("parse catalog {:?}", path))?;
        let catalog = Self::from_tracks(tracks);
        tracing::info!(path = %path.display(), tracks = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = TrackInfo>) -> Self {
        let mut map = HashMap::new();
        for track in tracks {
            let id = track.id;
            if map.insert(id, track).is_some() {
                tracing::warn!(track_id = id, "duplicate catalog entry; keeping the last one");
            }
        }
        Self { tracks: map }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl TrackCatalog for JsonCatalog {
    fn track(&self, id: TrackId) -> Option<TrackInfo> {
        self.tracks.get(&id).cloned()
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        let mut tracks: Vec<TrackInfo> = self.tracks.values().cloned().collect();
        tracks.sort_by_key(|track| track.id);
        tracks
    }
}
