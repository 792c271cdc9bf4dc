use serde::{Deserialize, Serialize};

/// Catalog identifier of a single audio track.
pub type TrackId = i64;

/// Track reference as held by the playlist.
///
/// Owned by the catalog; the engine keeps copies by value once a track is queued.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    /// Catalog identifier.
    pub id: TrackId,
    /// Identifier of the removable device holding the file.
    pub device_id: String,
    /// Path of the file relative to the device mount root.
    pub relative_path: String,
    /// Track length in seconds, when the tag parser found one.
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub track_number: Option<u32>,
}

impl TrackInfo {
    /// Display label used in logs: `artist - title`, falling back to the relative path.
    pub fn label(&self) -> String {
        match (self.artist.as_deref(), self.title.as_deref()) {
            (Some(artist), Some(title)) => format!("{artist} - {title}"),
            (None, Some(title)) => title.to_string(),
            _ => self.relative_path.clone(),
        }
    }
}

/// Playback status snapshot pushed to notification clients.
///
/// Field names serialize in PascalCase to stay wire-compatible with existing
/// head-unit clients.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStatus {
    /// Position pointer into `playlist` (the active order).
    pub playlist_position: usize,
    /// Track ids in the active order: shuffled when shuffle is on, natural otherwise.
    pub playlist: Vec<TrackId>,
    /// `true` while the decoder reports paused.
    pub is_paused: bool,
    /// `true` while a track is loaded, playing or paused.
    pub is_playing: bool,
    /// Elapsed seconds in the current track.
    pub position: u32,
    /// Total seconds of the current track.
    pub duration: u32,
    pub is_repeat_all: bool,
    pub is_shuffle: bool,
    pub can_move_next: bool,
    pub can_move_previous: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_pascal_case_keys() {
        let status = PlaybackStatus {
            playlist_position: 1,
            playlist: vec![7, 3],
            is_playing: true,
            position: 12,
            duration: 200,
            can_move_next: false,
            can_move_previous: true,
            ..PlaybackStatus::default()
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["PlaylistPosition"], 1);
        assert_eq!(json["Playlist"], serde_json::json!([7, 3]));
        assert_eq!(json["IsPlaying"], true);
        assert_eq!(json["IsPaused"], false);
        assert_eq!(json["Position"], 12);
        assert_eq!(json["Duration"], 200);
        assert_eq!(json["IsRepeatAll"], false);
        assert_eq!(json["CanMovePrevious"], true);
    }

    #[test]
    fn track_deserializes_with_optional_metadata_missing() {
        let track: TrackInfo = serde_json::from_str(
            r#"{"id": 4, "device_id": "usb-1", "relative_path": "music/a.mp3"}"#,
        )
        .expect("parse");
        assert_eq!(track.id, 4);
        assert!(track.title.is_none());
        assert_eq!(track.label(), "music/a.mp3");
    }

    #[test]
    fn label_prefers_artist_and_title() {
        let track = TrackInfo {
            artist: Some("Can".to_string()),
            title: Some("Vitamin C".to_string()),
            ..TrackInfo::default()
        };
        assert_eq!(track.label(), "Can - Vitamin C");
    }
}
