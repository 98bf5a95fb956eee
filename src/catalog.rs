use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A playable unit: one region in the audio engine's project, plus an
/// optional entry in the video players' playlist.
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub name: String,
    pub audio_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_index: Option<i32>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<TrackDuration>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackDuration {
    pub minutes: u32,
    pub seconds: u32,
}

/// An ordered group of tracks with a padding gap, consumed by the offline
/// schedule generator. The runtime only loads and validates blocks.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub name: String,
    pub tracks: Vec<String>,
    /// Seconds of silence inserted between consecutive tracks.
    pub track_padding: u32,
}

/// Read-only lookup of tracks and blocks. Built once at startup by the
/// config loader; no mutation afterwards, so shared references are safe
/// without synchronization.
#[derive(Debug, Default)]
pub struct Catalog {
    tracks: HashMap<String, Track>,
    blocks: HashMap<String, Block>,
}

impl Catalog {
    pub(crate) fn new(tracks: HashMap<String, Track>, blocks: HashMap<String, Block>) -> Self {
        Self { tracks, blocks }
    }

    pub fn lookup(&self, name: &str) -> Option<&Track> {
        self.tracks.get(name)
    }

    pub fn lookup_block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    /// All tracks, order unspecified.
    pub fn all(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{catalog, track};

    #[test]
    fn lookup_by_name() {
        let cat = catalog(vec![track("intro", 1, Some(3)), track("main", 2, None)]);
        assert_eq!(cat.lookup("intro").unwrap().audio_index, 1);
        assert_eq!(cat.lookup("main").unwrap().video_index, None);
        assert!(cat.lookup("outro").is_none());
        assert_eq!(cat.track_count(), 2);
    }
}
