//! Greedy IoU tracker.
//!
//! Assigns persistent integer identities to detections across successive frames
//! of one video. Matching is per label: a detection can only continue a track
//! that was last seen with the same raw label.

use crate::detect::result::{BoundingBox, Detection};

pub const DEFAULT_MATCH_IOU: f32 = 0.3;
pub const DEFAULT_MAX_LOST: u32 = 30;

#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Minimum IoU between a live track and a detection to continue the track.
    pub match_iou: f32,
    /// Frames a track may go unmatched before it is dropped.
    pub max_lost: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_iou: DEFAULT_MATCH_IOU,
            max_lost: DEFAULT_MAX_LOST,
        }
    }
}

#[derive(Clone, Debug)]
struct Track {
    id: u32,
    label: String,
    bbox: BoundingBox,
    frames_lost: u32,
}

#[derive(Debug)]
pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u32,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Forget all tracks. Identities keep increasing so a reset never reuses an id.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Assign a track id to every detection of one frame.
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<Detection> {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                if det.label != track.label {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.match_iou && iou > 0.0 {
                    pairs.push((iou, ti, di));
                }
            }
        }
        // Highest overlap first; ties resolve to the older track.
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut assigned: Vec<Option<u32>> = vec![None; detections.len()];
        for (_, ti, di) in pairs {
            if track_taken[ti] || assigned[di].is_some() {
                continue;
            }
            track_taken[ti] = true;
            assigned[di] = Some(self.tracks[ti].id);
            self.tracks[ti].bbox = detections[di].bbox;
            self.tracks[ti].frames_lost = 0;
        }

        for (ti, taken) in track_taken.iter().enumerate() {
            if !taken {
                self.tracks[ti].frames_lost += 1;
            }
        }
        let max_lost = self.config.max_lost;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        detections
            .into_iter()
            .zip(assigned)
            .map(|(det, id)| {
                let id = match id {
                    Some(id) => id,
                    None => self.open_track(&det),
                };
                det.with_track_id(id)
            })
            .collect()
    }

    fn open_track(&mut self, det: &Detection) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.tracks.push(Track {
            id,
            label: det.label.clone(),
            bbox: det.bbox,
            frames_lost: 0,
        });
        id
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
