use std::collections::HashSet;

use crate::category::{Category, CategoryCounts};
use crate::detect::Detection;

/// Unique tracked objects per category over one video.
///
/// Local to a single `process_video` call; dropped without reporting if the
/// video fails.
#[derive(Clone, Debug, Default)]
pub struct TrackAggregator {
    potholes: HashSet<u32>,
    plastic: HashSet<u32>,
    other_litter: HashSet<u32>,
}

impl TrackAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a track identity under `category`. Re-inserting is a no-op.
    pub fn insert(&mut self, category: Category, track_id: u32) -> bool {
        self.set_mut(category).insert(track_id)
    }

    /// Record every tracked detection of one frame. Untracked detections do not count.
    pub fn observe(&mut self, detections: &[Detection]) {
        for det in detections {
            if let Some(id) = det.track_id {
                self.insert(det.category(), id);
            }
        }
    }

    pub fn finish(self) -> CategoryCounts {
        self.counts()
    }

    pub fn counts(&self) -> CategoryCounts {
        CategoryCounts {
            pothole: self.potholes.len() as u64,
            plastic: self.plastic.len() as u64,
            otherlitter: self.other_litter.len() as u64,
        }
    }

    fn set_mut(&mut self, category: Category) -> &mut HashSet<u32> {
        match category {
            Category::Pothole => &mut self.potholes,
            Category::Plastic => &mut self.plastic,
            Category::OtherLitter => &mut self.other_litter,
        }
    }
}
