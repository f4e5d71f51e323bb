use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::tracker::{IouTracker, TrackerConfig};

/// Shared handle to the loaded model.
///
/// Built once at process start and passed to whatever serves requests. Clones
/// share the same backend. The mutex exists because `DetectorBackend::infer`
/// takes `&mut self`.
#[derive(Clone)]
pub struct ModelHandle {
    backend: Arc<Mutex<dyn DetectorBackend>>,
    name: &'static str,
    tracker_config: TrackerConfig,
}

impl ModelHandle {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        let name = backend.name();
        Self {
            backend: Arc::new(Mutex::new(backend)),
            name,
            tracker_config: TrackerConfig::default(),
        }
    }

    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn class_names(&self) -> Result<Vec<String>> {
        let guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("model lock poisoned"))?;
        Ok(guard.class_names().to_vec())
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("model lock poisoned"))?;
        guard.warm_up()
    }

    /// Single-frame inference. Detections carry no track identity.
    pub fn infer(&self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("model lock poisoned"))?;
        let mut detections = guard.infer(frame, confidence)?;
        for det in &mut detections {
            det.track_id = None;
        }
        Ok(detections)
    }

    /// Start tracker state for one video.
    pub fn track_session(&self) -> TrackingSession {
        TrackingSession {
            model: self.clone(),
            tracker: IouTracker::new(self.tracker_config),
        }
    }
}

/// Tracker state shared by successive `track` calls of one video.
pub struct TrackingSession {
    model: ModelHandle,
    tracker: IouTracker,
}

impl TrackingSession {
    /// Infer and assign track identities. Without `persist` the tracker forgets
    /// earlier frames before matching.
    pub fn track(
        &mut self,
        frame: &RgbImage,
        confidence: f32,
        persist: bool,
    ) -> Result<Vec<Detection>> {
        if !persist {
            self.tracker.reset();
        }
        let detections = self.model.infer(frame, confidence)?;
        Ok(self.tracker.update(detections))
    }
}
