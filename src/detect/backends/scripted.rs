use std::collections::VecDeque;

use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Scripted backend for tests and dry runs.
///
/// Each `infer` call pops the next scripted frame. Once the script is exhausted
/// every call returns no detections. The confidence filter is still applied so
/// threshold handling can be exercised without a model.
pub struct ScriptedBackend {
    class_names: Vec<String>,
    frames: VecDeque<Vec<Detection>>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(class_names: Vec<String>) -> Self {
        Self {
            class_names,
            frames: VecDeque::new(),
            calls: 0,
        }
    }

    /// Queue the detections returned by the next unanswered `infer` call.
    pub fn push_frame(&mut self, detections: Vec<Detection>) {
        self.frames.push_back(detections);
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = Vec<Detection>>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(
            ["pothole", "plastic", "otherlitter"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        )
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn infer(&mut self, _frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        let detections = self.frames.pop_front().unwrap_or_default();
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= confidence)
            .collect())
    }
}
