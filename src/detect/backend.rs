use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// This is the model boundary: a backend turns one RGB frame into raw detections
/// in that frame's pixel coordinates. Backends never assign track identities;
/// that is the tracker's job.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class labels the model can emit, indexed by class id.
    fn class_names(&self) -> &[String];

    /// Run inference on a frame, keeping detections at or above `confidence`.
    fn infer(&mut self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
