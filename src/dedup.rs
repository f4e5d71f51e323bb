//! Per-frame duplicate suppression.

use crate::detect::Detection;

/// IoU above which two same-category boxes in one frame count as one object.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.4;

/// Drop same-category detections that overlap a more confident one by more
/// than `iou_threshold`.
///
/// Detections are visited by descending confidence (stable, so ties keep input
/// order). Different categories never suppress each other: a pothole and a
/// plastic bag may legitimately share a box.
pub fn deduplicate(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections;
    sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(sorted.len());
    for det in sorted {
        let category = det.category();
        let duplicate = kept
            .iter()
            .any(|k| k.category() == category && k.bbox.iou(&det.bbox) > iou_threshold);
        if !duplicate {
            kept.push(det);
        }
    }
    kept
}
