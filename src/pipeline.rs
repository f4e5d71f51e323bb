//! Image and video detection pipelines.
//!
//! Ties the model handle, per-frame deduplication, track aggregation and media
//! I/O together. Both pipelines are synchronous and hold no state between calls.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::aggregate::TrackAggregator;
use crate::category::CategoryCounts;
use crate::dedup::{deduplicate, DEFAULT_IOU_THRESHOLD};
use crate::detect::{Detection, ModelHandle};
use crate::media::{annotate, resize_exact, LabelFont, VideoSink, VideoSource};

pub const IMAGE_SIZE: u32 = 640;
pub const VIDEO_WIDTH: u32 = 640;
pub const VIDEO_HEIGHT: u32 = 368;
pub const DEFAULT_FRAME_SKIP: u32 = 2;

#[derive(Clone, Copy, Debug)]
pub struct PipelineSettings {
    pub confidence: f32,
    pub iou_threshold: f32,
    pub image_size: u32,
    pub video_width: u32,
    pub video_height: u32,
    /// Only every `frame_skip`-th frame (1-based) is sent to the tracker.
    pub frame_skip: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            image_size: IMAGE_SIZE,
            video_width: VIDEO_WIDTH,
            video_height: VIDEO_HEIGHT,
            frame_skip: DEFAULT_FRAME_SKIP,
        }
    }
}

impl PipelineSettings {
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

pub struct ImageReport {
    pub annotated: RgbImage,
    /// Detections that survived deduplication, in frame coordinates of `annotated`.
    pub detections: Vec<Detection>,
    pub counts: CategoryCounts,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoReport {
    /// Distinct tracked objects per category.
    pub counts: CategoryCounts,
    /// Raw model labels seen on analyzed frames, first sighting first.
    pub labels: Vec<String>,
    pub frames_total: u64,
    pub frames_analyzed: u64,
}

/// Detect, deduplicate, count and draw on a single image.
pub fn detect_image(
    model: &ModelHandle,
    image: &RgbImage,
    settings: &PipelineSettings,
    font: Option<&LabelFont>,
) -> Result<ImageReport> {
    let mut frame = resize_exact(image, settings.image_size, settings.image_size);
    let raw = model
        .infer(&frame, settings.confidence)
        .context("image inference failed")?;
    let detections = deduplicate(raw, settings.iou_threshold);

    let mut counts = CategoryCounts::default();
    for det in &detections {
        counts.increment(det.category());
    }
    annotate(&mut frame, &detections, font);

    Ok(ImageReport {
        annotated: frame,
        detections,
        counts,
    })
}

/// Run tracking over a whole video and write the annotated frames to `sink`.
///
/// Counts are the number of distinct track identities per category. Any error
/// aborts the run and no counts are returned.
pub fn process_video(
    model: &ModelHandle,
    source: &mut dyn VideoSource,
    sink: &mut dyn VideoSink,
    settings: &PipelineSettings,
    font: Option<&LabelFont>,
) -> Result<VideoReport> {
    if settings.frame_skip == 0 {
        return Err(anyhow!("frame_skip must be >= 1"));
    }
    let mut session = model.track_session();
    let mut aggregator = TrackAggregator::new();
    let mut frames_total = 0u64;
    let mut frames_analyzed = 0u64;
    let mut labels: Vec<String> = Vec::new();

    while let Some(frame) = source.next_frame().context("video decode failed")? {
        frames_total += 1;
        let mut frame = resize_exact(&frame, settings.video_width, settings.video_height);

        if frames_total % settings.frame_skip as u64 == 0 {
            frames_analyzed += 1;
            let tracked = session
                .track(&frame, settings.confidence, true)
                .with_context(|| format!("tracking failed on frame {frames_total}"))?;
            aggregator.observe(&tracked);
            for det in &tracked {
                if !labels.contains(&det.label) {
                    labels.push(det.label.clone());
                }
            }
            let visible = deduplicate(tracked, settings.iou_threshold);
            annotate(&mut frame, &visible, font);
        }

        sink.write_frame(&frame).context("video encode failed")?;
    }
    sink.finish().context("video encode failed")?;

    let counts = aggregator.finish();
    log::debug!(
        "video done: {} frames, {} analyzed, counts {:?}",
        frames_total,
        frames_analyzed,
        counts
    );
    Ok(VideoReport {
        counts,
        labels,
        frames_total,
        frames_analyzed,
    })
}
