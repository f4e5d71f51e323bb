//! Video frame sources and sinks.
//!
//! `process_video` only sees these traits. Local files go through FFmpeg
//! (feature: video-ffmpeg); the in-memory pair backs tests and dry runs.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{anyhow, Result};
use image::RgbImage;

#[cfg(feature = "video-ffmpeg")]
use super::ffmpeg::{FfmpegVideoSink, FfmpegVideoSource};
use crate::error::MediaError;

/// Used when the container reports no usable frame rate.
pub const DEFAULT_FPS: f64 = 30.0;

pub trait VideoSource {
    /// Frames per second reported by the container.
    fn fps(&self) -> f64;

    /// Next decoded RGB frame, `None` once the video is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

pub trait VideoSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close. No frames may be written afterwards.
    fn finish(&mut self) -> Result<()>;
}

pub(crate) fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FPS
    }
}

/// Open a local video file for decoding.
pub fn open_video_file(path: &Path) -> Result<Box<dyn VideoSource>> {
    #[cfg(feature = "video-ffmpeg")]
    {
        Ok(Box::new(FfmpegVideoSource::open(path)?))
    }
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        let _ = path;
        Err(anyhow!("video decoding requires the video-ffmpeg feature"))
    }
}

/// Create an H.264 MP4 writer at `path`.
pub fn create_video_file(
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<Box<dyn VideoSink>> {
    #[cfg(feature = "video-ffmpeg")]
    {
        Ok(Box::new(FfmpegVideoSink::create(path, width, height, sanitize_fps(fps))?))
    }
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        let _ = (path, width, height, fps);
        Err(anyhow!("video encoding requires the video-ffmpeg feature"))
    }
}

// ----------------------------------------------------------------------------
// In-memory source/sink
// ----------------------------------------------------------------------------

/// Frames held in memory. Can be told to fail after a number of frames.
pub struct MemoryVideoSource {
    frames: VecDeque<RgbImage>,
    fps: f64,
    fail_after: Option<usize>,
    delivered: usize,
}

impl MemoryVideoSource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self {
            frames: frames.into(),
            fps,
            fail_after: None,
            delivered: 0,
        }
    }

    /// Report a decode error instead of the frame after `frames` delivered ones.
    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl VideoSource for MemoryVideoSource {
    fn fps(&self) -> f64 {
        sanitize_fps(self.fps)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.fail_after == Some(self.delivered) {
            return Err(MediaError::io(format!(
                "corrupt packet after frame {}",
                self.delivered
            ))
            .into());
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.delivered += 1;
        }
        Ok(frame)
    }
}

#[derive(Default)]
pub struct MemoryVideoSink {
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

impl MemoryVideoSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoSink for MemoryVideoSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if self.finished {
            return Err(anyhow!("write after finish"));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
