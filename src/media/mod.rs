//! Media decoding, encoding and overlay drawing.
//!
//! - Still images: `image` decode/encode plus exact resizing
//! - Overlays: per-category boxes and optional labels (`imageproc`)
//! - Video: `VideoSource`/`VideoSink` traits, FFmpeg files (feature: video-ffmpeg)

mod annotate;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod ffmpeg;
mod still;
pub mod video;

pub use annotate::{annotate, label_text, LabelFont};
pub use still::{decode_image, encode_jpeg, resize_exact};
pub use video::{
    create_video_file, open_video_file, MemoryVideoSink, MemoryVideoSource, VideoSink,
    VideoSource, DEFAULT_FPS,
};
