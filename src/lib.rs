//! Road defect detection service.
//!
//! Finds potholes, plastic and other litter in road images and videos.
//! Stills are deduplicated and counted per category. Videos are tracked
//! so that each physical object is counted once.
//!
//! # Module Structure
//!
//! - `detect`: detector backends, the shared model handle and the IoU tracker
//! - `dedup`: per-frame suppression of same-category duplicates
//! - `aggregate`: distinct track counting across a video
//! - `media`: image/video decode, encode and box overlays
//! - `pipeline`: the image and video workflows
//! - `output`: storage and public URLs for annotated results
//! - `api`: the HTTP service
//! - `config`: service configuration (file + env)

pub mod aggregate;
pub mod api;
pub mod category;
pub mod config;
pub mod dedup;
pub mod detect;
pub mod error;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod ui;

pub use aggregate::TrackAggregator;
pub use category::{Category, CategoryCounts};
pub use config::ServiceConfig;
pub use dedup::deduplicate;
pub use detect::{BoundingBox, Detection, DetectorBackend, ModelHandle};
pub use error::MediaError;
pub use pipeline::{detect_image, process_video, ImageReport, PipelineSettings, VideoReport};
