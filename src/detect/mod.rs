mod backend;
pub mod backends;
mod model;
mod result;
pub mod tracker;

pub use backend::DetectorBackend;
pub use backends::{load_model, BackendKind, ScriptedBackend};
pub use model::{ModelHandle, TrackingSession};
pub use result::{BoundingBox, Detection};
pub use tracker::{IouTracker, TrackerConfig};
