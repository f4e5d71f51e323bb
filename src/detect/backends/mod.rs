use anyhow::{anyhow, Result};

use crate::config::ModelSettings;
use crate::detect::model::ModelHandle;

pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// ONNX model via tract (feature: backend-tract).
    Tract,
    /// No model. Returns no detections.
    Scripted,
}

impl BackendKind {
    /// Tract when it is compiled in and a model path is configured.
    pub fn preferred(settings: &ModelSettings) -> Self {
        if cfg!(feature = "backend-tract") && settings.path.is_some() {
            BackendKind::Tract
        } else {
            BackendKind::Scripted
        }
    }
}

/// Build the process-wide model handle.
pub fn load_model(kind: BackendKind, settings: &ModelSettings) -> Result<ModelHandle> {
    match kind {
        BackendKind::Scripted => Ok(ModelHandle::new(ScriptedBackend::new(
            settings.class_names.clone(),
        ))),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => {
            let path = settings
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend needs model.path"))?;
            let backend =
                TractBackend::new(path, settings.input_size, settings.class_names.clone())?;
            Ok(ModelHandle::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(anyhow!(
            "tract backend requested but built without the backend-tract feature"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(path: Option<&str>) -> ModelSettings {
        ModelSettings {
            path: path.map(Into::into),
            class_names: vec!["pothole".to_string()],
            input_size: 640,
        }
    }

    #[test]
    fn scripted_without_model_path() {
        assert_eq!(BackendKind::preferred(&settings(None)), BackendKind::Scripted);
        let model = load_model(BackendKind::Scripted, &settings(None)).unwrap();
        assert_eq!(model.name(), "scripted");
        assert_eq!(model.class_names().unwrap(), vec!["pothole"]);
    }

    #[test]
    fn tract_needs_a_model() {
        assert!(load_model(BackendKind::Tract, &settings(None)).is_err());
    }
}
