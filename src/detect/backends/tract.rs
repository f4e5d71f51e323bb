#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

const CXCYWH_OFFSET: usize = 4;
const NMS_IOU: f32 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX detection models.
///
/// Expects a single output of shape `[1, 4 + nc, anchors]` where the first four
/// rows are cx, cy, w, h in model-input pixels and the rest are class scores.
/// Loads the model from a local file; no network I/O.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for square `input_size` inputs.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        if class_names.is_empty() {
            return Err(anyhow!("tract backend needs at least one class name"));
        }
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
        })
    }

    fn build_input(&self, frame: &RgbImage) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(frame, side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &RgbImage,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape();
        if shape.len() != 3 || shape[1] < CXCYWH_OFFSET + 1 {
            return Err(anyhow!("unexpected detection head shape {:?}", shape));
        }
        let nc = (shape[1] - CXCYWH_OFFSET).min(self.class_names.len());
        let anchors = shape[2];
        let (fw, fh) = frame.dimensions();
        let from = (self.input_size, self.input_size);

        let mut detections = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..nc {
                let score = preds[[0, CXCYWH_OFFSET + c, a]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 < confidence {
                continue;
            }
            let cx = preds[[0, 0, a]];
            let cy = preds[[0, 1, a]];
            let w = preds[[0, 2, a]];
            let h = preds[[0, 3, a]];
            let bbox = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
                .rescaled(from, (fw, fh))
                .clamped(fw as f32, fh as f32);
            detections.push(Detection::new(
                bbox,
                best.1,
                self.class_names[best.0].clone(),
            ));
        }

        Ok(non_max_suppression(detections, NMS_IOU))
    }
}

/// Per-class NMS over raw head output. Boxes of different classes never
/// suppress each other.
fn non_max_suppression(mut xs: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(xs.len());
    for x in xs {
        let suppressed = kept
            .iter()
            .any(|k| k.label == x.label && k.bbox.iou(&x.bbox) > iou_threshold);
        if !suppressed {
            kept.push(x);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn infer(&mut self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, confidence)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.infer(&blank, 1.0).map(|_| ())
    }
}
