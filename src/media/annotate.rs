use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;

const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_OFFSET: i32 = 5;

/// Font for overlay labels. Without one only boxes are drawn.
pub struct LabelFont {
    font: FontVec,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow!("invalid font file {}", path.display()))?;
        Ok(Self { font })
    }
}

/// Overlay text for one detection: `"#<id> <category> <conf>"` when tracked.
pub fn label_text(det: &Detection) -> String {
    match det.track_id {
        Some(id) => format!("#{} {} {:.2}", id, det.category(), det.confidence),
        None => format!("{} {:.2}", det.category(), det.confidence),
    }
}

/// Draw boxes (and labels, when a font is loaded) in each category's color.
pub fn annotate(image: &mut RgbImage, detections: &[Detection], font: Option<&LabelFont>) {
    let (w, h) = image.dimensions();
    for det in detections {
        let color = det.category().color();
        let b = det.bbox.clamped(w as f32, h as f32);
        let x = b.x1.round() as i32;
        let y = b.y1.round() as i32;
        let bw = b.width().round() as i32;
        let bh = b.height().round() as i32;

        for inset in 0..BOX_THICKNESS {
            let rw = bw - 2 * inset;
            let rh = bh - 2 * inset;
            if rw <= 0 || rh <= 0 {
                break;
            }
            let rect = Rect::at(x + inset, y + inset).of_size(rw as u32, rh as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        if let Some(font) = font {
            let ty = (y - LABEL_OFFSET - LABEL_SCALE as i32).max(0);
            draw_text_mut(
                image,
                color,
                x,
                ty,
                PxScale::from(LABEL_SCALE),
                &font.font,
                &label_text(det),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::detect::BoundingBox;

    #[test]
    fn boxes_are_drawn_in_category_color() {
        let mut img = RgbImage::new(40, 40);
        let det = Detection::new(BoundingBox::new(5.0, 5.0, 25.0, 25.0), 0.9, "pothole");
        annotate(&mut img, &[det], None);
        assert_eq!(*img.get_pixel(5, 5), Category::Pothole.color());
        assert_eq!(*img.get_pixel(6, 10), Category::Pothole.color());
        assert_eq!(*img.get_pixel(15, 15), image::Rgb([0, 0, 0]));
    }

    #[test]
    fn out_of_frame_and_empty_boxes_do_not_panic() {
        let mut img = RgbImage::new(10, 10);
        let dets = vec![
            Detection::new(BoundingBox::new(-50.0, -50.0, 500.0, 500.0), 0.5, "plastic"),
            Detection::new(BoundingBox::new(3.0, 3.0, 3.0, 3.0), 0.5, "trash"),
        ];
        annotate(&mut img, &dets, None);
        assert_eq!(*img.get_pixel(0, 0), Category::Plastic.color());
    }

    #[test]
    fn label_text_formats() {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.876, "Trash");
        assert_eq!(label_text(&det), "otherlitter 0.88");
        assert_eq!(label_text(&det.with_track_id(4)), "#4 otherlitter 0.88");
    }
}
