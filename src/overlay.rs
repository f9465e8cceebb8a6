// src/overlay.rs
//
// Per-frame compositing. Every draw happens on a copy: the decoded frame
// stays pristine so an annotation commit can persist it as it existed at
// commit time, free of unrelated overlays.

use anyhow::Result;
use opencv::{
    core::{Mat, Point, Scalar},
    imgproc,
    prelude::*,
};

use crate::config::FontConfig;
use crate::coordinate::ActiveCoordinate;
use crate::types::PixelPoint;

/// Where the screen-capture acknowledgment lands.
const ACK_ANCHOR: PixelPoint = PixelPoint { x: 500, y: 500 };

#[derive(Debug, Clone)]
pub struct FontSpec {
    pub face: i32,
    pub scale: f64,
    pub color: Scalar,
    pub thickness: i32,
}

impl FontSpec {
    pub fn from_config(font: &FontConfig) -> Self {
        let [r, g, b] = font.color;
        Self {
            face: font.face,
            scale: font.scale,
            color: Scalar::new(f64::from(b), f64::from(g), f64::from(r), 0.0),
            thickness: font.thickness,
        }
    }
}

/// Decides what gets drawn each frame and keeps the drawing off the
/// original pixels.
pub struct OverlayCoordinator {
    font: FontSpec,
}

impl OverlayCoordinator {
    pub fn new(font: FontSpec) -> Self {
        Self { font }
    }

    /// Fresh copy of `base` with all currently active overlays applied.
    pub fn compose(
        &self,
        base: &Mat,
        coordinate: Option<&ActiveCoordinate>,
        annotation: Option<(&str, PixelPoint)>,
        screencap_ack: bool,
    ) -> Result<Mat> {
        let mut output = base.try_clone()?;

        if let Some(active) = coordinate {
            self.put_text(&mut output, &active.pixel.to_string(), active.pixel)?;
        }
        if let Some((text, anchor)) = annotation {
            self.put_text(&mut output, text, anchor)?;
        }
        if screencap_ack {
            self.put_text(&mut output, "Screencap saved!", ACK_ANCHOR)?;
        }
        Ok(output)
    }

    /// The committed annotation flattened onto a copy of the frame frozen at
    /// commit time.
    pub fn render_annotation(&self, base: &Mat, text: &str, anchor: PixelPoint) -> Result<Mat> {
        let mut output = base.try_clone()?;
        if !text.is_empty() {
            self.put_text(&mut output, text, anchor)?;
        }
        Ok(output)
    }

    fn put_text(&self, frame: &mut Mat, text: &str, at: PixelPoint) -> Result<()> {
        imgproc::put_text(
            frame,
            text,
            Point::new(at.x, at.y),
            self.font.face,
            self.font.scale,
            self.font.color,
            self.font.thickness,
            imgproc::LINE_AA,
            false,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_color_is_reversed_to_bgr() {
        let font = FontConfig {
            face: 0,
            scale: 1.0,
            color: [255, 128, 0],
            thickness: 2,
        };
        let spec = FontSpec::from_config(&font);
        assert_eq!(spec.color[0], 0.0);
        assert_eq!(spec.color[1], 128.0);
        assert_eq!(spec.color[2], 255.0);
    }
}
