use anyhow::Result;
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::detection::{BoundingBox, DetectionSet};

/// Height of the caption tag drawn above each box.
const LABEL_HEIGHT: i32 = 14;
/// Approximate advance per caption character.
const LABEL_CHAR_WIDTH: i32 = 7;

const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const TAG_COLOR: Rgba<u8> = Rgba([0, 255, 0, 160]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Pixel canvas that accepts overlay draw commands.
pub trait OverlaySurface {
    fn clear(&mut self);
    fn draw_rect(&mut self, bbox: &BoundingBox);
    /// `x`/`y` is the bottom-left corner of the text.
    fn draw_label(&mut self, text: &str, x: f32, y: f32);

    /// Called before drawing with the size of the frame the boxes refer to.
    fn resize(&mut self, _width: u32, _height: u32) {}

    /// Called once every command of a render has been issued.
    fn present(&mut self) {}
}

/// Replace whatever the surface shows with boxes and captions for `detections`.
pub fn render(surface: &mut dyn OverlaySurface, detections: &DetectionSet) {
    surface.clear();
    for detection in detections {
        surface.draw_rect(&detection.bbox);
        surface.draw_label(&detection.caption(), detection.bbox.x, detection.bbox.y);
    }
    surface.present();
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear,
    Rect(BoundingBox),
    Label { text: String, x: f32, y: f32 },
}

/// Records commands verbatim; handy for headless inspection.
impl OverlaySurface for Vec<DrawCommand> {
    fn clear(&mut self) {
        self.push(DrawCommand::Clear);
    }

    fn draw_rect(&mut self, bbox: &BoundingBox) {
        self.push(DrawCommand::Rect(*bbox));
    }

    fn draw_label(&mut self, text: &str, x: f32, y: f32) {
        self.push(DrawCommand::Label {
            text: text.to_string(),
            x,
            y,
        });
    }
}

/// Transparent RGBA layer the size of the camera frame.
///
/// Boxes are 2px outlines, captions are a filled tag above the box. Caption
/// text is kept alongside since the layer carries no font rasterizer.
pub struct FrameOverlay {
    layer: RgbaImage,
    labels: Vec<(String, i32, i32)>,
    snapshot_path: Option<PathBuf>,
}

impl FrameOverlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            layer: RgbaImage::from_pixel(width, height, CLEAR),
            labels: Vec::new(),
            snapshot_path: None,
        }
    }

    /// Save the layer as PNG to `path` after every render.
    pub fn with_snapshot<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn layer(&self) -> &RgbaImage {
        &self.layer
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|(text, _, _)| text.as_str())
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.layer.save(path.as_ref())?;
        Ok(())
    }

    fn fill(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgba<u8>) {
        for y in y1..y2 {
            for x in x1..x2 {
                self.set_pixel(x, y, color);
            }
        }
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Rgba<u8>) {
        let (width, height) = self.layer.dimensions();
        if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
            return;
        }
        self.layer.put_pixel(x as u32, y as u32, color);
    }
}

impl OverlaySurface for FrameOverlay {
    fn clear(&mut self) {
        for pixel in self.layer.pixels_mut() {
            *pixel = CLEAR;
        }
        self.labels.clear();
    }

    fn draw_rect(&mut self, bbox: &BoundingBox) {
        let (width, height) = self.layer.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = (width as i32, height as i32);

        let x1 = (bbox.x as i32).clamp(0, width - 1);
        let y1 = (bbox.y as i32).clamp(0, height - 1);
        let x2 = (bbox.right() as i32).clamp(0, width);
        let y2 = (bbox.bottom() as i32).clamp(0, height);

        for t in 0..2 {
            for x in x1..x2 {
                self.set_pixel(x, y1 + t, BOX_COLOR);
                self.set_pixel(x, y2 - 1 - t, BOX_COLOR);
            }
            for y in y1..y2 {
                self.set_pixel(x1 + t, y, BOX_COLOR);
                self.set_pixel(x2 - 1 - t, y, BOX_COLOR);
            }
        }
    }

    fn draw_label(&mut self, text: &str, x: f32, y: f32) {
        let x1 = x as i32;
        // Keep the tag on screen when the box touches the top edge.
        let y2 = (y as i32).max(LABEL_HEIGHT);
        let x2 = x1 + LABEL_CHAR_WIDTH * text.chars().count() as i32 + 4;
        self.fill(x1, y2 - LABEL_HEIGHT, x2, y2, TAG_COLOR);
        self.labels.push((text.to_string(), x1, y2));
    }

    /// A size change drops the current drawing.
    fn resize(&mut self, width: u32, height: u32) {
        if self.layer.dimensions() != (width, height) {
            debug!("Resizing overlay layer to {}x{}", width, height);
            self.layer = RgbaImage::from_pixel(width, height, CLEAR);
            self.labels.clear();
        }
    }

    fn present(&mut self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.save_png(path) {
                warn!("Failed to write overlay snapshot {}: {}", path.display(), e);
            }
        }
    }
}
