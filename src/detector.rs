use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::RgbImage;
use tracing::{debug, info};

use crate::camera::Frame;
use crate::detection::{BoundingBox, RawDetection};
use crate::error::CapabilityError;

/// Black-box object detector.
///
/// The returned future owns everything it needs so the detection loop can
/// keep serving commands while it is pending.
pub trait ObjectDetector {
    fn name(&self) -> &'static str;
    fn detect(&self, frame: Frame) -> BoxFuture<'static, Result<Vec<RawDetection>>>;
}

/// Heuristic detector working on raw pixels: skin-tone clusters become
/// `person`, strong rectangular edge outlines become `tv`.
#[derive(Debug, Clone)]
pub struct BasicDetector {
    max_detections: usize,
}

impl BasicDetector {
    pub fn load(max_detections: usize) -> Result<Self, CapabilityError> {
        if max_detections == 0 {
            return Err(CapabilityError::DetectorLoad(
                "max_detections must be at least 1".to_string(),
            ));
        }
        info!("Basic detector ready (max {} detections)", max_detections);
        Ok(Self { max_detections })
    }

    pub fn detect_blocking(&self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let image = frame.to_rgb_image()?;

        let mut objects = Vec::new();
        objects.extend(detect_people(&image));
        objects.extend(detect_screens(&image));

        let mut merged = merge_overlapping(objects, 0.5);
        merged.truncate(self.max_detections);
        debug!("Basic detector found {} candidates", merged.len());
        Ok(merged)
    }
}

impl ObjectDetector for BasicDetector {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn detect(&self, frame: Frame) -> BoxFuture<'static, Result<Vec<RawDetection>>> {
        let detector = self.clone();
        async move {
            tokio::task::spawn_blocking(move || detector.detect_blocking(&frame)).await?
        }
        .boxed()
    }
}

fn is_skin_tone(r: f32, g: f32, b: f32) -> bool {
    // YCbCr skin range
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = -0.168736 * r - 0.331264 * g + 0.5 * b + 128.0;
    let cr = 0.5 * r - 0.418688 * g - 0.081312 * b + 128.0;

    y > 80.0 && (85.0..=135.0).contains(&cb) && (135.0..=180.0).contains(&cr)
}

fn detect_people(image: &RgbImage) -> Vec<RawDetection> {
    let (width, height) = image.dimensions();
    let mut skin = Vec::new();

    for y in (0..height).step_by(8) {
        for x in (0..width).step_by(8) {
            let p = image.get_pixel(x, y);
            if is_skin_tone(p[0] as f32, p[1] as f32, p[2] as f32) {
                skin.push((x, y));
            }
        }
    }

    if skin.len() <= 20 {
        return Vec::new();
    }

    let count = skin.len() as u64;
    let cx = skin.iter().map(|(x, _)| *x as u64).sum::<u64>() / count;
    let cy = skin.iter().map(|(_, y)| *y as u64).sum::<u64>() / count;

    let bbox = BoundingBox::new(
        (cx as f32 - 50.0).max(0.0),
        (cy as f32 - 75.0).max(0.0),
        100.0_f32.min(width as f32),
        150.0_f32.min(height as f32),
    );
    let score = (skin.len() as f32 / 100.0).min(0.95);
    vec![RawDetection::new("person", score, bbox)]
}

fn edge_map(image: &RgbImage) -> Vec<Vec<f32>> {
    let (width, height) = image.dimensions();
    let mut edges = vec![vec![0.0; width as usize]; height as usize];
    if width < 3 || height < 3 {
        return edges;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = image.get_pixel(x + 1, y)[0] as f32 - image.get_pixel(x - 1, y)[0] as f32;
            let gy = image.get_pixel(x, y + 1)[0] as f32 - image.get_pixel(x, y - 1)[0] as f32;
            edges[y as usize][x as usize] = (gx * gx + gy * gy).sqrt();
        }
    }
    edges
}

/// Mean edge strength along the outline of a `w`x`h` box at (x, y).
fn outline_score(edges: &[Vec<f32>], x: usize, y: usize, w: usize, h: usize) -> f32 {
    let mut total = 0.0;
    let mut samples = 0usize;

    for i in x..=x + w {
        total += edges[y][i] + edges[y + h][i];
        samples += 2;
    }
    for row in edges.iter().take(y + h + 1).skip(y) {
        total += row[x] + row[x + w];
        samples += 2;
    }
    total / samples as f32
}

fn detect_screens(image: &RgbImage) -> Vec<RawDetection> {
    const W: u32 = 60;
    const H: u32 = 45;
    const STEP: usize = 20;

    let (width, height) = image.dimensions();
    if width <= W + 2 || height <= H + 2 {
        return Vec::new();
    }

    let edges = edge_map(image);
    let mut found = Vec::new();

    for y in (1..(height - H - 1) as usize).step_by(STEP) {
        for x in (1..(width - W - 1) as usize).step_by(STEP) {
            let score = outline_score(&edges, x, y, W as usize, H as usize);
            if score > 30.0 {
                let confidence = (score / 100.0).min(0.9);
                found.push(RawDetection::new(
                    "tv",
                    confidence,
                    BoundingBox::new(x as f32, y as f32, W as f32, H as f32),
                ));
            }
        }
    }
    found
}

fn overlap_ratio(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = (a.right().min(b.right()) - a.x.max(b.x)).max(0.0);
    let iy = (a.bottom().min(b.bottom()) - a.y.max(b.y)).max(0.0);
    let intersection = ix * iy;
    let union = a.width * a.height + b.width * b.height - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Most confident first; drops anything overlapping a kept box by more than `threshold` IoU.
fn merge_overlapping(mut objects: Vec<RawDetection>, threshold: f32) -> Vec<RawDetection> {
    objects.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<RawDetection> = Vec::new();
    for obj in objects {
        if kept.iter().all(|k| overlap_ratio(&k.bbox, &obj.bbox) <= threshold) {
            kept.push(obj);
        }
    }
    kept
}
