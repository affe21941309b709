use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Axis-aligned box in frame pixel coordinates, `x`/`y` at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// One result exactly as the object detector reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class: impl Into<String>, score: f32, bbox: impl Into<BoundingBox>) -> Self {
        Self {
            class: class.into(),
            score,
            bbox: bbox.into(),
        }
    }
}

/// A detector result that passed the sensitivity threshold in some cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub timestamp: Instant,
}

impl Detection {
    /// Overlay caption, e.g. `person (95%)`.
    pub fn caption(&self) -> String {
        format!("{} ({}%)", self.class, (self.score * 100.0).round() as i32)
    }
}

/// Detections of a single cycle, in detector output order.
pub type DetectionSet = Vec<Detection>;

/// Keep every raw result whose score reaches `sensitivity`, stamped with `now`.
///
/// Detector order is preserved; ranking is left to the alert selector.
pub fn filter_detections(raw: Vec<RawDetection>, sensitivity: f32, now: Instant) -> DetectionSet {
    let total = raw.len();
    let kept: DetectionSet = raw
        .into_iter()
        .filter(|r| r.score >= sensitivity)
        .map(|r| Detection {
            class: r.class,
            score: r.score,
            bbox: r.bbox,
            timestamp: now,
        })
        .collect();

    debug!("Filter kept {}/{} detections at sensitivity {:.2}", kept.len(), total, sensitivity);
    kept
}
