pub mod camera;
pub mod config;
pub mod console;
pub mod controller;
pub mod detection;
pub mod detector;
pub mod error;
pub mod labels;
pub mod overlay;
pub mod position;
pub mod session;
pub mod speech;

pub use controller::{DetectionLoop, LoopHandle, LoopOptions, LoopState, LoopStatus};
pub use detection::{BoundingBox, Detection, DetectionSet, RawDetection};
pub use position::Zone;
