use serde::{Deserialize, Serialize};

use crate::detection::BoundingBox;

/// Frame width assumed when the video source has not reported one yet.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;

/// Qualitative horizontal position of an object relative to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    FarLeft,
    Left,
    Center,
    Right,
    FarRight,
}

impl Zone {
    pub const ALL: [Zone; 5] = [
        Zone::FarLeft,
        Zone::Left,
        Zone::Center,
        Zone::Right,
        Zone::FarRight,
    ];

    /// Phrase appended to the class name in a spoken alert.
    pub fn phrase(self) -> &'static str {
        match self {
            Zone::FarLeft => "to your left",
            Zone::Left => "slightly to your left",
            Zone::Center => "directly ahead",
            Zone::Right => "slightly to your right",
            Zone::FarRight => "to your right",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::FarLeft => "far_left",
            Zone::Left => "left",
            Zone::Center => "center",
            Zone::Right => "right",
            Zone::FarRight => "far_right",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map the horizontal center of `bbox` onto one of five zones.
///
/// The frame is split at 33% and 67% of its width. Anything left of half the
/// first split is far left; anything right of 1.5x the second split is far
/// right. A `frame_width` of zero falls back to [`DEFAULT_FRAME_WIDTH`].
pub fn classify(bbox: &BoundingBox, frame_width: u32) -> Zone {
    let width = if frame_width == 0 {
        DEFAULT_FRAME_WIDTH
    } else {
        frame_width
    } as f64;

    let center_x = bbox.x as f64 + bbox.width as f64 / 2.0;
    let left_third = 0.33 * width;
    let right_third = 0.67 * width;

    if center_x < 0.5 * left_third {
        Zone::FarLeft
    } else if center_x < left_third {
        Zone::Left
    } else if center_x > 1.5 * right_third {
        Zone::FarRight
    } else if center_x > right_third {
        Zone::Right
    } else {
        Zone::Center
    }
}
