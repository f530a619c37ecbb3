use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    /// Build from normalized `(top, left, bottom, right)` corners, the layout
    /// SSD postprocess heads emit.
    pub fn from_normalized_corners(top: f32, left: f32, bottom: f32, right: f32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    /// Scale x/width by `sx` and y/height by `sy`.
    pub fn scaled(self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// 8-bit RGBA display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Hex string in `#rrggbb` form (alpha omitted).
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Rgba> for image::Rgba<u8> {
    fn from(c: Rgba) -> Self {
        image::Rgba([c.r, c.g, c.b, c.a])
    }
}

/// One formatted detection: a labeled, colored box with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub confidence: f32,
    pub class_name: String,
    pub bounding_box: Rect,
    pub display_color: Rgba,
}

impl std::fmt::Display for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ confidence: {}, class_name: {} }}",
            self.confidence, self.class_name
        )
    }
}

/// Detections for one frame that made it through the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Wall-clock time of the model invocation, in milliseconds.
    pub elapsed_millis: f64,
    /// Sorted by confidence, highest first.
    pub detections: Vec<Detection>,
}

impl InferenceResult {
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Highest-confidence detection, if any.
    pub fn best(&self) -> Option<&Detection> {
        self.detections.first()
    }
}
