//! cardsight-core: on-device object detection over camera frames.
//!
//! Converts interleaved camera frames into model input, runs an SSD-style
//! detection model via ONNX Runtime, and decodes its four output tensors
//! into labeled, colored, confidence-sorted detections.

pub mod engine;
pub mod formatter;
pub mod frame;
pub mod handler;
pub mod labels;
pub mod palette;
pub mod preprocess;
pub mod types;

pub use engine::{EngineError, InferenceEngine, OrtEngine, RawOutput};
pub use frame::{PixelBuffer, PixelFormat};
pub use handler::{
    DetectionHandler, FileInfo, FrameError, HandlerError, HandlerOptions, ModelAssets,
};
pub use labels::LabelTable;
pub use preprocess::{FormatError, InputSpec, InputTensor, ResizeMode};
pub use types::{Detection, InferenceResult, Rect, Rgba};

use std::path::PathBuf;

/// Model directory used when none is configured: `$XDG_DATA_HOME/cardsight/models`,
/// falling back to `~/.local/share/cardsight/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("cardsight/models")
}
