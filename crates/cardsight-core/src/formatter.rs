//! Decode raw SSD tensors into filtered, rescaled, colored detections.

use crate::engine::RawOutput;
use crate::labels::LabelTable;
use crate::palette;
use crate::types::{Detection, Rect};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Turn one invocation's raw output into detections sorted by confidence.
///
/// Boxes are read as normalized `(top, left, bottom, right)` and scaled to
/// `original_width × original_height` pixels. Slots scoring below
/// `threshold` are skipped. Equal confidences keep model output order.
pub fn format_results(
    output: &RawOutput,
    labels: &LabelTable,
    threshold: f32,
    original_width: f32,
    original_height: f32,
) -> Vec<Detection> {
    let count = output.valid_count();
    if count == 0 {
        return Vec::new();
    }

    let mut detections = Vec::with_capacity(count);

    for i in 0..count {
        let score = output.scores[i];
        if score.is_nan() || score < threshold {
            continue;
        }

        let class_index = output.classes[i];
        let entry = labels
            .slot_for_class(class_index)
            .and_then(|slot| labels.get(slot).map(|name| (slot, name)));
        let Some((slot, class_name)) = entry else {
            tracing::warn!(
                class_index,
                labels = labels.len(),
                "class index outside label table; model and labels do not match"
            );
            continue;
        };

        let [top, left, bottom, right] = output.corners(i);
        let bounding_box = Rect::from_normalized_corners(top, left, bottom, right)
            .scaled(original_width, original_height);

        detections.push(Detection {
            confidence: score,
            class_name: class_name.to_string(),
            bounding_box,
            display_color: palette::color_for_class(slot),
        });
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    detections
}
