//! Model execution boundary.
//!
//! The handler only ever talks to [`InferenceEngine`]; [`OrtEngine`] runs an
//! SSD-style detection model with ONNX Runtime.

use crate::preprocess::{InputSpec, InputTensor, DEFAULT_INPUT_SIZE, INPUT_CHANNELS};
use ndarray::ArrayView4;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{TensorRef, ValueType};
use std::path::Path;
use thiserror::Error;

/// Upper bound on intra-op threads per session.
pub const MAX_THREADS: usize = 10;
const SSD_NUM_OUTPUTS: usize = 4;
const BOX_COORDS: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model output layout not supported: {0}")]
    OutputLayout(String),
    #[error("input tensor shape {actual:?} does not match model input {expected:?}")]
    InputMismatch {
        expected: [usize; 4],
        actual: [usize; 4],
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Raw SSD postprocess output for one invocation.
///
/// `boxes` holds `(top, left, bottom, right)` per detection, normalized to
/// `[0, 1]`. Only the first `count` slots are meaningful.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub boxes: Vec<f32>,
    pub classes: Vec<f32>,
    pub scores: Vec<f32>,
    pub count: usize,
}

impl RawOutput {
    /// Number of detections that fit in all three per-detection buffers.
    pub fn capacity(&self) -> usize {
        (self.boxes.len() / BOX_COORDS)
            .min(self.classes.len())
            .min(self.scores.len())
    }

    /// `count` clamped to [`capacity`](Self::capacity).
    pub fn valid_count(&self) -> usize {
        let capacity = self.capacity();
        if self.count > capacity {
            tracing::warn!(
                count = self.count,
                capacity,
                "model reported more detections than its buffers hold; clamping"
            );
        }
        self.count.min(capacity)
    }

    /// `(top, left, bottom, right)` of slot `i`.
    pub fn corners(&self, i: usize) -> [f32; 4] {
        let off = i * BOX_COORDS;
        [
            self.boxes[off],
            self.boxes[off + 1],
            self.boxes[off + 2],
            self.boxes[off + 3],
        ]
    }
}

/// An opaque detection model: preprocessed tensor in, raw tensors out.
pub trait InferenceEngine: Send {
    /// Input geometry and element type the model was built for.
    fn input_spec(&self) -> InputSpec;

    /// Run the model once. Blocks for the duration of the invocation.
    fn invoke(&mut self, input: InputTensor<'_>) -> Result<RawOutput, EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn input_spec(&self) -> InputSpec {
        (**self).input_spec()
    }

    fn invoke(&mut self, input: InputTensor<'_>) -> Result<RawOutput, EngineError> {
        (**self).invoke(input)
    }
}

/// Output tensor positions: (boxes, classes, scores, count).
type OutputIndices = (usize, usize, usize, usize);

/// ONNX Runtime backed SSD detector.
pub struct OrtEngine {
    session: Session,
    input_spec: InputSpec,
    output_indices: OutputIndices,
}

impl OrtEngine {
    /// Load a model with `threads` intra-op threads (clamped to `1..=MAX_THREADS`).
    pub fn load(model_path: &Path, threads: usize) -> Result<Self, EngineError> {
        Self::load_with_fallback(model_path, threads, DEFAULT_INPUT_SIZE)
    }

    /// Like [`load`](Self::load), using `fallback_size` when the model input
    /// has dynamic spatial dims.
    pub fn load_with_fallback(
        model_path: &Path,
        threads: usize,
        fallback_size: usize,
    ) -> Result<Self, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::ModelNotFound(model_path.display().to_string()));
        }

        let threads = threads.clamp(1, MAX_THREADS);
        let session = Session::builder()?
            .with_intra_threads(threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            threads,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded detection model"
        );

        if output_names.len() < SSD_NUM_OUTPUTS {
            return Err(EngineError::OutputLayout(format!(
                "SSD model requires {SSD_NUM_OUTPUTS} outputs (boxes, classes, scores, count), got {}",
                output_names.len()
            )));
        }

        let input_spec = session
            .inputs()
            .first()
            .map(|input| input_spec_from_type(input.dtype(), fallback_size))
            .ok_or_else(|| EngineError::InferenceFailed("model declares no inputs".into()))?;
        tracing::debug!(?input_spec, "detection model input");

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "SSD output tensor mapping");

        Ok(Self {
            session,
            input_spec,
            output_indices,
        })
    }
}

impl InferenceEngine for OrtEngine {
    fn input_spec(&self) -> InputSpec {
        self.input_spec
    }

    fn invoke(&mut self, input: InputTensor<'_>) -> Result<RawOutput, EngineError> {
        let expected = self.input_spec.shape();
        if input.shape() != expected {
            return Err(EngineError::InputMismatch {
                expected,
                actual: input.shape(),
            });
        }

        let shape_err =
            |e: ndarray::ShapeError| EngineError::InferenceFailed(format!("input view: {e}"));
        let outputs = match input {
            InputTensor::Quantized { data, shape } => {
                let view = ArrayView4::from_shape(shape, data).map_err(shape_err)?;
                self.session.run(ort::inputs![TensorRef::from_array_view(view)?])?
            }
            InputTensor::Float { data, shape } => {
                let view = ArrayView4::from_shape(shape, data).map_err(shape_err)?;
                self.session.run(ort::inputs![TensorRef::from_array_view(view)?])?
            }
        };

        let extract = |idx: usize, what: &str| -> Result<Vec<f32>, EngineError> {
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::InferenceFailed(format!("{what}: {e}")))?;
            Ok(data.to_vec())
        };

        let (boxes_idx, classes_idx, scores_idx, count_idx) = self.output_indices;
        let boxes = extract(boxes_idx, "boxes")?;
        let classes = extract(classes_idx, "classes")?;
        let scores = extract(scores_idx, "scores")?;
        let count = extract(count_idx, "count")?
            .first()
            .map(|&c| c.max(0.0) as usize)
            .unwrap_or(0);

        Ok(RawOutput {
            boxes,
            classes,
            scores,
            count,
        })
    }
}

/// Derive the input spec from the model's first input.
///
/// `[1, H, W, 3]` with static dims sets the size; dynamic dims fall back to
/// `fallback_size`. A `u8` element type marks a quantized model.
fn input_spec_from_type(dtype: &ValueType, fallback_size: usize) -> InputSpec {
    let mut spec = InputSpec {
        width: fallback_size,
        height: fallback_size,
        quantized: false,
    };
    if let ValueType::Tensor { ty, shape, .. } = dtype {
        spec.quantized = *ty == TensorElementType::Uint8;
        let dims: Vec<i64> = shape.iter().copied().collect();
        if let Some((height, width)) = nhwc_size(&dims) {
            spec.height = height;
            spec.width = width;
        } else if dims.iter().all(|&d| d > 0) {
            tracing::warn!(
                ?dims,
                fallback_size,
                "model input is not [1, H, W, 3]; using fallback size"
            );
        }
    }
    spec
}

/// Static `(H, W)` from an NHWC RGB input shape.
fn nhwc_size(dims: &[i64]) -> Option<(usize, usize)> {
    match *dims {
        [_, h, w, c] if h > 0 && w > 0 && c == INPUT_CHANNELS as i64 => {
            Some((h as usize, w as usize))
        }
        _ => None,
    }
}

/// Discover output tensor ordering by name.
///
/// Recognizes TF-Lite postprocess names (`TFLite_Detection_PostProcess`,
/// `…:1`, `…:2`, `…:3`) and export names containing `boxes`, `classes`,
/// `scores` and `num_detections`/`count`. Anything else uses positional
/// ordering `[boxes, classes, scores, count]`.
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let find = |keys: &[&str]| -> Option<usize> {
        names.iter().position(|n| {
            let lower = n.to_ascii_lowercase();
            keys.iter().any(|k| lower.contains(k))
        })
    };

    let named = (
        find(&["boxes"]),
        find(&["classes"]),
        find(&["scores"]),
        find(&["num_detections", "count"]),
    );
    if let (Some(b), Some(c), Some(s), Some(n)) = named {
        tracing::info!("SSD: using name-based output tensor mapping");
        return (b, c, s, n);
    }

    let tflite = |suffix: &str| names.iter().position(|n| n.ends_with(suffix));
    let base = names.iter().position(|n| n == "TFLite_Detection_PostProcess");
    if let (Some(b), Some(c), Some(s), Some(n)) = (base, tflite(":1"), tflite(":2"), tflite(":3")) {
        tracing::info!("SSD: using TF-Lite postprocess output mapping");
        return (b, c, s, n);
    }

    tracing::info!(
        ?names,
        "SSD: output names not recognized, using positional mapping [0]=boxes, [1]=classes, [2]=scores, [3]=count"
    );
    (0, 1, 2, 3)
}
