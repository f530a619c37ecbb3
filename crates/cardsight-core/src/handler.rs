//! Per-frame detection: preprocess, invoke the model, format the results.

use crate::engine::{EngineError, InferenceEngine, OrtEngine};
use crate::formatter::{self, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::frame::PixelBuffer;
use crate::labels::{LabelError, LabelTable};
use crate::preprocess::{FormatError, InputSpec, Preprocessor, ResizeMode, DEFAULT_INPUT_SIZE};
use crate::types::InferenceResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// A resource resolved by name and extension inside the model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub extension: String,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
        }
    }

    /// Parse `name.ext`; a missing extension yields an empty one.
    pub fn parse(file_name: &str) -> Self {
        match file_name.rsplit_once('.') {
            Some((name, ext)) if !name.is_empty() => Self::new(name, ext),
            _ => Self::new(file_name, ""),
        }
    }

    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        }
    }

    pub fn resolve(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Model and labels file pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAssets {
    pub model: FileInfo,
    pub labels: FileInfo,
}

impl Default for ModelAssets {
    /// The MobileNet-SSD card detector.
    fn default() -> Self {
        Self {
            model: FileInfo::new("inference_graph", "onnx"),
            labels: FileInfo::new("labelmap_mobilenet_card", "txt"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub model_dir: PathBuf,
    pub assets: ModelAssets,
    pub thread_count: usize,
    pub threshold: f32,
    pub resize_mode: ResizeMode,
    /// Input size used when the model does not declare static dims.
    pub fallback_input_size: usize,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            model_dir: crate::default_model_dir(),
            assets: ModelAssets::default(),
            thread_count: 1,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            resize_mode: ResizeMode::default(),
            fallback_input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl HandlerOptions {
    pub fn model_path(&self) -> PathBuf {
        self.assets.model.resolve(&self.model_dir)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.assets.labels.resolve(&self.model_dir)
    }
}

/// Startup failures. None of these are recoverable at runtime.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to load model: {0}")]
    Model(#[from] EngineError),
    #[error("failed to load labels: {0}")]
    Labels(#[from] LabelError),
}

/// Per-frame failures. The frame is dropped; nothing partial is produced.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Inference(#[from] EngineError),
}

/// Runs detection on camera frames against one model.
///
/// Holds its own preprocessing scratch, so use one handler per worker. The
/// label table is shared and read-only.
pub struct DetectionHandler<E = OrtEngine> {
    engine: E,
    labels: Arc<LabelTable>,
    preprocessor: Preprocessor,
    threshold: f32,
}

impl DetectionHandler<OrtEngine> {
    /// Load the model and labels named by `options`.
    pub fn load(options: &HandlerOptions) -> Result<Self, HandlerError> {
        let model_path = options.model_path();
        let engine = OrtEngine::load_with_fallback(
            &model_path,
            options.thread_count,
            options.fallback_input_size,
        )?;
        let labels = LabelTable::load(options.labels_path())?;
        Ok(Self::new(engine, Arc::new(labels), options))
    }
}

impl<E: InferenceEngine> DetectionHandler<E> {
    pub fn new(engine: E, labels: Arc<LabelTable>, options: &HandlerOptions) -> Self {
        let preprocessor = Preprocessor::new(engine.input_spec(), options.resize_mode);
        tracing::debug!(
            spec = ?engine.input_spec(),
            resize = ?options.resize_mode,
            threshold = options.threshold,
            labels = labels.len(),
            "detection handler ready"
        );
        Self {
            engine,
            labels,
            preprocessor,
            threshold: options.threshold,
        }
    }

    pub fn labels(&self) -> &Arc<LabelTable> {
        &self.labels
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn input_spec(&self) -> InputSpec {
        self.preprocessor.spec()
    }

    /// Detect on one frame, or `None` if the frame could not be used.
    ///
    /// Failures are logged and the frame is treated as dropped; callers
    /// should just wait for the next one.
    pub fn run_model(&mut self, frame: &PixelBuffer) -> Option<InferenceResult> {
        match self.try_run_model(frame) {
            Ok(result) => Some(result),
            Err(FrameError::Format(e)) => {
                tracing::debug!(error = %e, "dropping frame");
                None
            }
            Err(FrameError::Inference(e)) => {
                tracing::warn!(error = %e, "inference failed; dropping frame");
                None
            }
        }
    }

    /// Like [`run_model`](Self::run_model), but returns the failure.
    pub fn try_run_model(&mut self, frame: &PixelBuffer) -> Result<InferenceResult, FrameError> {
        let input = self.preprocessor.preprocess(frame)?;

        let start = Instant::now();
        let raw = self.engine.invoke(input)?;
        let elapsed_millis = start.elapsed().as_secs_f64() * 1000.0;

        let detections = formatter::format_results(
            &raw,
            &self.labels,
            self.threshold,
            frame.width() as f32,
            frame.height() as f32,
        );
        tracing::trace!(
            elapsed_ms = elapsed_millis,
            raw_count = raw.count,
            kept = detections.len(),
            "frame processed"
        );

        Ok(InferenceResult {
            elapsed_millis,
            detections,
        })
    }
}
