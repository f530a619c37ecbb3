//! Frame preprocessing: camera pixel buffer → NHWC RGB model input.
//!
//! Runs once per frame. All scratch space lives in the [`Preprocessor`] and is
//! reused, so after the first frame the hot path does not allocate.

use crate::frame::{PixelBuffer, PixelFormat};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: usize = 320;
pub const INPUT_CHANNELS: usize = 3;
const BATCH_SIZE: usize = 1;
const FLOAT_SCALE: f32 = 255.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unsupported pixel format {0:?} (need a 32-bit format with alpha)")]
    UnsupportedFormat(PixelFormat),
    #[error("frame has zero width or height")]
    EmptyFrame,
}

/// How the frame is fitted to the square model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    /// Crop the largest centered square, then scale.
    #[default]
    CenterCrop,
    /// Scale the whole frame, ignoring aspect ratio.
    Stretch,
}

impl FromStr for ResizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crop" | "center-crop" | "center_crop" => Ok(ResizeMode::CenterCrop),
            "stretch" => Ok(ResizeMode::Stretch),
            other => Err(format!("unknown resize mode {other:?} (expected crop or stretch)")),
        }
    }
}

/// What the model expects as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub width: usize,
    pub height: usize,
    /// `u8` input when true, `f32` in `[0, 1]` otherwise.
    pub quantized: bool,
}

impl InputSpec {
    pub fn element_count(&self) -> usize {
        BATCH_SIZE * self.width * self.height * INPUT_CHANNELS
    }

    /// NHWC shape of the input tensor.
    pub fn shape(&self) -> [usize; 4] {
        [BATCH_SIZE, self.height, self.width, INPUT_CHANNELS]
    }
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            width: DEFAULT_INPUT_SIZE,
            height: DEFAULT_INPUT_SIZE,
            quantized: false,
        }
    }
}

/// Borrowed view of a preprocessed frame, ready for the engine.
#[derive(Debug, Clone, Copy)]
pub enum InputTensor<'a> {
    Quantized { data: &'a [u8], shape: [usize; 4] },
    Float { data: &'a [f32], shape: [usize; 4] },
}

impl InputTensor<'_> {
    pub fn shape(&self) -> [usize; 4] {
        match self {
            InputTensor::Quantized { shape, .. } | InputTensor::Float { shape, .. } => *shape,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InputTensor::Quantized { data, .. } => data.len(),
            InputTensor::Float { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source rectangle sampled from the frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SourceRegion {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl SourceRegion {
    fn for_frame(width: u32, height: u32, mode: ResizeMode) -> Self {
        let (w, h) = (width as f32, height as f32);
        match mode {
            ResizeMode::Stretch => Self { x: 0.0, y: 0.0, width: w, height: h },
            ResizeMode::CenterCrop => {
                let side = width.min(height);
                Self {
                    x: ((width - side) / 2) as f32,
                    y: ((height - side) / 2) as f32,
                    width: side as f32,
                    height: side as f32,
                }
            }
        }
    }
}

/// Reusable per-worker preprocessor.
pub struct Preprocessor {
    spec: InputSpec,
    mode: ResizeMode,
    rgb: Vec<u8>,
    floats: Vec<f32>,
}

impl Preprocessor {
    pub fn new(spec: InputSpec, mode: ResizeMode) -> Self {
        let rgb = vec![0u8; spec.element_count()];
        let floats = if spec.quantized {
            Vec::new()
        } else {
            vec![0f32; spec.element_count()]
        };
        Self {
            spec,
            mode,
            rgb,
            floats,
        }
    }

    pub fn spec(&self) -> InputSpec {
        self.spec
    }

    /// Convert a frame into model input.
    ///
    /// Only 4-byte interleaved formats with alpha are accepted. The result
    /// always holds exactly `width × height × 3` values in RGB order.
    pub fn preprocess(&mut self, frame: &PixelBuffer) -> Result<InputTensor<'_>, FormatError> {
        let offsets = frame
            .format()
            .rgb_offsets()
            .ok_or(FormatError::UnsupportedFormat(frame.format()))?;
        if frame.is_empty() {
            return Err(FormatError::EmptyFrame);
        }

        let region = SourceRegion::for_frame(frame.width(), frame.height(), self.mode);
        resize_rgb_into(
            frame,
            region,
            offsets,
            self.spec.width,
            self.spec.height,
            &mut self.rgb,
        );

        let shape = self.spec.shape();
        if self.spec.quantized {
            return Ok(InputTensor::Quantized {
                data: &self.rgb,
                shape,
            });
        }

        for (dst, &src) in self.floats.iter_mut().zip(self.rgb.iter()) {
            *dst = src as f32 / FLOAT_SCALE;
        }
        Ok(InputTensor::Float {
            data: &self.floats,
            shape,
        })
    }
}

/// Bilinear resize of `region` into `out_w × out_h`, picking R, G, B via
/// `offsets` and dropping alpha. `out` must hold `out_w * out_h * 3` bytes.
fn resize_rgb_into(
    frame: &PixelBuffer,
    region: SourceRegion,
    offsets: [usize; 3],
    out_w: usize,
    out_h: usize,
    out: &mut [u8],
) {
    let bpp = frame.format().bytes_per_pixel();

    let scale_x = region.width / out_w as f32;
    let scale_y = region.height / out_h as f32;
    let min_x = region.x;
    let max_x = region.x + region.width - 1.0;
    let min_y = region.y;
    let max_y = region.y + region.height - 1.0;
    let last_col = frame.width() as usize - 1;
    let last_row = frame.height() as usize - 1;

    for y in 0..out_h {
        let src_y = (region.y + (y as f32 + 0.5) * scale_y - 0.5).clamp(min_y, max_y);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(last_row);
        let fy = src_y - y0 as f32;
        let top = frame.row(y0 as u32);
        let bottom = frame.row(y1 as u32);

        for x in 0..out_w {
            let src_x = (region.x + (x as f32 + 0.5) * scale_x - 0.5).clamp(min_x, max_x);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(last_col);
            let fx = src_x - x0 as f32;

            let (left, right) = (x0 * bpp, x1 * bpp);

            let dst = (y * out_w + x) * INPUT_CHANNELS;
            for (c, &off) in offsets.iter().enumerate() {
                let val = top[left + off] as f32 * (1.0 - fx) * (1.0 - fy)
                    + top[right + off] as f32 * fx * (1.0 - fy)
                    + bottom[left + off] as f32 * (1.0 - fx) * fy
                    + bottom[right + off] as f32 * fx * fy;
                out[dst + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(size: usize, quantized: bool) -> InputSpec {
        InputSpec {
            width: size,
            height: size,
            quantized,
        }
    }

    fn uniform_bgra(width: u32, height: u32, bgra: [u8; 4]) -> PixelBuffer {
        let data = bgra
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        PixelBuffer::packed(data, width, height, PixelFormat::Bgra32).unwrap()
    }

    #[test]
    fn test_output_length_is_fixed() {
        let mut pre = Preprocessor::new(InputSpec::default(), ResizeMode::CenterCrop);
        for (w, h) in [(640, 480), (100, 100), (31, 977), (1, 1)] {
            let frame = uniform_bgra(w, h, [1, 2, 3, 255]);
            let tensor = pre.preprocess(&frame).unwrap();
            assert_eq!(tensor.len(), 320 * 320 * 3, "frame {w}x{h}");
            assert_eq!(tensor.shape(), [1, 320, 320, 3]);
        }
    }

    #[test]
    fn test_rejects_formats_without_alpha() {
        let mut pre = Preprocessor::new(spec(8, true), ResizeMode::CenterCrop);
        let gray = PixelBuffer::packed(vec![0u8; 16], 4, 4, PixelFormat::Gray8).unwrap();
        assert_eq!(
            pre.preprocess(&gray).unwrap_err(),
            FormatError::UnsupportedFormat(PixelFormat::Gray8)
        );
        let rgb = PixelBuffer::packed(vec![0u8; 48], 4, 4, PixelFormat::Rgb24).unwrap();
        assert!(pre.preprocess(&rgb).is_err());
    }

    #[test]
    fn test_rejects_empty_frame() {
        let mut pre = Preprocessor::new(spec(8, true), ResizeMode::CenterCrop);
        let empty = PixelBuffer::packed(Vec::new(), 0, 0, PixelFormat::Bgra32).unwrap();
        assert_eq!(pre.preprocess(&empty).unwrap_err(), FormatError::EmptyFrame);
    }

    #[test]
    fn test_bgra_swizzled_to_rgb_quantized() {
        let mut pre = Preprocessor::new(spec(16, true), ResizeMode::CenterCrop);
        let frame = uniform_bgra(40, 30, [10, 20, 30, 255]);
        match pre.preprocess(&frame).unwrap() {
            InputTensor::Quantized { data, .. } => {
                assert!(data.chunks(3).all(|px| px == [30, 20, 10]));
            }
            InputTensor::Float { .. } => panic!("expected quantized tensor"),
        }
    }

    #[test]
    fn test_rgba_kept_in_order() {
        let mut pre = Preprocessor::new(spec(4, true), ResizeMode::Stretch);
        let data = [7u8, 8, 9, 0].repeat(16);
        let frame = PixelBuffer::packed(data, 4, 4, PixelFormat::Rgba32).unwrap();
        let InputTensor::Quantized { data, .. } = pre.preprocess(&frame).unwrap() else {
            panic!("expected quantized tensor");
        };
        assert!(data.chunks(3).all(|px| px == [7, 8, 9]));
    }

    #[test]
    fn test_float_normalization() {
        let mut pre = Preprocessor::new(spec(8, false), ResizeMode::CenterCrop);
        let frame = uniform_bgra(8, 8, [0, 51, 255, 255]);
        let InputTensor::Float { data, .. } = pre.preprocess(&frame).unwrap() else {
            panic!("expected float tensor");
        };
        assert_eq!(data.len(), 8 * 8 * 3);
        assert!((data[0] - 1.0).abs() < 1e-6);
        assert!((data[1] - 0.2).abs() < 1e-6);
        assert!(data[2].abs() < 1e-6);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_same_size_is_exact_copy() {
        // 4x4 BGRA gradient; identity resize must preserve every pixel.
        let mut data = Vec::new();
        for i in 0..16u8 {
            data.extend_from_slice(&[i, i + 100, i + 200, 255]);
        }
        let frame = PixelBuffer::packed(data, 4, 4, PixelFormat::Bgra32).unwrap();
        let mut pre = Preprocessor::new(spec(4, true), ResizeMode::CenterCrop);
        let InputTensor::Quantized { data, .. } = pre.preprocess(&frame).unwrap() else {
            panic!("expected quantized tensor");
        };
        for i in 0..16usize {
            let b = i as u8;
            assert_eq!(&data[i * 3..i * 3 + 3], &[b + 200, b + 100, b]);
        }
    }

    #[test]
    fn test_center_crop_discards_sides() {
        // 8x4 frame: left and right 2 columns red, middle 4 columns blue.
        let mut data = Vec::new();
        for _y in 0..4 {
            for x in 0..8 {
                let px = if (2..6).contains(&x) { [255, 0, 0, 255] } else { [0, 0, 255, 255] };
                data.extend_from_slice(&px);
            }
        }
        let frame = PixelBuffer::packed(data, 8, 4, PixelFormat::Bgra32).unwrap();
        let mut pre = Preprocessor::new(spec(4, true), ResizeMode::CenterCrop);
        let InputTensor::Quantized { data, .. } = pre.preprocess(&frame).unwrap() else {
            panic!("expected quantized tensor");
        };
        assert!(data.chunks(3).all(|px| px == [0, 0, 255]));
    }

    #[test]
    fn test_padded_stride_is_ignored() {
        // 2x2 BGRA with 8 garbage bytes of padding per row.
        let mut data = Vec::new();
        for _ in 0..2 {
            data.extend_from_slice(&[1, 2, 3, 255, 1, 2, 3, 255]);
            data.extend_from_slice(&[99; 8]);
        }
        let frame = PixelBuffer::new(data, 2, 2, 16, PixelFormat::Bgra32).unwrap();
        let mut pre = Preprocessor::new(spec(2, true), ResizeMode::Stretch);
        let InputTensor::Quantized { data, .. } = pre.preprocess(&frame).unwrap() else {
            panic!("expected quantized tensor");
        };
        assert!(data.chunks(3).all(|px| px == [3, 2, 1]));
    }

    #[test]
    fn test_resize_mode_from_str() {
        assert_eq!("crop".parse::<ResizeMode>().unwrap(), ResizeMode::CenterCrop);
        assert_eq!("Stretch".parse::<ResizeMode>().unwrap(), ResizeMode::Stretch);
        assert!("fit".parse::<ResizeMode>().is_err());
    }

    #[test]
    fn test_source_region_center_crop() {
        let region = SourceRegion::for_frame(640, 480, ResizeMode::CenterCrop);
        assert_eq!(
            region,
            SourceRegion { x: 80.0, y: 0.0, width: 480.0, height: 480.0 }
        );
    }
}
