//! Pixel buffers: interleaved camera frames with an explicit row stride.

use thiserror::Error;

/// Interleaved pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit B, G, R, A (native camera output on most mobile platforms).
    Bgra32,
    /// 32-bit R, G, B, A.
    Rgba32,
    /// 24-bit R, G, B without alpha.
    Rgb24,
    /// 8-bit grayscale.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 | PixelFormat::Rgba32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Byte offsets of R, G, B within one pixel, for 4-byte formats with alpha.
    pub fn rgb_offsets(self) -> Option<[usize; 3]> {
        match self {
            PixelFormat::Bgra32 => Some([2, 1, 0]),
            PixelFormat::Rgba32 => Some([0, 1, 2]),
            PixelFormat::Rgb24 | PixelFormat::Gray8 => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PixelBufferError {
    #[error("row stride {bytes_per_row} is smaller than {width} px × {bpp} bytes")]
    StrideTooSmall {
        bytes_per_row: usize,
        width: u32,
        bpp: usize,
    },
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// An owned camera frame.
#[derive(Clone)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_row", &self.bytes_per_row)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Wrap interleaved pixel bytes. Rows may carry trailing padding.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        bytes_per_row: usize,
        format: PixelFormat,
    ) -> Result<Self, PixelBufferError> {
        let bpp = format.bytes_per_pixel();
        if bytes_per_row < width as usize * bpp {
            return Err(PixelBufferError::StrideTooSmall {
                bytes_per_row,
                width,
                bpp,
            });
        }
        let expected = bytes_per_row * height as usize;
        if data.len() < expected {
            return Err(PixelBufferError::TooShort {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            bytes_per_row,
            format,
        })
    }

    /// Wrap tightly packed pixel bytes (no row padding).
    pub fn packed(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, PixelBufferError> {
        let bytes_per_row = width as usize * format.bytes_per_pixel();
        Self::new(data, width, height, bytes_per_row, format)
    }

    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            bytes_per_row: width as usize * 4,
            format: PixelFormat::Rgba32,
        }
    }

    pub fn from_dynamic_image(image: image::DynamicImage) -> Self {
        Self::from_rgba_image(image.into_rgba8())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes of row `y`, without trailing padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.bytes_per_row;
        let len = self.width as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_bgra() {
        let buf = PixelBuffer::packed(vec![0u8; 4 * 3 * 2], 3, 2, PixelFormat::Bgra32).unwrap();
        assert_eq!(buf.bytes_per_row(), 12);
        assert_eq!(buf.row(1).len(), 12);
    }

    #[test]
    fn test_padded_rows() {
        // 2x2 BGRA with 4 bytes padding per row
        let mut data = vec![0u8; 12 * 2];
        data[12] = 7;
        let buf = PixelBuffer::new(data, 2, 2, 12, PixelFormat::Bgra32).unwrap();
        assert_eq!(buf.row(1).len(), 8);
        assert_eq!(buf.row(1)[0], 7);
    }

    #[test]
    fn test_stride_too_small() {
        let err = PixelBuffer::new(vec![0u8; 64], 4, 2, 8, PixelFormat::Rgba32).unwrap_err();
        assert!(matches!(err, PixelBufferError::StrideTooSmall { .. }));
    }

    #[test]
    fn test_buffer_too_short() {
        let err = PixelBuffer::packed(vec![0u8; 10], 2, 2, PixelFormat::Rgba32).unwrap_err();
        assert!(matches!(
            err,
            PixelBufferError::TooShort { expected: 16, actual: 10 }
        ));
    }

    #[test]
    fn test_rgb_offsets() {
        assert_eq!(PixelFormat::Bgra32.rgb_offsets(), Some([2, 1, 0]));
        assert_eq!(PixelFormat::Rgba32.rgb_offsets(), Some([0, 1, 2]));
        assert_eq!(PixelFormat::Gray8.rgb_offsets(), None);
    }

    #[test]
    fn test_from_rgba_image() {
        let img = image::RgbaImage::from_pixel(5, 4, image::Rgba([1, 2, 3, 255]));
        let buf = PixelBuffer::from_rgba_image(img);
        assert_eq!((buf.width(), buf.height()), (5, 4));
        assert_eq!(buf.format(), PixelFormat::Rgba32);
        assert_eq!(&buf.row(0)[..4], &[1, 2, 3, 255]);
    }
}
