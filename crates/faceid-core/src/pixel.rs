//! Pixel buffers and face-region cropping.

use crate::preprocess::{alloc, PreprocessError};
use crate::types::FaceRegion;
use serde::{Deserialize, Serialize};

/// A face crop must be strictly larger than this on both sides.
const MIN_CROP_EDGE: u32 = 20;

/// Interleaved pixel layout, named by byte order in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes/pixel: A, R, G, B.
    Argb32,
    /// 4 bytes/pixel: B, G, R, A.
    Bgra32,
    /// 4 bytes/pixel: R, G, B, A.
    Rgba32,
    /// 3 bytes/pixel: R, G, B.
    Rgb24,
    /// 1 byte/pixel luminance.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb32 | PixelFormat::Bgra32 | PixelFormat::Rgba32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Byte offsets of `[R, G, B, A]` within one pixel.
    ///
    /// Only the 32-bit formats carry all four channels; everything else
    /// returns `None` and is rejected by the preprocessor.
    pub fn channel_offsets(self) -> Option<[usize; 4]> {
        match self {
            PixelFormat::Argb32 => Some([1, 2, 3, 0]),
            PixelFormat::Bgra32 => Some([2, 1, 0, 3]),
            PixelFormat::Rgba32 => Some([0, 1, 2, 3]),
            PixelFormat::Rgb24 | PixelFormat::Gray8 => None,
        }
    }
}

/// Read-only view of a pixel grid owned by someone else (camera, decoder, crop).
///
/// Rows may be padded: `stride` is the distance in bytes between the starts
/// of consecutive rows.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
}

impl<'a> PixelBuffer<'a> {
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<Self, PreprocessError> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        if stride < row_bytes {
            return Err(PreprocessError::InvalidBuffer(format!(
                "stride {stride} shorter than row of {row_bytes} bytes"
            )));
        }

        let required = match height {
            0 => 0,
            h => stride * (h as usize - 1) + row_bytes,
        };
        if data.len() < required {
            return Err(PreprocessError::InvalidBuffer(format!(
                "{width}x{height} {format:?} needs {required} bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    /// A buffer whose rows are packed with no padding.
    pub fn packed(
        data: &'a [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, PreprocessError> {
        Self::new(data, width, height, width as usize * format.bytes_per_pixel(), format)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pixel bytes of row `y`, without trailing padding. `None` past the last row.
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        self.data.get(start..start + len)
    }
}

/// A tightly packed pixel grid that owns its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedPixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl OwnedPixelBuffer {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, PreprocessError> {
        // Validate once through the borrowed constructor.
        PixelBuffer::packed(&data, width, height, format)?;
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn as_buffer(&self) -> PixelBuffer<'_> {
        PixelBuffer {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width as usize * self.format.bytes_per_pixel(),
            format: self.format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

impl From<image::RgbaImage> for OwnedPixelBuffer {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            format: PixelFormat::Rgba32,
        }
    }
}

/// Crop a face region out of `buffer`, keeping the source pixel format.
///
/// The region comes from an external detector in image pixel coordinates and
/// is re-clamped here: the origin is pinned inside the image and the size is
/// cut at the right/bottom edges. Regions that end up 20px or smaller on
/// either side are rejected.
pub fn crop(
    buffer: &PixelBuffer<'_>,
    region: &FaceRegion,
) -> Result<OwnedPixelBuffer, PreprocessError> {
    if ![region.x, region.y, region.width, region.height]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(PreprocessError::ConversionFailed(format!(
            "non-finite face region {region:?}"
        )));
    }
    if buffer.width() == 0 || buffer.height() == 0 {
        return Err(PreprocessError::RegionTooSmall {
            width: 0.0,
            height: 0.0,
            min: MIN_CROP_EDGE,
        });
    }

    let img_w = buffer.width() as f32;
    let img_h = buffer.height() as f32;
    let x = region.x.clamp(0.0, img_w - 1.0);
    let y = region.y.clamp(0.0, img_h - 1.0);
    let w = region.width.min(img_w - x);
    let h = region.height.min(img_h - y);

    if w <= MIN_CROP_EDGE as f32 || h <= MIN_CROP_EDGE as f32 {
        return Err(PreprocessError::RegionTooSmall {
            width: w,
            height: h,
            min: MIN_CROP_EDGE,
        });
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as u32;
    let crop_w = w as u32;
    let crop_h = h as u32;

    let bpp = buffer.format().bytes_per_pixel();
    let row_len = crop_w as usize * bpp;
    let mut data = alloc::<u8>(row_len * crop_h as usize)?;
    for row in y0..y0 + crop_h {
        let src = buffer
            .row(row)
            .and_then(|r| r.get(x0 * bpp..x0 * bpp + row_len))
            .ok_or_else(|| PreprocessError::InvalidBuffer(format!("crop row {row} out of range")))?;
        data.extend_from_slice(src);
    }

    tracing::trace!(x = x0, y = y0, width = crop_w, height = crop_h, "cropped face region");

    OwnedPixelBuffer::new(data, crop_w, crop_h, buffer.format())
}
