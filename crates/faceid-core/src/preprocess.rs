//! Pixel buffer → model input tensor.
//!
//! Three steps, in order:
//! 1. Resize to the model input size with independent X/Y scale factors. No
//!    letterboxing: the embedding model was trained on stretched crops. The
//!    resized buffer is always in the canonical BGRA layout.
//! 2. Drop alpha, BGRA → RGB, pixel by pixel.
//! 3. Quantized models get the RGB bytes as-is. Float models get the whole
//!    tensor standardized to zero mean and unit variance.

use crate::pixel::{PixelBuffer, PixelFormat};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba};
use ndarray::Array4;
use thiserror::Error;

/// Layout every input is converted to before channel extraction.
pub const CANONICAL_FORMAT: PixelFormat = PixelFormat::Bgra32;

/// 4-byte pixels in [`CANONICAL_FORMAT`] order. `Rgba` is only the container;
/// resampling treats the channels independently.
type CanonicalImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("unsupported pixel format: {0:?} (need Argb32, Bgra32, or Rgba32)")]
    UnsupportedFormat(PixelFormat),
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
    #[error("out of memory: failed to allocate {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("face region too small: {width}x{height} (need more than {min}px per side)")]
    RegionTooSmall { width: f32, height: f32, min: u32 },
    #[error("invalid pixel buffer: {0}")]
    InvalidBuffer(String),
}

/// Element type of the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// 8-bit unsigned; pixel bytes are fed unchanged.
    Uint8,
    /// 32-bit float; the tensor is standardized first.
    Float32,
}

impl ElementType {
    pub fn is_quantized(self) -> bool {
        self == ElementType::Uint8
    }
}

/// Spatial input size of the model, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

/// NHWC model input of shape `[1, height, width, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Quantized(Array4<u8>),
    Standardized(Array4<f32>),
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Quantized(a) => a.shape(),
            Tensor::Standardized(a) => a.shape(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Tensor::Quantized(_) => ElementType::Uint8,
            Tensor::Standardized(_) => ElementType::Float32,
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convert `buffer` into the model input tensor for a `target`-sized model.
///
/// Every intermediate buffer is owned by this call and dropped on return,
/// on the error paths too.
pub fn preprocess(
    buffer: &PixelBuffer<'_>,
    target: InputSize,
    quantized: bool,
) -> Result<Tensor, PreprocessError> {
    if target.width == 0 || target.height == 0 {
        return Err(PreprocessError::ConversionFailed(format!(
            "invalid target size {}x{}",
            target.width, target.height
        )));
    }

    let canonical = canonicalize(buffer)?;
    let resized = imageops::resize(&canonical, target.width, target.height, FilterType::Triangle);
    let rgb = drop_alpha(resized.as_raw())?;

    let shape = (1, target.height as usize, target.width as usize, 3);

    if quantized {
        let tensor = Array4::from_shape_vec(shape, rgb)
            .map_err(|e| PreprocessError::ConversionFailed(format!("tensor shape: {e}")))?;
        return Ok(Tensor::Quantized(tensor));
    }

    let floats = standardize(&rgb)?;
    let tensor = Array4::from_shape_vec(shape, floats)
        .map_err(|e| PreprocessError::ConversionFailed(format!("tensor shape: {e}")))?;
    Ok(Tensor::Standardized(tensor))
}

/// Allocate an empty vector able to hold `len` elements, reporting failure
/// instead of aborting.
pub(crate) fn alloc<T>(len: usize) -> Result<Vec<T>, PreprocessError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| PreprocessError::OutOfMemory {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    Ok(v)
}

/// Repack any supported 32-bit layout into packed [`CANONICAL_FORMAT`] pixels.
fn canonicalize(buffer: &PixelBuffer<'_>) -> Result<CanonicalImage, PreprocessError> {
    let [r, g, b, a] = buffer
        .format()
        .channel_offsets()
        .ok_or(PreprocessError::UnsupportedFormat(buffer.format()))?;

    let (width, height) = (buffer.width(), buffer.height());
    if width == 0 || height == 0 {
        return Err(PreprocessError::ConversionFailed(format!(
            "empty source image {width}x{height}"
        )));
    }

    let mut data = alloc::<u8>(width as usize * height as usize * 4)?;
    for y in 0..height {
        let row = buffer.row(y).ok_or_else(|| {
            PreprocessError::InvalidBuffer(format!("row {y} out of range"))
        })?;
        for px in row.chunks_exact(4) {
            data.extend_from_slice(&[px[b], px[g], px[r], px[a]]);
        }
    }

    ImageBuffer::from_raw(width, height, data).ok_or_else(|| {
        PreprocessError::ConversionFailed("canonical buffer size mismatch".to_string())
    })
}

/// Canonical 4-channel pixels → packed RGB, dropping alpha.
fn drop_alpha(canonical: &[u8]) -> Result<Vec<u8>, PreprocessError> {
    let [r, g, b, _] = CANONICAL_FORMAT
        .channel_offsets()
        .ok_or(PreprocessError::UnsupportedFormat(CANONICAL_FORMAT))?;

    let mut rgb = alloc::<u8>(canonical.len() / 4 * 3)?;
    for px in canonical.chunks_exact(4) {
        rgb.extend_from_slice(&[px[r], px[g], px[b]]);
    }
    Ok(rgb)
}

/// Population mean and standard deviation over all elements, with the
/// deviation floored at `1/sqrt(N)`.
fn moments(values: &[f32]) -> (f32, f32) {
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
    let std = variance.sqrt().max(1.0 / n.sqrt());
    (mean, std)
}

/// Whole-tensor standardization (not per channel).
fn standardize(bytes: &[u8]) -> Result<Vec<f32>, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::ConversionFailed(
            "cannot standardize an empty tensor".to_string(),
        ));
    }

    let mut floats = alloc::<f32>(bytes.len())?;
    floats.extend(bytes.iter().map(|&b| b as f32));

    let (mean, std) = moments(&floats);
    for v in floats.iter_mut() {
        *v = (*v - mean) / std;
    }
    Ok(floats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::OwnedPixelBuffer;

    const SIZE_8: InputSize = InputSize { width: 8, height: 8 };

    fn solid(format: PixelFormat, px: [u8; 4], width: u32, height: u32) -> OwnedPixelBuffer {
        let data = px.repeat((width * height) as usize);
        OwnedPixelBuffer::new(data, width, height, format).unwrap()
    }

    /// Deterministic non-uniform RGBA test pattern.
    fn gradient(width: u32, height: u32) -> OwnedPixelBuffer {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 7) as u8, (y * 5) as u8, ((x + y) * 3) as u8, 255]);
            }
        }
        OwnedPixelBuffer::new(data, width, height, PixelFormat::Rgba32).unwrap()
    }

    #[test]
    fn test_output_shape_nhwc() {
        let img = gradient(40, 30);
        let target = InputSize { width: 16, height: 12 };

        let q = preprocess(&img.as_buffer(), target, true).unwrap();
        assert_eq!(q.shape(), &[1, 12, 16, 3]);
        assert_eq!(q.element_type(), ElementType::Uint8);

        let f = preprocess(&img.as_buffer(), target, false).unwrap();
        assert_eq!(f.shape(), &[1, 12, 16, 3]);
        assert_eq!(f.element_type(), ElementType::Float32);
    }

    #[test]
    fn test_red_is_red_in_every_format() {
        let cases = [
            (PixelFormat::Argb32, [255, 255, 0, 0]),
            (PixelFormat::Bgra32, [0, 0, 255, 255]),
            (PixelFormat::Rgba32, [255, 0, 0, 255]),
        ];
        for (format, px) in cases {
            let img = solid(format, px, 8, 8);
            let Tensor::Quantized(t) = preprocess(&img.as_buffer(), SIZE_8, true).unwrap() else {
                panic!("expected quantized tensor for {format:?}");
            };
            for y in 0..8 {
                for x in 0..8 {
                    let rgb = [t[[0, y, x, 0]], t[[0, y, x, 1]], t[[0, y, x, 2]]];
                    assert_eq!(rgb, [255, 0, 0], "{format:?} at ({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn test_resize_stretches_each_axis() {
        // 40x10, left half red and right half blue. Squashing to 8x8 keeps both
        // halves; a centre crop would lose the outer columns' colours.
        let mut data = Vec::new();
        for _ in 0..10 {
            for x in 0..40 {
                let px = if x < 20 { [255, 0, 0, 255] } else { [0, 0, 255, 255] };
                data.extend_from_slice(&px);
            }
        }
        let img = OwnedPixelBuffer::new(data, 40, 10, PixelFormat::Rgba32).unwrap();
        let Tensor::Quantized(t) = preprocess(&img.as_buffer(), SIZE_8, true).unwrap() else {
            panic!("expected quantized tensor");
        };

        for y in 0..8 {
            let left = [t[[0, y, 0, 0]], t[[0, y, 0, 1]], t[[0, y, 0, 2]]];
            let right = [t[[0, y, 7, 0]], t[[0, y, 7, 1]], t[[0, y, 7, 2]]];
            assert_eq!(left, [255, 0, 0], "column 0, row {y}");
            assert_eq!(right, [0, 0, 255], "column 7, row {y}");
        }
    }

    #[test]
    fn test_unsupported_format() {
        let data = vec![0u8; 24 * 24 * 3];
        let buf = PixelBuffer::packed(&data, 24, 24, PixelFormat::Rgb24).unwrap();
        let result = preprocess(&buf, SIZE_8, true);
        assert!(matches!(
            result,
            Err(PreprocessError::UnsupportedFormat(PixelFormat::Rgb24))
        ));

        let gray = vec![0u8; 24 * 24];
        let buf = PixelBuffer::packed(&gray, 24, 24, PixelFormat::Gray8).unwrap();
        assert!(matches!(
            preprocess(&buf, SIZE_8, false),
            Err(PreprocessError::UnsupportedFormat(PixelFormat::Gray8))
        ));
    }

    #[test]
    fn test_zero_target_size() {
        let img = gradient(10, 10);
        let target = InputSize { width: 0, height: 8 };
        assert!(matches!(
            preprocess(&img.as_buffer(), target, true),
            Err(PreprocessError::ConversionFailed(_))
        ));
    }

    #[test]
    fn test_empty_source() {
        let buf = PixelBuffer::packed(&[], 0, 0, PixelFormat::Bgra32).unwrap();
        assert!(matches!(
            preprocess(&buf, SIZE_8, true),
            Err(PreprocessError::ConversionFailed(_))
        ));
    }

    #[test]
    fn test_quantized_is_deterministic() {
        let img = gradient(50, 37);
        let target = InputSize { width: 20, height: 20 };
        let a = preprocess(&img.as_buffer(), target, true).unwrap();
        let b = preprocess(&img.as_buffer(), target, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_standardized_is_deterministic() {
        let img = gradient(50, 37);
        let target = InputSize { width: 20, height: 20 };
        let (Tensor::Standardized(a), Tensor::Standardized(b)) = (
            preprocess(&img.as_buffer(), target, false).unwrap(),
            preprocess(&img.as_buffer(), target, false).unwrap(),
        ) else {
            panic!("expected standardized tensors");
        };
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6, "{x} vs {y}");
        }
    }

    #[test]
    fn test_standardized_zero_mean_unit_variance() {
        let img = gradient(32, 32);
        let Tensor::Standardized(t) =
            preprocess(&img.as_buffer(), InputSize { width: 16, height: 16 }, false).unwrap()
        else {
            panic!("expected standardized tensor");
        };
        let n = t.len() as f32;
        let mean = t.iter().sum::<f32>() / n;
        let var = t.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-4, "mean = {mean}");
        assert!((var - 1.0).abs() < 1e-3, "variance = {var}");
    }

    #[test]
    fn test_standardization_is_whole_tensor_not_per_channel() {
        // Solid (200, 100, 0): the channels differ from each other, so a
        // whole-tensor standardization keeps them distinct. Per-channel
        // standardization would zero every channel.
        let img = solid(PixelFormat::Rgba32, [200, 100, 0, 255], 8, 8);
        let Tensor::Standardized(t) = preprocess(&img.as_buffer(), SIZE_8, false).unwrap() else {
            panic!("expected standardized tensor");
        };
        let (r, g, b) = (t[[0, 0, 0, 0]], t[[0, 0, 0, 1]], t[[0, 0, 0, 2]]);
        assert!(r > g && g > b, "r={r} g={g} b={b}");
        assert!(g.abs() < 1e-5, "green sits at the mean, got {g}");
    }

    #[test]
    fn test_uniform_image_uses_std_floor() {
        let img = solid(PixelFormat::Bgra32, [100, 100, 100, 255], 8, 8);
        let Tensor::Standardized(t) = preprocess(&img.as_buffer(), SIZE_8, false).unwrap() else {
            panic!("expected standardized tensor");
        };
        for v in t.iter() {
            assert!(v.is_finite(), "got non-finite {v}");
            assert_eq!(*v, 0.0);
        }
    }

    #[test]
    fn test_moments_floor_value() {
        let values = vec![42.0f32; 192];
        let (mean, std) = moments(&values);
        assert_eq!(mean, 42.0);
        assert!((std - 1.0 / 192f32.sqrt()).abs() < 1e-7, "std = {std}");
    }

    #[test]
    fn test_moments_population_std() {
        // Population std of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2.
        let values = [2.0f32, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (mean, std) = moments(&values);
        assert!((mean - 5.0).abs() < 1e-6);
        assert!((std - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_padded_source_matches_packed() {
        let packed = gradient(12, 9);
        let raw = packed.clone().into_raw();

        // Same pixels with 8 bytes of padding after every row.
        let row = 12 * 4;
        let mut padded = Vec::new();
        for chunk in raw.chunks(row) {
            padded.extend_from_slice(chunk);
            padded.extend_from_slice(&[0xAB; 8]);
        }
        let strided = PixelBuffer::new(&padded, 12, 9, row + 8, PixelFormat::Rgba32).unwrap();

        let a = preprocess(&packed.as_buffer(), SIZE_8, true).unwrap();
        let b = preprocess(&strided, SIZE_8, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_alloc_reports_out_of_memory() {
        let result = alloc::<f32>(usize::MAX / 2);
        assert!(matches!(result, Err(PreprocessError::OutOfMemory { .. })));
    }
}
